use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod common;
mod get;
mod ping;
mod schema;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(name = "cassmap")]
struct Cli {
    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a service and print cluster info and keyspaces
    Ping(ping::PingArgs),
    /// Create tables and indexes for configured entities
    EnsureSchema(schema::EnsureSchemaArgs),
    /// Load one record by id and print it as JSON
    Get(get::GetArgs),
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ping(ping) => ping.run(),
        Commands::EnsureSchema(schema) => schema.run(),
        Commands::Get(get) => get.run(),
    }
}
