use std::path::PathBuf;

use anyhow::{Context as _, bail};
use cassmap_db::{ConnectionResolver, MapperConfig, MetadataRegistry};
use clap::Args;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};

const DEFAULT_CONFIG: &str = "./cassmap.yaml";

#[derive(Args)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Connection service name from the config
    #[arg(short = 's', long, default_value = "main")]
    pub service: String,
}

/// Loaded configuration with its entity registry and connection resolver.
pub struct Session {
    pub registry: MetadataRegistry,
    pub resolver: ConnectionResolver,
}

impl CommonArgs {
    // Layered: YAML (explicit file, or ./cassmap.yaml when present) -> env (CASSMAP__*)
    fn figment(&self) -> anyhow::Result<Figment> {
        let mut figment = Figment::new();
        match &self.config {
            Some(path) => {
                if !path.is_file() {
                    bail!("config file does not exist: {}", path.display());
                }
                figment = figment.merge(Yaml::file(path));
            }
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG);
                if fallback.is_file() {
                    figment = figment.merge(Yaml::file(fallback));
                }
            }
        }
        Ok(figment.merge(
            Env::prefixed("CASSMAP__")
                .split("__")
                .map(|k| format!("cassmap.{k}").into()),
        ))
    }

    pub fn load(&self) -> anyhow::Result<Session> {
        let config = MapperConfig::from_figment(&self.figment()?).context("invalid configuration")?;
        let registry = config.registry()?;
        let resolver = ConnectionResolver::from_config(&config)?;
        tracing::debug!(
            services = ?resolver.names(),
            entities = registry.len(),
            "Configuration loaded"
        );
        Ok(Session { registry, resolver })
    }
}
