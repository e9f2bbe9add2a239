use anyhow::bail;
use cassmap_db::Mapper;
use clap::Args;

use crate::common::CommonArgs;

#[derive(Args)]
pub struct EnsureSchemaArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Entity to bootstrap; repeatable. All configured entities when omitted.
    #[arg(short, long)]
    entity: Vec<String>,
}

impl EnsureSchemaArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = self.common.load()?;
        let names = if self.entity.is_empty() {
            ctx.registry.names()
        } else {
            self.entity.clone()
        };
        if names.is_empty() {
            bail!("no entities configured");
        }

        let mut driver = ctx.resolver.driver(&self.common.service)?;
        let mut reports = serde_json::Map::new();
        for name in names {
            let meta = ctx.registry.require(&name)?;
            let report = Mapper::new(&mut driver, meta).ensure_schema()?;
            reports.insert(name, serde_json::to_value(report)?);
        }
        println!("{}", serde_json::to_string_pretty(&reports)?);
        Ok(())
    }
}
