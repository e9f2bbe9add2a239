use anyhow::{Context as _, bail};
use cassmap_db::{Id, Mapper, Value};
use clap::Args;

use crate::common::CommonArgs;

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Entity name from the config
    #[arg(short, long)]
    entity: String,

    /// Key values in key order: partition key first, then clustering columns
    #[arg(required = true)]
    id: Vec<String>,
}

impl GetArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = self.common.load()?;
        let meta = ctx.registry.require(&self.entity)?;
        let key: Vec<usize> = meta.key_indexes().collect();
        if self.id.len() > key.len() {
            bail!("{} has {} key columns, got {} values", meta.name(), key.len(), self.id.len());
        }

        let values = key
            .iter()
            .zip(&self.id)
            .map(|(&idx, text)| {
                let field = meta.field(idx);
                Value::parse(field.ty, text).with_context(|| format!("key column {}", field.column))
            })
            .collect::<anyhow::Result<Vec<Value>>>()?;

        let mut mapper = Mapper::new(ctx.resolver.driver(&self.common.service)?, meta);
        let record = match mapper.load(Id::Composite(values)) {
            Ok(record) => record,
            Err(e) => {
                let host = mapper.driver_mut().connection().current_host().map(str::to_owned);
                let problem = e.to_problem_in(Some(mapper.meta().table()), host.as_deref());
                bail!("{}", serde_json::to_string_pretty(&problem)?);
            }
        };
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    }
}
