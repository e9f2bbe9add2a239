use clap::Args;
use serde_json::json;

use crate::common::CommonArgs;

#[derive(Args)]
pub struct PingArgs {
    #[command(flatten)]
    common: CommonArgs,
}

impl PingArgs {
    pub fn run(&self) -> anyhow::Result<()> {
        let ctx = self.common.load()?;
        let mut conn = ctx.resolver.connect(&self.common.service)?;
        let info = conn.cluster_info()?;
        let keyspaces = conn.keyspaces()?;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "service": self.common.service,
                "cluster": info,
                "keyspaces": keyspaces,
            }))?
        );
        Ok(())
    }
}
