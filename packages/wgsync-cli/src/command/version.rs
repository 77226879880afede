use crate::cli::ConfigArgs;
use clap::Parser;

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    println!("wgsync {}", env!("CARGO_PKG_VERSION"));
    println!("{}", engine.devices.tool_version().await);
    Ok(())
}
