use crate::cli::ConfigArgs;
use clap::Parser;

/// Dump the config of every running device once.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    let report = engine.scheduler.save_all().await?;

    for name in &report.saved {
        println!("saved\t{name}");
    }
    for (name, reason) in &report.failed {
        println!("failed\t{name}\t{reason}");
    }

    if !report.is_clean() {
        anyhow::bail!("{} device(s) could not be dumped", report.failed.len());
    }
    Ok(())
}
