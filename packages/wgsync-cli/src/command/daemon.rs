use crate::cli::ConfigArgs;
use clap::Parser;
use std::time::Duration;
use tokio::{sync::broadcast, task::JoinSet};
use wgsync_lib::util::shutdown_signal_handler;
use wgsync_server::Engine;

#[derive(Debug, Parser, Clone)]
#[clap(name = "wgsync daemon", about = "wgsync config dump daemon", version)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Overrides `dump_interval` from the config file, e.g. `10m`.
    #[clap(short, long, value_parser = humantime::parse_duration, help = "Dump interval.")]
    pub interval: Option<Duration>,
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let (tx, rx) = broadcast::channel::<()>(1);

    let mut config = args.config.load()?;
    if let Some(interval) = args.interval {
        config = config.with_dump_interval(interval);
    }
    tracing::info!("Configuration: {config:?}");
    let engine = Engine::system(&config)?;
    let scheduler = engine.scheduler;

    let mut subsystems: JoinSet<()> = JoinSet::new();
    subsystems.spawn(shutdown_signal_handler()?);
    subsystems.spawn(async move { scheduler.run(rx).await });

    // The scheduler only returns once told to, so this is the signal.
    let _ = subsystems.join_next().await;
    if let Err(e) = tx.send(()) {
        tracing::error!("Failed to send shutdown signal: {e}");
    }
    while let Some(res) = subsystems.join_next().await {
        if let Err(e) = res {
            tracing::error!("Dump service failed: {e}");
        }
    }

    Ok(())
}
