use std::{env, str::FromStr};
#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing_subscriber::filter::EnvFilter;

const RUST_LOG: &str = "RUST_LOG";
const HUMAN_LOGGING: &str = "HUMAN_LOGGING";

pub fn init_logging() -> anyhow::Result<()> {
    let filter = match env::var_os(RUST_LOG) {
        Some(_) => EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid `RUST_LOG` provided: {e}"))?,
        None => EnvFilter::new("info"),
    };

    let human_logging = match env::var(HUMAN_LOGGING) {
        Ok(s) => bool::from_str(&s).map_err(|_| {
            anyhow::anyhow!("Expected `true` or `false` to be provided for `HUMAN_LOGGING`")
        })?,
        Err(_) => true,
    };

    let sub = tracing_subscriber::fmt::Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    let res = if human_logging {
        sub.with_ansi(true)
            .with_level(true)
            .with_line_number(true)
            .try_init()
    } else {
        sub.with_ansi(false)
            .with_level(true)
            .with_line_number(true)
            .json()
            .try_init()
    };

    res.map_err(|e| anyhow::anyhow!("Could not install tracing subscriber: {e}"))
}

pub fn shutdown_signal_handler() -> std::io::Result<impl futures::Future<Output = ()>> {
    #[cfg(unix)]
    let (mut sighup, mut sigterm, mut sigint): (Signal, Signal, Signal) = (
        signal(SignalKind::hangup())?,
        signal(SignalKind::terminate())?,
        signal(SignalKind::interrupt())?,
    );

    let future = async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP. Stopping services.");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM. Stopping services.");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT. Stopping services.");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Could not listen for CTRL+C: {e}");
            }
            tracing::info!("Received CTRL+C. Stopping services.");
        }
    };

    Ok(future)
}
