pub(crate) use crate::command::{daemon, device, devices, dump, peer, peers, quick, version};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use wgsync_lib::{constant::WGSYNC_CONFIG_REALPATH, util::init_logging};
use wgsync_server::{Config, Engine};

#[derive(Debug, Parser)]
#[clap(
    name = "wgsync",
    about = "Keep WireGuard interfaces and their wg-quick files in sync",
    version
)]
pub struct Opt {
    /// The command to run
    #[clap(subcommand)]
    pub command: WgsyncCli,
}

#[derive(Subcommand, Debug)]
pub enum WgsyncCli {
    #[clap(name = "daemon", about = "Periodically dump running devices to disk.")]
    Daemon(daemon::Args),
    #[clap(name = "dump", about = "Dump every running device to disk once.")]
    Dump(dump::Args),
    #[clap(name = "devices", about = "List running and config-only devices.")]
    Devices(devices::Args),
    #[clap(name = "device", about = "Show, create, update or delete a device.")]
    Device(device::Args),
    #[clap(name = "up", about = "Bring a device up with wg-quick.")]
    Up(quick::Args),
    #[clap(name = "down", about = "Take a device down with wg-quick.")]
    Down(quick::Args),
    #[clap(name = "peers", about = "List the peers of a running device.")]
    Peers(peers::Args),
    #[clap(name = "peer", about = "Show, create, update or delete a peer.")]
    Peer(peer::Args),
    #[clap(name = "version", about = "Print wgsync and wireguard-tools versions.")]
    Version(version::Args),
}

/// Options every command accepts.
#[derive(Debug, Parser, Clone)]
pub struct ConfigArgs {
    /// Config file.
    #[clap(short, long, env = "WGSYNC_CONFIG", help = "Config file.")]
    pub config: Option<PathBuf>,

    /// Config directories, searched in order. Overrides the config file.
    #[clap(long = "config-dir", help = "WireGuard config directory (repeatable).")]
    pub config_dirs: Vec<PathBuf>,
}

impl ConfigArgs {
    /// The explicit `--config`, else the system config when present, else
    /// built-in defaults.
    pub fn load(&self) -> anyhow::Result<Config> {
        let config = match &self.config {
            Some(path) => Config::try_from(path)?,
            None if Path::new(WGSYNC_CONFIG_REALPATH).exists() => {
                Config::try_from(Path::new(WGSYNC_CONFIG_REALPATH))?
            }
            None => Config::default(),
        };

        if self.config_dirs.is_empty() {
            return Ok(config);
        }
        let config = config.with_config_dirs(self.config_dirs.clone());
        config.validate()?;
        Ok(config)
    }

    pub fn engine(&self) -> anyhow::Result<Engine> {
        let config = self.load()?;
        tracing::debug!("Configuration: {config:?}");
        Ok(Engine::system(&config)?)
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_cli() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();
    init_logging()?;

    match opt.command {
        WgsyncCli::Daemon(command) => daemon::exec(command).await,
        WgsyncCli::Dump(command) => dump::exec(command).await,
        WgsyncCli::Devices(command) => devices::exec(command).await,
        WgsyncCli::Device(command) => device::exec(command).await,
        WgsyncCli::Up(command) => quick::exec(command, quick::Action::Up).await,
        WgsyncCli::Down(command) => quick::exec(command, quick::Action::Down).await,
        WgsyncCli::Peers(command) => peers::exec(command).await,
        WgsyncCli::Peer(command) => peer::exec(command).await,
        WgsyncCli::Version(command) => version::exec(command).await,
    }
}
