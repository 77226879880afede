use crate::cli::{print_json, ConfigArgs};
use clap::{Parser, Subcommand};
use wgsync_lib::types::DeviceRequest;

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    #[clap(subcommand)]
    pub command: DeviceCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeviceCommand {
    /// Show one device.
    Get { name: String },
    /// Create a device and its config file.
    Create {
        name: String,
        #[clap(flatten)]
        options: DeviceOptions,
    },
    /// Change a running device.
    Update {
        name: String,
        #[clap(flatten)]
        options: DeviceOptions,
    },
    /// Delete a device. Running devices must be taken down first.
    Delete { name: String },
}

#[derive(Debug, Parser, Clone, Default)]
pub struct DeviceOptions {
    #[clap(long)]
    pub listen_port: Option<u16>,

    /// Base64 private key. Generated on create when omitted.
    #[clap(long)]
    pub private_key: Option<String>,

    #[clap(long)]
    pub fwmark: Option<u32>,

    #[clap(long = "address")]
    pub addresses: Vec<String>,

    #[clap(long)]
    pub dns: Vec<String>,

    #[clap(long)]
    pub mtu: Option<u32>,

    #[clap(long)]
    pub table: Option<String>,

    #[clap(long)]
    pub pre_up: Vec<String>,

    #[clap(long)]
    pub post_up: Vec<String>,

    #[clap(long)]
    pub pre_down: Vec<String>,

    #[clap(long)]
    pub post_down: Vec<String>,
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    (!v.is_empty()).then_some(v)
}

impl DeviceOptions {
    pub fn into_request(self, name: Option<String>) -> DeviceRequest {
        DeviceRequest {
            name,
            listen_port: self.listen_port,
            private_key: self.private_key,
            firewall_mark: self.fwmark,
            addresses: non_empty(self.addresses),
            dns: non_empty(self.dns),
            mtu: self.mtu,
            table: self.table,
            pre_up: non_empty(self.pre_up),
            post_up: non_empty(self.post_up),
            pre_down: non_empty(self.pre_down),
            post_down: non_empty(self.post_down),
        }
    }
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    let devices = &engine.devices;

    match args.command {
        DeviceCommand::Get { name } => print_json(&devices.get(&name).await?),
        DeviceCommand::Create { name, options } => {
            let device = devices.create(options.into_request(Some(name))).await?;
            print_json(&device)
        }
        DeviceCommand::Update { name, options } => {
            let device = devices.update(&name, options.into_request(None)).await?;
            print_json(&device)
        }
        DeviceCommand::Delete { name } => {
            devices.delete(&name).await?;
            tracing::info!("Deleted {name}.");
            Ok(())
        }
    }
}
