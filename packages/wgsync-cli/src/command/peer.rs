use crate::cli::{print_json, ConfigArgs};
use clap::{Parser, Subcommand};
use wgsync_lib::types::PeerRequest;

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Device name.
    pub device: String,

    #[clap(subcommand)]
    pub command: PeerCommand,
}

/// Peers are addressed by their public key, standard or URL-safe base64.
#[derive(Subcommand, Debug, Clone)]
pub enum PeerCommand {
    Get {
        peer: String,
    },
    /// Add a peer. Without keys a key pair is generated.
    Create {
        #[clap(long)]
        public_key: Option<String>,
        #[clap(long)]
        private_key: Option<String>,
        #[clap(flatten)]
        options: PeerOptions,
    },
    Update {
        peer: String,
        #[clap(flatten)]
        options: PeerOptions,
    },
    Delete {
        peer: String,
    },
}

#[derive(Debug, Parser, Clone, Default)]
pub struct PeerOptions {
    #[clap(long)]
    pub preshared_key: Option<String>,

    /// CIDR, repeatable. Replaces the current list.
    #[clap(long = "allowed-ip")]
    pub allowed_ips: Vec<String>,

    /// Persistent keepalive such as `25s`; `0` disables it.
    #[clap(long)]
    pub keepalive: Option<String>,

    /// `host:port`.
    #[clap(long)]
    pub endpoint: Option<String>,
}

impl PeerOptions {
    fn into_request(self) -> PeerRequest {
        PeerRequest {
            preshared_key: self.preshared_key,
            allowed_ips: (!self.allowed_ips.is_empty()).then_some(self.allowed_ips),
            persistent_keepalive_interval: self.keepalive,
            endpoint: self.endpoint,
            ..Default::default()
        }
    }
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    let peers = &engine.peers;
    let device = args.device.as_str();

    let peer = match args.command {
        PeerCommand::Get { peer } => peers.get(device, &peer).await?,
        PeerCommand::Create {
            public_key,
            private_key,
            options,
        } => {
            let req = PeerRequest {
                public_key,
                private_key,
                ..options.into_request()
            };
            peers.create(device, req).await?
        }
        PeerCommand::Update { peer, options } => {
            peers.update(device, &peer, options.into_request()).await?
        }
        PeerCommand::Delete { peer } => peers.delete(device, &peer).await?,
    };

    print_json(&peer)
}
