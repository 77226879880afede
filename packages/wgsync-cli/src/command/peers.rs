use crate::cli::{print_json, ConfigArgs};
use clap::Parser;
use serde::Serialize;
use wgsync_lib::{constant::DEFAULT_PER_PAGE, types::Peer};
use wgsync_server::PeerSort;

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Device name.
    pub device: String,

    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pub page: i64,

    #[clap(long, default_value_t = DEFAULT_PER_PAGE, allow_negative_numbers = true)]
    pub per_page: i64,

    /// Keep peers whose public key, endpoint or allowed IPs contain this.
    #[clap(short, long, default_value = "")]
    pub query: String,

    /// Sort field, `-` prefixed for descending, e.g. `-receive_bytes`.
    #[clap(short, long, value_parser = parse_sort)]
    pub sort: Option<String>,
}

fn parse_sort(s: &str) -> Result<String, String> {
    s.parse::<PeerSort>()
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}

#[derive(Serialize)]
struct Listing<'a> {
    total: usize,
    page: i64,
    per_page: i64,
    peers: &'a [Peer],
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    let (peers, total) = engine
        .peers
        .list(
            &args.device,
            args.page,
            args.per_page,
            &args.query,
            args.sort.as_deref().unwrap_or_default(),
        )
        .await?;

    print_json(&Listing {
        total,
        page: args.page,
        per_page: args.per_page,
        peers: &peers,
    })
}
