use crate::cli::{print_json, ConfigArgs};
use clap::Parser;
use serde::Serialize;
use wgsync_lib::{constant::DEFAULT_PER_PAGE, types::Device};

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Zero-based page.
    #[clap(long, default_value_t = 0, allow_negative_numbers = true)]
    pub page: i64,

    #[clap(long, default_value_t = DEFAULT_PER_PAGE, allow_negative_numbers = true)]
    pub per_page: i64,
}

#[derive(Serialize)]
struct Listing<'a> {
    total: usize,
    page: i64,
    per_page: i64,
    devices: &'a [Device],
}

pub async fn exec(args: Args) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    let (devices, total) = engine.devices.list(args.page, args.per_page).await?;

    print_json(&Listing {
        total,
        page: args.page,
        per_page: args.per_page,
        devices: &devices,
    })
}
