use crate::cli::ConfigArgs;
use clap::Parser;

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Up,
    Down,
}

#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Device name, e.g. `wg0`.
    pub name: String,
}

pub async fn exec(args: Args, action: Action) -> anyhow::Result<()> {
    let engine = args.config.engine()?;
    match action {
        Action::Up => {
            engine.devices.up(&args.name).await?;
            tracing::info!("{} is up.", args.name);
        }
        Action::Down => {
            engine.devices.down(&args.name).await?;
            tracing::info!("{} is down.", args.name);
        }
    }
    Ok(())
}
