mod build;
mod cli;
mod config;
mod connector;
mod error;
mod providers;
mod reconcile;
mod watermark;
mod window;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!(
        "bldsync build connector, version {}",
        env!("CARGO_PKG_VERSION")
    );
    cli.execute().await?;

    Ok(())
}
