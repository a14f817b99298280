use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::connector::Connector;
use crate::providers::{AgileCentralProvider, BambooProvider};
use crate::watermark::Watermark;

#[derive(Parser)]
#[command(name = "bldsync")]
#[command(author, version, about = "Reflects CI build results into an Agile tracking tool", long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,

    /// Compute and log what would be posted, creating nothing
    #[arg(long, default_value_t = false)]
    preview: bool,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let mut config = Config::load(&self.config)?;
        if self.preview {
            config.service.preview = true;
        }

        // The watermark only moves after a successful, non-preview run, so a
        // failed run is retried over the same window next time.
        let watermark = Watermark::for_config(&self.config);
        let run_started = Utc::now();
        let last_run = match watermark.read()? {
            Some(t) => t,
            None => {
                info!("No previous run on record; the configured lookbacks bound this first run");
                run_started
            }
        };
        info!("Last successful run: {last_run}");

        let source = BambooProvider::from_config(&config)?;
        let tracker = AgileCentralProvider::new(
            &format!("https://{}", config.agile_central.server),
            &config.agile_central.api_key,
            &config.agile_central.workspace,
        )?;

        let preview = config.service.preview;
        let mut connector = Connector::new(source, tracker, config);
        connector
            .connect_and_validate()
            .await
            .context("Connector validation failed")?;

        let summary = connector
            .run(last_run)
            .await
            .context("Reconciliation run failed")?;

        if preview {
            info!(
                "Preview complete: {} builds would have been posted",
                summary.would_post
            );
        } else if summary.ok {
            watermark.write(run_started)?;
        }

        Ok(())
    }
}
