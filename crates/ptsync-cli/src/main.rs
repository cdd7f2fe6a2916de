use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ptsync_adapters::{HtmlProfileScraper, ProfileScraper, ScrapeError};
use ptsync_sync::{RunOutcome, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ptsync")]
#[command(about = "Profile target sync: scrape queued profiles into the shared spreadsheet")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process pending work items once.
    Sync,
    /// Run `sync` on the `PTSYNC_CRON` schedule until interrupted.
    Schedule,
    /// Rewrite legacy status cells on the work-item sheet.
    NormalizeStatuses,
    /// Scrape one profile and print the snapshot without writing anything.
    Scrape { key: String },
}

/// Ctrl-C cancels the returned token; the run finishes its current write first.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current item");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ptsync=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let cancel = cancel_on_ctrl_c();
            let summary = ptsync_sync::run_sync_once_from_env(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            match summary.outcome {
                RunOutcome::Completed => {}
                RunOutcome::Interrupted => bail!("run interrupted after {} items", summary.processed),
                RunOutcome::Aborted => bail!(
                    "run aborted: {}",
                    summary.error.as_deref().unwrap_or("remote store failure")
                ),
            }
        }
        Commands::Schedule => {
            let config = SyncConfig::from_env()?;
            ptsync_sync::run_scheduled(config, cancel_on_ctrl_c()).await?;
        }
        Commands::NormalizeStatuses => {
            let changed = ptsync_sync::normalize_statuses_from_env().await?;
            info!(changed, "status normalization complete");
            println!("normalized {changed} status cells");
        }
        Commands::Scrape { key } => {
            let config = SyncConfig::from_env()?;
            let scraper = HtmlProfileScraper::new(config.site_config())?;
            let snapshot = match scraper.scrape(&key).await {
                Ok(snapshot) => snapshot,
                Err(ScrapeError::Terminal { kind, reason, snapshot }) => {
                    warn!(key = %key, %kind, reason = %reason, "account is not scrapable");
                    *snapshot
                }
                Err(err) => return Err(err.into()),
            };
            for (field, value) in snapshot.iter() {
                println!("{:<16} {value}", field.header());
            }
        }
    }

    Ok(())
}
