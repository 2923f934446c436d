use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use safedrive_common::{load_config, Config, FileConfig};
use safedrive_scout::crawler::{CrawlSource, Crawler};
use safedrive_scout::dedup::Deduplicator;
use safedrive_scout::progress::ProgressTracker;
use safedrive_scout::sources::http_client;
use safedrive_store::{IncidentStore, MemoryIncidentStore, PgIncidentStore};

#[derive(Parser)]
#[command(name = "safedrive-scout", about = "Crime report collector with cross-source deduplication")]
struct Cli {
    /// Path to config TOML file (defaults to SAFEDRIVE_CONFIG, then ./safedrive.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl configured sources, resuming from saved progress
    Crawl {
        /// Use an in-memory store and a throwaway progress file
        #[arg(long)]
        dry_run: bool,
        /// Only crawl these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Re-read the first N pages of each source for new stories, ignoring
        /// and not updating saved progress
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        recent: Option<u32>,
    },
    /// Print saved crawl cursors
    Progress,
    /// Print incident statistics
    Report {
        #[arg(long, default_value_t = 10)]
        top: i64,
    },
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("safedrive=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.config {
        config.config_path = path;
    }
    config.log_redacted();

    match cli.command {
        Command::Crawl {
            dry_run,
            sources,
            recent,
        } => crawl(&config, dry_run, recent, &sources).await,
        Command::Progress => {
            let file_config = load_config(&config.config_path)?;
            let tracker = ProgressTracker::new(&config.progress_file, file_config.source_names());
            for (source, cursor) in tracker.load() {
                println!(
                    "{source}: next page {}, {} new, {} alternates",
                    cursor.page, cursor.total_collected, cursor.total_alternatives
                );
            }
            Ok(())
        }
        Command::Report { top } => {
            let store = connect(&config).await?;
            let stats = store.stats(top).await?;
            println!("{stats}");
            Ok(())
        }
        Command::Migrate => {
            connect(&config).await?;
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<PgIncidentStore> {
    let store = PgIncidentStore::connect(config.require_database_url()?, 5)
        .await
        .context("Failed to connect to Postgres")?;
    store.migrate().await?;
    Ok(store)
}

/// The crawl's incident store. Dry runs also hand back the memory store so its
/// stats can be logged at the end.
async fn open_store(
    config: &Config,
    dry_run: bool,
) -> Result<(Arc<dyn IncidentStore>, Option<Arc<MemoryIncidentStore>>)> {
    if dry_run {
        info!("Dry run: incidents are kept in memory only");
        let memory = Arc::new(MemoryIncidentStore::new());
        let store: Arc<dyn IncidentStore> = memory.clone();
        return Ok((store, Some(memory)));
    }
    let store: Arc<dyn IncidentStore> = Arc::new(connect(config).await?);
    Ok((store, None))
}

fn select_sources(file_config: &FileConfig, only: &[String]) -> Result<Vec<safedrive_common::SourceConfig>> {
    for name in only {
        if !file_config.sources.iter().any(|s| &s.name == name) {
            bail!("Unknown source: {name}");
        }
    }
    Ok(file_config
        .sources
        .iter()
        .filter(|s| only.is_empty() || only.contains(&s.name))
        .cloned()
        .collect())
}

async fn crawl(config: &Config, dry_run: bool, recent: Option<u32>, only: &[String]) -> Result<()> {
    let file_config = load_config(&config.config_path)?;
    let selected = select_sources(&file_config, only)?;
    if selected.is_empty() {
        bail!("No sources configured in {}", config.config_path.display());
    }

    let client = http_client(&file_config.crawl)?;
    let sources: Vec<CrawlSource> = selected
        .iter()
        .map(|s| CrawlSource::from_config(s, client.clone()))
        .collect();

    // Dry runs keep their checkpoint in a scratch directory.
    let scratch = if dry_run { Some(tempfile::tempdir()?) } else { None };
    let progress_file = match &scratch {
        Some(dir) => dir.path().join("progress.json"),
        None => config.progress_file.clone(),
    };
    let tracker = ProgressTracker::new(progress_file, file_config.source_names());

    let (store, memory) = open_store(config, dry_run).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let dedup = Arc::new(Deduplicator::new(store, file_config.dedup.clone()));
    let crawler = Crawler::new(sources, dedup, tracker, &file_config.crawl, cancel);
    let summary = match recent {
        Some(pages) => crawler.run_recent(pages).await,
        None => crawler.run().await,
    };
    info!("Crawl finished. {summary}");

    if let Some(memory) = memory {
        let stats = memory.stats(10).await?;
        info!("Dry run store. {stats}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_database() -> Config {
        Config {
            database_url: None,
            config_path: PathBuf::from("safedrive.toml"),
            progress_file: PathBuf::from("progress.json"),
            api_host: "127.0.0.1".to_string(),
            api_port: 0,
        }
    }

    #[tokio::test]
    async fn dry_run_uses_memory_store() {
        let (store, memory) = open_store(&config_without_database(), true).await.unwrap();
        assert!(memory.is_some());
        assert_eq!(store.stats(10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn live_run_requires_database_and_builds_no_memory_store() {
        match open_store(&config_without_database(), false).await {
            Ok(_) => panic!("expected a missing DATABASE_URL error"),
            Err(e) => assert!(e.to_string().contains("DATABASE_URL"), "{e}"),
        }
    }
}
