use anyhow::{Context, Result};
use clap::Parser;
use limitless_digest::config;
use limitless_digest::{DateKey, DigestFetcher, LimitlessClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the personal-log digest for one day")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Day to load (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<DateKey>,

    /// Never ask the ingestion service to populate an empty day
    #[arg(long)]
    no_auto_fetch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let client = LimitlessClient::from_config(&cfg)?;
    let fetcher = DigestFetcher::new(Arc::new(client), cfg.app.settle_delay());
    let date = args.date.unwrap_or_else(DateKey::today);
    let allow_auto_fetch = cfg.app.auto_fetch && !args.no_auto_fetch;

    info!(%date, allow_auto_fetch, session = %fetcher.session_id(), "loading digest");
    fetcher.fetch_data(&date, allow_auto_fetch).await;
    fetcher.settle().await;

    let state = fetcher.state().await;
    if let Some(err) = &state.fetch_error {
        warn!(%date, error = %err, "digest unavailable");
        eprintln!("{}", err);
    }
    if state.markdown_content.is_empty() {
        println!("No content for {}.", date);
    } else {
        println!("{}", state.markdown_content);
    }
    Ok(())
}
