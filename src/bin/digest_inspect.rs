use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use limitless_digest::config;
use limitless_digest::extract::{select_content, Selection};
use limitless_digest::{DateKey, DigestApi, LimitlessClient};

#[derive(Parser, Debug)]
#[command(about = "Show which field the extractor picks for every record of a day")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Day to inspect (YYYY-MM-DD)
    #[arg(long)]
    date: DateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let client = LimitlessClient::from_config(&cfg)?;

    let records = client.fetch_records(&args.date).await?;
    println!("Date: {} ({} records)", args.date, records.len());
    for record in &records {
        let date_note = if record.belongs_to(&args.date) {
            String::new()
        } else {
            format!(" [dated {}]", record.days_date)
        };
        match select_content(record) {
            Selection::Accepted { source, text } => println!(
                "  {}{} -> {} ({} chars)",
                record.display_id(),
                date_note,
                source.as_str(),
                text.chars().count()
            ),
            Selection::Rejected { source, text } => println!(
                "  {}{} -> {} REJECTED: {:?}",
                record.display_id(),
                date_note,
                source.as_str(),
                text.chars().take(60).collect::<String>()
            ),
            Selection::Missing => println!("  {}{} -> no content", record.display_id(), date_note),
        }
    }
    Ok(())
}
