//! NPI directory scraper CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use npi_scraper::{
    HttpFetcher, PaginatedTableScraper, RowRule, ScrapeLimits, ScrapeOutcome, SummaryRule,
    SummaryScraper,
};
use serde_json::json;
use shared::{Config, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape the landing-page summary tables
    Summary,

    /// Follow the search-result pagination and collect provider rows
    Providers {
        /// Start page, as a path on the directory or an absolute URL
        #[arg(long)]
        url: Option<String>,

        /// Override the maximum number of pages
        #[arg(long)]
        max_pages: Option<u32>,

        /// Override the consecutive empty page limit
        #[arg(long)]
        max_empty: Option<u32>,
    },

    /// Summary tables followed by the full provider listing
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    shared::logging::init(LogConfig::from_config(&config, "npi-scraper", args.verbose))?;

    info!("NPI scraper starting");
    info!(config_file = %args.config.display(), "Loaded configuration");

    // Ctrl-C stops pagination; rows gathered so far are still printed
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            trigger.cancel();
        }
    });

    let fetcher = Arc::new(
        HttpFetcher::new(&config.fetch)
            .context("Failed to create HTTP fetcher")?
            .with_cancellation(cancel.clone()),
    );
    let options = HttpFetcher::options(&config.fetch);

    let output = match args.command {
        Command::Summary => {
            let summary = SummaryScraper::new(Arc::clone(&fetcher), options.clone());
            let sections = summary
                .scrape(&config.summary_url(), &SummaryRule::from(&config.directory))
                .await
                .context("Failed to scrape summary page")?;
            json!({ "sections": sections })
        }
        Command::Providers {
            url,
            max_pages,
            max_empty,
        } => {
            let start_url = url
                .map(|u| config.directory_url(&u))
                .unwrap_or_else(|| config.start_url());

            let mut limits = ScrapeLimits::from(&config.pagination);
            if let Some(max_pages) = max_pages {
                limits.max_pages = max_pages;
            }
            if let Some(max_empty) = max_empty {
                limits.max_consecutive_empty_pages = max_empty;
            }

            let scraper = PaginatedTableScraper::new(Arc::clone(&fetcher), options.clone());
            let outcome = scraper
                .scrape(&start_url, &RowRule::from(&config.directory), &limits, &cancel)
                .await
                .with_context(|| format!("Failed to scrape providers from {start_url}"))?;
            log_outcome(&outcome);
            serde_json::to_value(&outcome).context("Failed to serialize providers")?
        }
        Command::All => {
            let summary = SummaryScraper::new(Arc::clone(&fetcher), options.clone());
            let sections = summary
                .scrape(&config.summary_url(), &SummaryRule::from(&config.directory))
                .await
                .context("Failed to scrape summary page")?;

            let scraper = PaginatedTableScraper::new(Arc::clone(&fetcher), options.clone());
            let outcome = scraper
                .scrape(
                    &config.start_url(),
                    &RowRule::from(&config.directory),
                    &ScrapeLimits::from(&config.pagination),
                    &cancel,
                )
                .await
                .context("Failed to scrape providers")?;
            log_outcome(&outcome);

            json!({
                "sections": sections,
                "report": outcome.report,
                "rows": outcome.rows,
            })
        }
    };

    let rendered = serde_json::to_string_pretty(&output).context("Failed to render output")?;
    println!("{rendered}");

    info!("NPI scraper finished");

    Ok(())
}

fn log_outcome(outcome: &ScrapeOutcome) {
    let report = &outcome.report;
    if report.is_partial() {
        warn!(
            pages = report.pages_fetched,
            rows = report.rows_collected,
            stop_reason = report.stop_reason.as_str(),
            "Result is partial"
        );
    } else {
        info!(
            pages = report.pages_fetched,
            rows = report.rows_collected,
            stop_reason = report.stop_reason.as_str(),
            "Provider listing complete"
        );
    }
}
