//! Pagination-driven table scraper.
//!
//! Fetches a listing page, extracts its rows, follows the "next page" link
//! and repeats until one of the stop conditions in [`StopReason`] holds.
//! Every run owns its own [`PaginationState`]; nothing is kept between
//! calls, so two runs never observe each other.

use crate::extract::{parse_page, CompiledRule, ExtractError, RowRule};
use crate::fetch::retry::random_jitter;
use crate::fetch::{FetchError, FetchOptions, Fetcher};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::config::PaginationConfig;
use shared::ProviderRow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Errors that prevent a run from producing any result
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid start URL {url:?}: {message}")]
    InvalidStartUrl { url: String, message: String },

    #[error(transparent)]
    InvalidRule(#[from] ExtractError),

    #[error("invalid scrape limits: {0}")]
    InvalidLimits(String),

    #[error("first page {url} could not be fetched")]
    FirstPageFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ScrapeError {
    /// Whether the underlying cause is an anti-bot block
    pub fn is_block(&self) -> bool {
        match self {
            ScrapeError::FirstPageFailed { source, .. } => source.is_block(),
            ScrapeError::Fetch(e) => e.is_block(),
            _ => false,
        }
    }
}

/// Safety bounds for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeLimits {
    /// Upper bound on pages fetched
    pub max_pages: u32,
    /// Stop after this many pages in a row yield no rows
    pub max_consecutive_empty_pages: u32,
    /// Pause before every fetch after the first
    pub page_delay: Duration,
    /// Random extra pause, up to this much
    pub page_delay_jitter: Duration,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self::from(&PaginationConfig::default())
    }
}

impl From<&PaginationConfig> for ScrapeLimits {
    fn from(config: &PaginationConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_consecutive_empty_pages: config.max_consecutive_empty_pages,
            page_delay: Duration::from_millis(config.page_delay_ms),
            page_delay_jitter: Duration::from_millis(config.page_delay_jitter_ms),
        }
    }
}

impl ScrapeLimits {
    fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_pages == 0 {
            return Err(ScrapeError::InvalidLimits("max_pages must be at least 1".to_string()));
        }
        if self.max_consecutive_empty_pages == 0 {
            return Err(ScrapeError::InvalidLimits(
                "max_consecutive_empty_pages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// The last page had no enabled "next" control
    NoNextLink,
    /// The next link pointed at a page already visited
    CycleDetected { url: String },
    /// The next link carried an empty query
    DegenerateUrl { url: String },
    PageBudgetExhausted,
    EmptyPageLimit,
    Cancelled,
    /// The row stream's receiver was dropped
    ConsumerClosed,
    /// A page after the first failed to load
    FetchFailed { error: FetchError },
}

impl StopReason {
    /// Whether rows past this point may exist but were not collected
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            StopReason::FetchFailed { .. } | StopReason::Cancelled | StopReason::ConsumerClosed
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            StopReason::NoNextLink => "no_next_link",
            StopReason::CycleDetected { .. } => "cycle_detected",
            StopReason::DegenerateUrl { .. } => "degenerate_url",
            StopReason::PageBudgetExhausted => "page_budget_exhausted",
            StopReason::EmptyPageLimit => "empty_page_limit",
            StopReason::Cancelled => "cancelled",
            StopReason::ConsumerClosed => "consumer_closed",
            StopReason::FetchFailed { .. } => "fetch_failed",
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub start_url: String,
    pub pages_fetched: u32,
    pub rows_collected: usize,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScrapeReport {
    /// Whether the rows may be incomplete
    pub fn is_partial(&self) -> bool {
        self.stop_reason.is_partial()
    }
}

/// Rows of a finished run together with its report
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub report: ScrapeReport,
    pub rows: Vec<ProviderRow>,
}

/// Working state of one run
#[derive(Debug)]
struct PaginationState {
    /// Only ever grows
    visited_urls: HashSet<String>,
    /// `None` is terminal
    current_url: Option<String>,
    page_count: u32,
    consecutive_empty_pages: u32,
}

impl PaginationState {
    fn new(start_url: &str) -> Self {
        Self {
            visited_urls: HashSet::new(),
            current_url: Some(start_url.to_string()),
            page_count: 0,
            consecutive_empty_pages: 0,
        }
    }
}

/// Whether `url` carries a query string without any actual filter value
/// (`/provider?` or `/provider?page=`)
pub fn is_degenerate_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    match parsed.query() {
        None => false,
        Some(query) if query.is_empty() => true,
        Some(_) => parsed.query_pairs().all(|(_, value)| value.trim().is_empty()),
    }
}

/// Scraper for paginated directory tables
pub struct PaginatedTableScraper<F> {
    fetcher: Arc<F>,
    options: FetchOptions,
}

impl<F> Clone for PaginatedTableScraper<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            options: self.options.clone(),
        }
    }
}

impl<F: Fetcher> PaginatedTableScraper<F> {
    /// Create a scraper using `fetcher` with the given request options
    pub fn new(fetcher: Arc<F>, options: FetchOptions) -> Self {
        Self { fetcher, options }
    }

    /// Follow the pagination from `start_url` and collect every valid row.
    ///
    /// Fetch failures after the first page end the run early but keep the
    /// rows gathered so far; the report's stop reason says so.
    pub async fn scrape(
        &self,
        start_url: &str,
        rule: &RowRule,
        limits: &ScrapeLimits,
        cancel: &CancellationToken,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let compiled = prepare(start_url, rule, limits)?;

        let mut rows = Vec::new();
        let report = self
            .run(start_url, &compiled, limits, cancel, |page_rows| {
                rows.extend(page_rows);
                true
            })
            .await?;

        Ok(ScrapeOutcome { report, rows })
    }

    /// Run the same loop on a background task, streaming rows as pages arrive.
    ///
    /// Dropping the receiver stops the run after the current page.
    pub fn stream(
        &self,
        start_url: impl Into<String>,
        rule: RowRule,
        limits: ScrapeLimits,
        cancel: CancellationToken,
    ) -> (
        mpsc::UnboundedReceiver<ProviderRow>,
        JoinHandle<Result<ScrapeReport, ScrapeError>>,
    )
    where
        F: 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let scraper = self.clone();
        let start_url = start_url.into();

        let handle = tokio::spawn(async move {
            let compiled = prepare(&start_url, &rule, &limits)?;
            let report = scraper
                .run(&start_url, &compiled, &limits, &cancel, |page_rows| {
                    !tx.is_closed() && page_rows.into_iter().all(|row| tx.send(row).is_ok())
                })
                .await?;
            Ok::<_, ScrapeError>(report)
        });

        (rx, handle)
    }

    /// The pagination loop. `sink` receives the rows of every fetched page,
    /// empty ones included, and returns `false` once nobody is listening.
    async fn run<S>(
        &self,
        start_url: &str,
        rule: &CompiledRule,
        limits: &ScrapeLimits,
        cancel: &CancellationToken,
        mut sink: S,
    ) -> Result<ScrapeReport, ScrapeError>
    where
        S: FnMut(Vec<ProviderRow>) -> bool + Send,
    {
        let started_at = Utc::now();
        let mut state = PaginationState::new(start_url);
        let mut rows_collected = 0usize;

        info!(
            start_url = %start_url,
            max_pages = limits.max_pages,
            max_empty = limits.max_consecutive_empty_pages,
            "Starting paginated scrape"
        );

        let stop_reason = loop {
            let Some(url) = state.current_url.clone() else {
                break StopReason::NoNextLink;
            };
            if state.page_count >= limits.max_pages {
                break StopReason::PageBudgetExhausted;
            }
            if state.consecutive_empty_pages >= limits.max_consecutive_empty_pages {
                break StopReason::EmptyPageLimit;
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if state.visited_urls.contains(&url) {
                break StopReason::CycleDetected { url };
            }
            if is_degenerate_url(&url) {
                break StopReason::DegenerateUrl { url };
            }

            if state.page_count > 0 && !pause(limits, cancel).await {
                break StopReason::Cancelled;
            }

            state.visited_urls.insert(url.clone());
            state.page_count += 1;

            let page = match self.fetcher.fetch(&url, &self.options).await {
                Ok(page) => page,
                Err(_) if cancel.is_cancelled() => break StopReason::Cancelled,
                Err(error) if state.page_count == 1 => {
                    warn!(url = %url, error = %error, "First page failed, nothing to return");
                    return Err(ScrapeError::FirstPageFailed { url, source: error });
                }
                Err(error) => {
                    warn!(
                        url = %url,
                        page = state.page_count,
                        rows = rows_collected,
                        blocked = error.is_block(),
                        error = %error,
                        "Fetch failed, returning partial result"
                    );
                    break StopReason::FetchFailed { error };
                }
            };

            if page.final_url != url {
                debug!(url = %url, final_url = %page.final_url, "Followed redirect");
                if state.visited_urls.contains(&page.final_url) {
                    break StopReason::CycleDetected { url: page.final_url };
                }
                state.visited_urls.insert(page.final_url.clone());
            }

            let parsed = parse_page(&page.body, &page.final_url, rule);

            info!(
                page = state.page_count,
                url = %url,
                rows = parsed.rows.len(),
                skipped = parsed.skipped_rows,
                has_next = parsed.next_url.is_some(),
                "Page scraped"
            );

            if parsed.rows.is_empty() {
                state.consecutive_empty_pages += 1;
                if !parsed.table_found {
                    debug!(url = %url, "Malformed page counted as empty");
                }
            } else {
                state.consecutive_empty_pages = 0;
            }

            state.current_url = parsed.next_url;

            let count = parsed.rows.len();
            if !sink(parsed.rows) {
                break StopReason::ConsumerClosed;
            }
            rows_collected += count;
        };

        let report = ScrapeReport {
            start_url: start_url.to_string(),
            pages_fetched: state.page_count,
            rows_collected,
            stop_reason,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            pages = report.pages_fetched,
            rows = report.rows_collected,
            visited = state.visited_urls.len(),
            stop_reason = report.stop_reason.as_str(),
            partial = report.is_partial(),
            "Paginated scrape finished"
        );

        Ok(report)
    }
}

/// Validate the inputs of a run and compile its rule
fn prepare(start_url: &str, rule: &RowRule, limits: &ScrapeLimits) -> Result<CompiledRule, ScrapeError> {
    let parsed = Url::parse(start_url).map_err(|e| ScrapeError::InvalidStartUrl {
        url: start_url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ScrapeError::InvalidStartUrl {
            url: start_url.to_string(),
            message: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    limits.validate()?;
    Ok(rule.compile()?)
}

/// Sleep between pages; `false` if cancelled meanwhile
async fn pause(limits: &ScrapeLimits, cancel: &CancellationToken) -> bool {
    let delay = limits.page_delay + random_jitter(limits.page_delay_jitter);
    if delay.is_zero() {
        return true;
    }
    debug!(delay_ms = delay.as_millis() as u64, "Pausing before next page");
    tokio::select! {
        _ = sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
