//! Scraper for the opennpi.com healthcare-provider directory.
//!
//! Follows the directory's "Next Page" pagination to collect provider rows
//! from its search-result tables, and reads the landing-page summaries.

pub mod extract;
pub mod fetch;
pub mod scraper;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_support;

pub use extract::{CompiledRule, ExtractError, ExtractedRow, ParsedPage, RowRule};
pub use fetch::{FetchError, FetchOptions, Fetcher, HttpFetcher, RetryPolicy};
pub use crate::scraper::{PaginatedTableScraper, ScrapeError, ScrapeLimits, ScrapeOutcome, ScrapeReport, StopReason};
pub use summary::{SummaryRule, SummaryScraper};
