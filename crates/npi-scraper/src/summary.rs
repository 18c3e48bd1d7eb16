//! Directory landing-page summaries.
//!
//! The landing page groups provider counts into headed blocks ("Providers
//! by State", "Providers by Taxonomy", ...), each holding one or more small
//! tables of `name / providers / percent` rows. Single page, no pagination.

use crate::extract::{element_text, resolve_link, ExtractError};
use crate::fetch::{FetchOptions, Fetcher};
use crate::scraper::ScrapeError;
use scraper::{Html, Selector};
use shared::config::DirectoryConfig;
use shared::{SummaryRow, SummarySection};
use std::sync::Arc;
use tracing::info;

/// Where the summary blocks live and which ones to skip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRule {
    pub section_selector: String,
    pub excluded_headings: Vec<String>,
    pub base_origin: String,
}

impl Default for SummaryRule {
    fn default() -> Self {
        Self::from(&DirectoryConfig::default())
    }
}

impl From<&DirectoryConfig> for SummaryRule {
    fn from(config: &DirectoryConfig) -> Self {
        Self {
            section_selector: config.summary_section_selector.clone(),
            excluded_headings: config.excluded_headings.clone(),
            base_origin: config.base_origin.clone(),
        }
    }
}

/// Extract every headed summary section from `html`
pub fn extract_sections(html: &str, rule: &SummaryRule) -> Result<Vec<SummarySection>, ExtractError> {
    let section_sel = selector(&rule.section_selector)?;
    let heading_sel = selector("h3")?;
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let anchor_sel = selector("a")?;

    let document = Html::parse_document(html);

    let sections = document
        .select(&section_sel)
        .filter_map(|section| {
            let heading = section
                .select(&heading_sel)
                .next()
                .map(|h| element_text(&h))
                .unwrap_or_default();

            if heading.is_empty()
                || rule
                    .excluded_headings
                    .iter()
                    .any(|excluded| excluded.trim().eq_ignore_ascii_case(&heading))
            {
                return None;
            }

            let tables: Vec<Vec<SummaryRow>> = section
                .select(&table_sel)
                .map(|table| {
                    table
                        .select(&row_sel)
                        .filter_map(|tr| {
                            let cells: Vec<_> = tr.select(&cell_sel).collect();
                            if cells.len() < 3 {
                                return None;
                            }
                            let href = cells[0]
                                .select(&anchor_sel)
                                .next()
                                .and_then(|a| a.value().attr("href"))
                                .filter(|href| !href.trim().is_empty())
                                .unwrap_or("#");

                            Some(SummaryRow {
                                text: element_text(&cells[0]),
                                link: resolve_link(href, &rule.base_origin),
                                providers: element_text(&cells[1]),
                                percent: element_text(&cells[2]),
                            })
                        })
                        .collect()
                })
                .filter(|rows: &Vec<SummaryRow>| !rows.is_empty())
                .collect();

            (!tables.is_empty()).then_some(SummarySection { heading, tables })
        })
        .collect();

    Ok(sections)
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
        selector: css.to_string(),
        message: format!("{e:?}"),
    })
}

/// Fetches and extracts the landing-page summaries
pub struct SummaryScraper<F> {
    fetcher: Arc<F>,
    options: FetchOptions,
}

impl<F: Fetcher> SummaryScraper<F> {
    pub fn new(fetcher: Arc<F>, options: FetchOptions) -> Self {
        Self { fetcher, options }
    }

    /// Fetch `url` once and return its summary sections
    pub async fn scrape(&self, url: &str, rule: &SummaryRule) -> Result<Vec<SummarySection>, ScrapeError> {
        let page = self.fetcher.fetch(url, &self.options).await?;
        let sections = extract_sections(&page.body, rule)?;

        info!(
            url = %url,
            sections = sections.len(),
            rows = sections.iter().map(SummarySection::row_count).sum::<usize>(),
            "Summary scraped"
        );

        Ok(sections)
    }
}
