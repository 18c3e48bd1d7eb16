//! HTML table extraction.
//!
//! Pure functions over page markup: they take the document text (or an
//! already-parsed [`Html`]) and return owned values. Nothing here performs
//! I/O, and no parsed DOM outlives the call that created it.

use scraper::{ElementRef, Html, Selector};
use shared::config::DirectoryConfig;
use shared::ProviderRow;
use thiserror::Error;
use tracing::debug;

/// Extraction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("invalid CSS selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Which table to read and what a valid row looks like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRule {
    /// Selector of the result table(s)
    pub table_selector: String,
    /// Row selector, relative to a matched table
    pub row_selector: String,
    /// Cell selector, relative to a row
    pub cell_selector: String,
    /// Rows with fewer cells are dropped
    pub min_cells: usize,
    /// First-field texts that identify a repeated header row
    pub header_labels: Vec<String>,
    /// Selector of the pagination controls
    pub pagination_selector: String,
    /// Visible label of the "next page" control
    pub next_label: String,
    /// Origin prepended to relative links
    pub base_origin: String,
}

impl Default for RowRule {
    fn default() -> Self {
        Self::from(&DirectoryConfig::default())
    }
}

impl From<&DirectoryConfig> for RowRule {
    fn from(config: &DirectoryConfig) -> Self {
        Self {
            table_selector: config.table_selector.clone(),
            row_selector: "tbody tr".to_string(),
            cell_selector: "td".to_string(),
            min_cells: 4,
            header_labels: config.header_labels.clone(),
            pagination_selector: config.pagination_selector.clone(),
            next_label: config.next_label.clone(),
            base_origin: config.base_origin.clone(),
        }
    }
}

impl RowRule {
    /// Parse every selector once
    pub fn compile(&self) -> Result<CompiledRule, ExtractError> {
        Ok(CompiledRule {
            table: parse_selector(&self.table_selector)?,
            row: parse_selector(&self.row_selector)?,
            cell: parse_selector(&self.cell_selector)?,
            anchor: parse_selector("a")?,
            pagination: parse_selector(&self.pagination_selector)?,
            rule: self.clone(),
        })
    }
}

/// A [`RowRule`] with its selectors parsed
#[derive(Debug, Clone)]
pub struct CompiledRule {
    table: Selector,
    row: Selector,
    cell: Selector,
    anchor: Selector,
    pagination: Selector,
    rule: RowRule,
}

impl CompiledRule {
    /// Whether `field` repeats one of the header labels
    fn is_header(&self, field: &str) -> bool {
        let field = field.trim();
        self.rule
            .header_labels
            .iter()
            .any(|label| label.trim().eq_ignore_ascii_case(field))
    }
}

/// One table row as extracted, before validation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedRow {
    /// Whitespace-normalised text of each cell, in document order
    pub cells: Vec<String>,
    /// Text of the first cell's anchor
    pub link_text: Option<String>,
    /// Raw `href` of the first cell's anchor
    pub link: Option<String>,
}

impl ExtractedRow {
    /// The row's identifying field: anchor text, else first cell text
    pub fn first_field(&self) -> &str {
        self.link_text
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| self.cells.first().map(String::as_str))
            .unwrap_or("")
    }
}

/// Result of parsing one fetched page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Valid rows with resolved links
    pub rows: Vec<ProviderRow>,
    /// Resolved URL of the next page, if any
    pub next_url: Option<String>,
    /// Whether the result table was present at all
    pub table_found: bool,
    /// Rows dropped as incomplete or header duplicates
    pub skipped_rows: usize,
}

/// Extract all rows of the matched tables from `html`
pub fn extract_rows(html: &str, rule: &CompiledRule) -> Vec<ExtractedRow> {
    let document = Html::parse_document(html);
    rows_in(&document, rule)
}

/// Extract the raw `href` of the enabled "next page" control in `html`
pub fn extract_next_link(html: &str, rule: &CompiledRule) -> Option<String> {
    let document = Html::parse_document(html);
    next_link_in(&document, rule)
}

/// Parse a page body into validated rows and the resolved next URL.
///
/// `page_url` is the URL the body was served from; query-only and
/// path-relative links (rows and next page alike) are resolved against it.
pub fn parse_page(body: &str, page_url: &str, rule: &CompiledRule) -> ParsedPage {
    let document = Html::parse_document(body);
    let table_found = document.select(&rule.table).next().is_some();
    let extracted = rows_in(&document, rule);
    let total = extracted.len();

    let rows: Vec<ProviderRow> = extracted
        .into_iter()
        .filter(|row| row.cells.len() >= rule.rule.min_cells)
        .filter(|row| !rule.is_header(row.first_field()))
        .map(|row| to_provider_row(row, &rule.rule.base_origin, page_url))
        .collect();

    let next_url = next_link_in(&document, rule)
        .map(|href| resolve_against(&href, &rule.rule.base_origin, Some(page_url)));

    if !table_found {
        debug!(url = %page_url, "Result table not found on page");
    }

    ParsedPage {
        skipped_rows: total - rows.len(),
        rows,
        next_url,
        table_found,
    }
}

/// Resolve a link against the directory origin.
///
/// Links that already carry a scheme are returned unchanged, protocol-relative
/// links take the origin's scheme, everything else is appended to the origin.
pub fn resolve_link(link: &str, base_origin: &str) -> String {
    let link = link.trim();
    if has_scheme(link) {
        return link.to_string();
    }
    if let Some(rest) = link.strip_prefix("//") {
        let scheme = base_origin.split("://").next().unwrap_or("https");
        return format!("{scheme}://{rest}");
    }
    if link.starts_with('/') {
        format!("{}{}", base_origin.trim_end_matches('/'), link)
    } else {
        format!("{base_origin}{link}")
    }
}

/// Like [`resolve_link`], but query-only and path-relative links are joined
/// onto `page_url` when one is known.
pub fn resolve_against(link: &str, base_origin: &str, page_url: Option<&str>) -> String {
    let trimmed = link.trim();
    let relative_to_page = !trimmed.is_empty()
        && !has_scheme(trimmed)
        && !trimmed.starts_with('/')
        && !trimmed.starts_with('#');

    if relative_to_page {
        if let Some(joined) = page_url
            .and_then(|page| url::Url::parse(page).ok())
            .and_then(|page| page.join(trimmed).ok())
        {
            return joined.to_string();
        }
    }
    resolve_link(trimmed, base_origin)
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"
fn has_scheme(link: &str) -> bool {
    let Some((scheme, _)) = link.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{e:?}"),
    })
}

/// Collapse runs of whitespace (cells often contain `<br>` and indentation)
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn rows_in(document: &Html, rule: &CompiledRule) -> Vec<ExtractedRow> {
    document
        .select(&rule.table)
        .flat_map(|table| table.select(&rule.row))
        .map(|tr| {
            let cells: Vec<ElementRef<'_>> = tr.select(&rule.cell).collect();
            let anchor = cells
                .first()
                .and_then(|cell| cell.select(&rule.anchor).next());

            ExtractedRow {
                cells: cells.iter().map(element_text).collect(),
                link_text: anchor.as_ref().map(element_text),
                link: anchor
                    .and_then(|a| a.value().attr("href"))
                    .map(|href| href.trim().to_string()),
            }
        })
        .collect()
}

fn next_link_in(document: &Html, rule: &CompiledRule) -> Option<String> {
    let label = rule.rule.next_label.trim();
    document
        .select(&rule.pagination)
        .filter(|control| element_text(control).eq_ignore_ascii_case(label))
        .filter(|control| !is_disabled(control))
        .find_map(|control| control.value().attr("href").map(|href| href.trim().to_string()))
        // `#` and other fragment-only hrefs go nowhere
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
}

/// A control is disabled when it, or its list item, says so
fn is_disabled(control: &ElementRef<'_>) -> bool {
    let marked = |el: &ElementRef<'_>| {
        el.value().classes().any(|class| class == "disabled")
            || el.value().attr("aria-disabled") == Some("true")
    };

    marked(control) || control.parent().and_then(ElementRef::wrap).is_some_and(|p| marked(&p))
}

fn to_provider_row(row: ExtractedRow, base_origin: &str, page_url: &str) -> ProviderRow {
    let name = row.first_field().to_string();
    let link = row.link.as_deref().filter(|l| !l.is_empty()).unwrap_or("#");
    let profile_link = resolve_against(link, base_origin, Some(page_url));

    let mut cells = row.cells.into_iter().skip(1);
    ProviderRow {
        name,
        profile_link,
        address: cells.next().unwrap_or_default(),
        taxonomy: cells.next().unwrap_or_default(),
        enumeration_date: cells.next().unwrap_or_default(),
    }
}
