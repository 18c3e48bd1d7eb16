//! Data models for the provider directory.
//!
//! These are the records handed to callers once a page has been parsed.
//! They are plain owned values: nothing in them refers back to the page
//! they were extracted from.

use serde::{Deserialize, Serialize};

/// One provider listed in a directory search-result table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRow {
    /// Provider display name (anchor text of the first column)
    pub name: String,
    /// Absolute URL of the provider's profile page
    pub profile_link: String,
    pub address: String,
    pub taxonomy: String,
    /// Enumeration date as printed by the site (not validated)
    pub enumeration_date: String,
}

/// One row of a landing-page summary table (e.g. providers per state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Label of the first column
    pub text: String,
    /// Absolute URL the label links to
    pub link: String,
    /// Provider count column, verbatim
    pub providers: String,
    /// Percentage column, verbatim
    pub percent: String,
}

/// A headed block of summary tables on the directory landing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    pub heading: String,
    /// Each inner vector is one table; empty tables are never stored
    pub tables: Vec<Vec<SummaryRow>>,
}

impl SummarySection {
    /// Total number of rows across all tables in the section
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }
}
