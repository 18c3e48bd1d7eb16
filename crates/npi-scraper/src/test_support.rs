//! In-memory fetcher and page builders for unit tests.

use crate::fetch::{FetchError, FetchOptions, Fetcher, PageFetchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Search-result page in the directory's markup.
///
/// Each row is `(name, href)`; the remaining columns are filled in.
pub(crate) fn provider_page(rows: &[(&str, &str)], next: Option<&str>) -> String {
    let body: String = rows
        .iter()
        .enumerate()
        .map(|(i, (name, href))| {
            format!(
                r#"<tr><td><a href="{href}">{name}</a></td><td>{n} Main St, Springfield</td><td>Family Medicine</td><td>2010-01-{day:02}</td></tr>"#,
                n = i + 1,
                day = i + 1,
            )
        })
        .collect();

    let pagination = next
        .map(|href| {
            format!(
                r#"<ul class="pagination">
                     <li class="page-item"><a class="page-link" href="/provider">Previous Page</a></li>
                     <li class="page-item mx-auto"><a class="page-link" href="{href}">Next Page</a></li>
                   </ul>"#
            )
        })
        .unwrap_or_default();

    format!(
        r#"<html><body>
             <div id="search-result">
               <table>
                 <thead><tr><th>Provider Name</th><th>Address</th><th>Taxonomy</th><th>Enumeration Date</th></tr></thead>
                 <tbody>{body}</tbody>
               </table>
             </div>
             {pagination}
           </body></html>"#
    )
}

enum Canned {
    Page { final_url: String, body: String },
    Fail(FetchError),
}

/// Fetcher serving canned pages keyed by URL; unknown URLs are 404s
#[derive(Default)]
pub(crate) struct MockFetcher {
    pages: HashMap<String, Canned>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, url: &str, body: String) -> Self {
        self.pages.insert(
            url.to_string(),
            Canned::Page {
                final_url: url.to_string(),
                body,
            },
        );
        self
    }

    pub(crate) fn redirect(mut self, url: &str, final_url: &str, body: String) -> Self {
        self.pages.insert(
            url.to_string(),
            Canned::Page {
                final_url: final_url.to_string(),
                body,
            },
        );
        self
    }

    pub(crate) fn fail(mut self, url: &str, error: FetchError) -> Self {
        self.pages.insert(url.to_string(), Canned::Fail(error));
        self
    }

    /// URLs fetched so far, in order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<PageFetchResult, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());

        match self.pages.get(url) {
            Some(Canned::Page { final_url, body }) => Ok(PageFetchResult {
                status: 200,
                body: body.clone(),
                final_url: final_url.clone(),
            }),
            Some(Canned::Fail(error)) => Err(error.clone()),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
