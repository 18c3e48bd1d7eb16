//! HTTP fetching for directory pages.
//!
//! The scraper only talks to the [`Fetcher`] trait; [`HttpFetcher`] is the
//! reqwest-backed implementation with user-agent/proxy rotation and a single
//! [`RetryPolicy`].

pub mod client;
pub mod retry;
pub mod types;

pub use client::HttpFetcher;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use types::*;
