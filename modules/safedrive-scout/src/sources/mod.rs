//! Source adapters: one per configured news outlet, each turning a page number
//! into raw [`CandidateRecord`]s.

mod feed;
mod listing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use safedrive_common::{CandidateRecord, CrawlConfig, SourceConfig, SourceKind};

pub use feed::{parse_feed, FeedAdapter};
pub use listing::{extract_listing, ListingAdapter};

const PAGE_PLACEHOLDER: &str = "{page}";

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch one page of reports. An empty vec means the page had nothing usable.
    async fn fetch_page(&self, page: u32) -> Result<Vec<CandidateRecord>>;
}

/// Whether the URL template addresses more than one page.
pub fn is_paginated(template: &str) -> bool {
    template.contains(PAGE_PLACEHOLDER)
}

/// URL for `page`. Templates without a `{page}` placeholder only have page 1.
pub fn page_url(template: &str, page: u32) -> Option<String> {
    if is_paginated(template) {
        Some(template.replace(PAGE_PLACEHOLDER, &page.to_string()))
    } else if page == 1 {
        Some(template.to_string())
    } else {
        None
    }
}

pub fn http_client(crawl: &CrawlConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(crawl.request_timeout_secs))
        .user_agent(crawl.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")
}

/// GET a page body, failing on non-2xx statuses.
pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("{url} returned an error status"))?;
    resp.text()
        .await
        .with_context(|| format!("Failed to read body of {url}"))
}

pub fn build_adapter(
    source: &SourceConfig,
    client: reqwest::Client,
) -> Arc<dyn SourceAdapter> {
    match source.kind {
        SourceKind::Feed => Arc::new(FeedAdapter::new(&source.name, &source.url, client)),
        SourceKind::Listing => Arc::new(ListingAdapter::new(source, client)),
    }
}
