// RSS/Atom feed adapter. Plain XML over reqwest, parsed with feed-rs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use safedrive_common::CandidateRecord;

use super::listing::clean_text;
use super::{fetch_text, page_url, SourceAdapter};

pub struct FeedAdapter {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl FeedAdapter {
    pub fn new(name: &str, url: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
        }
    }
}

/// Parse a feed body into candidate records. Entries without a link are skipped.
pub fn parse_feed(body: &[u8], source: &str) -> Result<Vec<CandidateRecord>> {
    let feed = feed_rs::parser::parse(body).context("Failed to parse RSS/Atom feed")?;

    let records = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;
            let title = entry.title.map(|t| clean_text(&t.content)).unwrap_or_default();
            let summary = entry
                .summary
                .map(|s| clean_text(&s.content))
                .unwrap_or_default();
            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));

            Some(CandidateRecord {
                title,
                link,
                summary,
                source: source.to_string(),
                published_at,
            })
        })
        .collect();

    Ok(records)
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<CandidateRecord>> {
        let Some(url) = page_url(&self.url, page) else {
            return Ok(Vec::new());
        };
        let body = fetch_text(&self.client, &url).await?;
        let records = parse_feed(body.as_bytes(), &self.name)?;
        debug!(source = self.name.as_str(), page, items = records.len(), "Parsed feed page");
        Ok(records)
    }
}
