// HTML listing adapter: pulls article anchors out of an outlet's index pages.
// Regex-based, no DOM. Index pages are shallow and only anchors matter.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use safedrive_common::{CandidateRecord, SourceConfig};

use super::{fetch_text, page_url, SourceAdapter};

/// `<a ... href="...">inner</a>`, across lines.
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a\s*>"#)
        .expect("valid regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

pub struct ListingAdapter {
    name: String,
    url: String,
    link_filter: Option<String>,
    min_title_len: usize,
    client: reqwest::Client,
}

impl ListingAdapter {
    pub fn new(source: &SourceConfig, client: reqwest::Client) -> Self {
        Self {
            name: source.name.clone(),
            url: source.url.clone(),
            link_filter: source.link_filter.clone(),
            min_title_len: source.min_title_len,
            client,
        }
    }
}

/// Strip tags, decode common entities and collapse whitespace.
pub(crate) fn clean_text(html: &str) -> String {
    let text = TAG_RE.replace_all(html, "");
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve(href: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if href.starts_with("http://") || href.starts_with("https://") {
        url::Url::parse(href).ok()?
    } else {
        base?.join(href).ok()?
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Article candidates on a listing page: anchors whose link contains
/// `link_filter` (case-insensitive) and whose text has at least
/// `min_title_len` characters. First occurrence of each link wins.
pub fn extract_listing(
    html: &str,
    base_url: &str,
    source: &str,
    link_filter: Option<&str>,
    min_title_len: usize,
) -> Vec<CandidateRecord> {
    let base = url::Url::parse(base_url).ok();
    let filter = link_filter.map(str::to_lowercase);
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for cap in ANCHOR_RE.captures_iter(html) {
        let Some(link) = resolve(&cap[1], base.as_ref()) else {
            continue;
        };
        if let Some(filter) = &filter {
            if !link.to_lowercase().contains(filter.as_str()) {
                continue;
            }
        }
        let title = clean_text(&cap[2]);
        if title.chars().count() < min_title_len {
            continue;
        }
        if seen.insert(link.clone()) {
            records.push(CandidateRecord::new(title, link, source));
        }
    }

    records
}

#[async_trait]
impl SourceAdapter for ListingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<CandidateRecord>> {
        let Some(url) = page_url(&self.url, page) else {
            return Ok(Vec::new());
        };
        let html = fetch_text(&self.client, &url).await?;
        let records = extract_listing(
            &html,
            &url,
            &self.name,
            self.link_filter.as_deref(),
            self.min_title_len,
        );
        debug!(source = self.name.as_str(), page, links = records.len(), "Parsed listing page");
        Ok(records)
    }
}
