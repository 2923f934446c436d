use std::fmt;

use safedrive_common::{DedupOutcome, RejectReason};

/// Counts for one fetched page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub fetched: u64,
    pub unclassified: u64,
    pub created: u64,
    pub merged: u64,
    /// Matched an incident that already lists this source; nothing written.
    pub already_attached: u64,
    pub duplicate_links: u64,
    pub storage_errors: u64,
    /// The adapter failed; the page counts as empty.
    pub fetch_failed: bool,
}

impl PageStats {
    pub fn failed() -> Self {
        Self {
            fetch_failed: true,
            ..Default::default()
        }
    }

    /// Nothing came back from the source, either because the page was empty
    /// or because fetching it failed.
    pub fn is_empty(&self) -> bool {
        self.fetch_failed || self.fetched == 0
    }

    pub fn record(&mut self, outcome: &DedupOutcome) {
        match outcome {
            DedupOutcome::Created { .. } => self.created += 1,
            DedupOutcome::Merged { appended: true, .. } => self.merged += 1,
            DedupOutcome::Merged { appended: false, .. } => self.already_attached += 1,
            DedupOutcome::Rejected {
                reason: RejectReason::DuplicateLink,
            } => self.duplicate_links += 1,
            DedupOutcome::Rejected {
                reason: RejectReason::StorageError,
            } => self.storage_errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the configured last page.
    Completed,
    /// Too many consecutive empty pages.
    EmptyPages,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::EmptyPages => write!(f, "too many empty pages"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub first_page: u32,
    pub pages: u32,
    pub failed_pages: u32,
    pub totals: PageStats,
    pub stop: StopReason,
}

impl SourceSummary {
    pub fn new(source: &str, first_page: u32) -> Self {
        Self {
            source: source.to_string(),
            first_page,
            pages: 0,
            failed_pages: 0,
            totals: PageStats::default(),
            stop: StopReason::Completed,
        }
    }

    pub fn add(&mut self, page: &PageStats) {
        self.pages += 1;
        if page.fetch_failed {
            self.failed_pages += 1;
        }
        let t = &mut self.totals;
        t.fetched += page.fetched;
        t.unclassified += page.unclassified;
        t.created += page.created;
        t.merged += page.merged;
        t.already_attached += page.already_attached;
        t.duplicate_links += page.duplicate_links;
        t.storage_errors += page.storage_errors;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub sources: Vec<SourceSummary>,
    pub cancelled: bool,
}

impl CrawlSummary {
    pub fn created(&self) -> u64 {
        self.sources.iter().map(|s| s.totals.created).sum()
    }

    pub fn merged(&self) -> u64 {
        self.sources.iter().map(|s| s.totals.merged).sum()
    }
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Crawl Complete ===")?;
        for s in &self.sources {
            writeln!(f, "{} (from page {}, {} pages, {} failed, {})", s.source, s.first_page, s.pages, s.failed_pages, s.stop)?;
            writeln!(f, "  Fetched:      {}", s.totals.fetched)?;
            writeln!(f, "  Unclassified: {}", s.totals.unclassified)?;
            writeln!(f, "  New:          {}", s.totals.created)?;
            writeln!(f, "  Merged:       {}", s.totals.merged)?;
            writeln!(f, "  Seen source:  {}", s.totals.already_attached)?;
            writeln!(f, "  Duplicates:   {}", s.totals.duplicate_links)?;
            writeln!(f, "  Store errors: {}", s.totals.storage_errors)?;
        }
        writeln!(f, "\nNew incidents:     {}", self.created())?;
        writeln!(f, "Alternate sources: {}", self.merged())?;
        if self.cancelled {
            writeln!(f, "Interrupted.")?;
        }
        Ok(())
    }
}
