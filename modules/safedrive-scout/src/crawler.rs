//! Resumable crawl driver.
//!
//! Sources run one at a time in configured priority order. The unit of work is
//! one page: fetch, classify, deduplicate, then checkpoint the source cursor.
//! A restart resumes from the last saved checkpoint.
//!
//! [`Crawler::run_recent`] is the daily mode: it re-reads the first pages of
//! every source, where new stories appear, and leaves the checkpoints alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use safedrive_common::{CandidateRecord, CrawlConfig, SourceConfig};

use crate::classifier::classify;
use crate::dedup::Deduplicator;
use crate::progress::{ProgressState, ProgressTracker};
use crate::sources::{build_adapter, is_paginated, SourceAdapter};
use crate::stats::{CrawlSummary, PageStats, SourceSummary, StopReason};

pub struct CrawlSource {
    pub adapter: Arc<dyn SourceAdapter>,
    /// Last page to fetch, inclusive.
    pub max_pages: u32,
    /// Pause between consecutive page fetches.
    pub delay: Duration,
}

impl CrawlSource {
    pub fn new(adapter: Arc<dyn SourceAdapter>, max_pages: u32, delay: Duration) -> Self {
        Self {
            adapter,
            max_pages,
            delay,
        }
    }

    /// Build from configuration. Unpaginated URLs only have a first page.
    pub fn from_config(source: &SourceConfig, client: reqwest::Client) -> Self {
        let max_pages = if is_paginated(&source.url) {
            source.max_pages
        } else {
            source.max_pages.min(1)
        };
        Self::new(
            build_adapter(source, client),
            max_pages,
            Duration::from_secs(source.delay_secs),
        )
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

pub struct Crawler {
    sources: Vec<CrawlSource>,
    dedup: Arc<Deduplicator>,
    tracker: ProgressTracker,
    max_empty_pages: u32,
    cancel: Arc<AtomicBool>,
}

impl Crawler {
    pub fn new(
        sources: Vec<CrawlSource>,
        dedup: Arc<Deduplicator>,
        tracker: ProgressTracker,
        crawl: &CrawlConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sources,
            dedup,
            tracker,
            max_empty_pages: crawl.max_empty_pages.max(1),
            cancel,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub async fn run(&self) -> CrawlSummary {
        let mut state = self.tracker.load();
        let mut summary = CrawlSummary::default();

        info!(
            sources = self.sources.len(),
            progress = %self.tracker.path().display(),
            "Crawl starting"
        );

        for source in &self.sources {
            if self.is_cancelled() {
                break;
            }
            summary.sources.push(self.crawl_source(source, &mut state).await);
        }

        summary.cancelled = self.is_cancelled();
        summary
    }

    /// Fetch pages `1..=pages` of every source (capped at each source's last
    /// page) without loading or saving progress.
    pub async fn run_recent(&self, pages: u32) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        info!(sources = self.sources.len(), pages, "Recent crawl starting");

        for source in &self.sources {
            if self.is_cancelled() {
                break;
            }
            summary.sources.push(self.crawl_recent(source, pages).await);
        }

        summary.cancelled = self.is_cancelled();
        summary
    }

    async fn crawl_recent(&self, source: &CrawlSource, pages: u32) -> SourceSummary {
        let name = source.name();
        let mut summary = SourceSummary::new(name, 1);
        let last = pages.min(source.max_pages);

        for page in 1..=last {
            if self.is_cancelled() {
                info!(source = name, page, "Crawl cancelled");
                summary.stop = StopReason::Cancelled;
                break;
            }
            let stats = self.fetch_and_process(source, page).await;
            summary.add(&stats);

            if page < last && !source.delay.is_zero() {
                tokio::time::sleep(source.delay).await;
            }
        }

        summary
    }

    async fn crawl_source(&self, source: &CrawlSource, state: &mut ProgressState) -> SourceSummary {
        let name = source.name().to_string();
        let first_page = state.entry(name.clone()).or_default().page;
        let mut summary = SourceSummary::new(&name, first_page);

        if first_page > source.max_pages {
            info!(source = name.as_str(), page = first_page, max_pages = source.max_pages, "Source already crawled to its last page");
            return summary;
        }
        info!(source = name.as_str(), page = first_page, max_pages = source.max_pages, "Crawling source");

        let mut empty_streak = 0u32;
        let mut page = first_page;
        while page <= source.max_pages {
            if self.is_cancelled() {
                info!(source = name.as_str(), page, "Crawl cancelled");
                summary.stop = StopReason::Cancelled;
                break;
            }

            let stats = self.fetch_and_process(source, page).await;

            if stats.is_empty() {
                empty_streak += 1;
            } else {
                empty_streak = 0;
            }

            let cursor = state.entry(name.clone()).or_default();
            cursor.page = page + 1;
            cursor.total_collected += stats.created;
            cursor.total_alternatives += stats.merged;
            if let Err(e) = self.tracker.save(state) {
                warn!(source = name.as_str(), page, error = %e, "Failed to save progress");
            }
            summary.add(&stats);

            if empty_streak >= self.max_empty_pages {
                warn!(source = name.as_str(), page, empty_streak, "Too many consecutive empty pages, moving to next source");
                summary.stop = StopReason::EmptyPages;
                break;
            }

            page += 1;
            if page <= source.max_pages && !source.delay.is_zero() {
                tokio::time::sleep(source.delay).await;
            }
        }

        summary
    }

    async fn fetch_and_process(&self, source: &CrawlSource, page: u32) -> PageStats {
        let name = source.name();
        let stats = match source.adapter.fetch_page(page).await {
            Ok(records) => self.process_page(records).await,
            Err(e) => {
                warn!(source = name, page, error = %e, "Page fetch failed");
                return PageStats::failed();
            }
        };
        info!(
            source = name,
            page,
            fetched = stats.fetched,
            created = stats.created,
            merged = stats.merged,
            already_attached = stats.already_attached,
            duplicates = stats.duplicate_links,
            errors = stats.storage_errors,
            unclassified = stats.unclassified,
            "Page processed"
        );
        stats
    }

    /// Classify and deduplicate one page of raw reports.
    pub async fn process_page(&self, records: Vec<CandidateRecord>) -> PageStats {
        let mut stats = PageStats::default();
        for candidate in records {
            stats.fetched += 1;
            match classify(candidate) {
                Some(record) => {
                    let outcome = self.dedup.submit(&record).await;
                    stats.record(&outcome);
                }
                None => stats.unclassified += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SourceProgress;
    use crate::testing::MockAdapter;
    use anyhow::Result;
    use async_trait::async_trait;
    use safedrive_common::DedupConfig;
    use safedrive_store::MemoryIncidentStore;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        path: std::path::PathBuf,
        store: Arc<MemoryIncidentStore>,
        cancel: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("progress.json");
            Self {
                _dir: dir,
                path,
                store: Arc::new(MemoryIncidentStore::new()),
                cancel: Arc::new(AtomicBool::new(false)),
            }
        }

        fn crawler(&self, sources: Vec<CrawlSource>, max_empty_pages: u32) -> Crawler {
            let names = sources.iter().map(|s| s.name().to_string()).collect();
            let crawl = CrawlConfig {
                max_empty_pages,
                ..Default::default()
            };
            Crawler::new(
                sources,
                Arc::new(Deduplicator::new(self.store.clone(), DedupConfig::default())),
                ProgressTracker::new(&self.path, names),
                &crawl,
                self.cancel.clone(),
            )
        }

        fn progress(&self) -> ProgressState {
            ProgressTracker::new(&self.path, Vec::new()).load()
        }
    }

    fn source(adapter: &Arc<MockAdapter>, max_pages: u32) -> CrawlSource {
        CrawlSource::new(adapter.clone(), max_pages, Duration::ZERO)
    }

    #[tokio::test]
    async fn crawls_pages_and_checkpoints_each_one() {
        let h = Harness::new();
        let extra = Arc::new(
            MockAdapter::new("Extra")
                .on_page(1, &["Motorista é assaltado em Copacabana", "Show de rock na praia"])
                .on_page(2, &["Carro furtado no Centro durante a madrugada"]),
        );

        let summary = h.crawler(vec![source(&extra, 2)], 30).run().await;

        assert_eq!(extra.fetched(), vec![1, 2]);
        let s = &summary.sources[0];
        assert_eq!(s.pages, 2);
        assert_eq!(s.totals.fetched, 3);
        assert_eq!(s.totals.unclassified, 1);
        assert_eq!(s.totals.created, 2);
        assert_eq!(s.stop, StopReason::Completed);
        assert_eq!(h.store.len(), 2);

        assert_eq!(
            h.progress()["Extra"],
            SourceProgress {
                page: 3,
                total_collected: 2,
                total_alternatives: 0,
            }
        );
    }

    #[tokio::test]
    async fn resumes_from_saved_page() {
        let h = Harness::new();
        let mut saved = ProgressState::new();
        saved.insert(
            "Extra".into(),
            SourceProgress {
                page: 3,
                total_collected: 10,
                total_alternatives: 1,
            },
        );
        ProgressTracker::new(&h.path, Vec::new()).save(&saved).unwrap();

        let extra = Arc::new(
            MockAdapter::new("Extra")
                .on_page(1, &["Assalto em Botafogo deixa feridos"])
                .on_page(3, &["Assalto em Madureira assusta moradores"])
                .on_page(4, &["Furto de cabos deixa bairro sem luz em Bangu"]),
        );
        let summary = h.crawler(vec![source(&extra, 4)], 30).run().await;

        assert_eq!(extra.fetched(), vec![3, 4]);
        assert_eq!(summary.sources[0].first_page, 3);
        let progress = h.progress()["Extra"];
        assert_eq!(progress.page, 5);
        assert_eq!(progress.total_collected, 12);
        assert_eq!(progress.total_alternatives, 1);
    }

    #[tokio::test]
    async fn finished_source_is_skipped() {
        let h = Harness::new();
        let mut saved = ProgressState::new();
        saved.insert(
            "Extra".into(),
            SourceProgress {
                page: 6,
                ..Default::default()
            },
        );
        ProgressTracker::new(&h.path, Vec::new()).save(&saved).unwrap();

        let extra = Arc::new(MockAdapter::new("Extra"));
        let summary = h.crawler(vec![source(&extra, 5)], 30).run().await;
        assert!(extra.fetched().is_empty());
        assert_eq!(summary.sources[0].pages, 0);
    }

    #[tokio::test]
    async fn consecutive_empty_pages_abort_source_and_move_on() {
        let h = Harness::new();
        let extra = Arc::new(
            MockAdapter::new("Extra")
                .on_page(1, &["Assalto em Botafogo deixa feridos"])
                .failing_on(3, "HTTP 503"),
        );
        let g1 = Arc::new(MockAdapter::new("G1 Rio").on_page(1, &["Sequestro relâmpago em Niterói"]));

        let summary = h
            .crawler(vec![source(&extra, 100), source(&g1, 1)], 3)
            .run()
            .await;

        // Pages 2, 3 (error) and 4 are empty.
        assert_eq!(extra.fetched(), vec![1, 2, 3, 4]);
        assert_eq!(summary.sources[0].stop, StopReason::EmptyPages);
        assert_eq!(summary.sources[0].failed_pages, 1);
        assert_eq!(h.progress()["Extra"].page, 5);

        assert_eq!(g1.fetched(), vec![1]);
        assert_eq!(summary.sources[1].stop, StopReason::Completed);
    }

    #[tokio::test]
    async fn non_empty_page_resets_empty_streak() {
        let h = Harness::new();
        let extra = Arc::new(
            MockAdapter::new("Extra")
                .on_page(1, &["Assalto em Botafogo deixa feridos"])
                .on_page(3, &["Roubo de carga na Avenida Brasil"])
                .on_page(5, &["Furto de cabos em Bangu"]),
        );
        let summary = h.crawler(vec![source(&extra, 6)], 2).run().await;

        assert_eq!(extra.fetched(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(summary.sources[0].stop, StopReason::Completed);
    }

    #[tokio::test]
    async fn cancelled_before_start_fetches_nothing() {
        let h = Harness::new();
        h.cancel.store(true, Ordering::Relaxed);
        let extra = Arc::new(MockAdapter::new("Extra").on_page(1, &["Assalto em Botafogo"]));

        let summary = h.crawler(vec![source(&extra, 5)], 30).run().await;
        assert!(extra.fetched().is_empty());
        assert!(summary.cancelled);
        assert!(summary.sources.is_empty());
    }

    /// Raises the cancel flag once a given page has been served.
    struct CancelAfter {
        inner: MockAdapter,
        page: u32,
        cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SourceAdapter for CancelAfter {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn fetch_page(&self, page: u32) -> Result<Vec<CandidateRecord>> {
            let records = self.inner.fetch_page(page).await;
            if page == self.page {
                self.cancel.store(true, Ordering::Relaxed);
            }
            records
        }
    }

    #[tokio::test]
    async fn cancellation_stops_between_pages_with_checkpoint() {
        let h = Harness::new();
        let adapter = Arc::new(CancelAfter {
            inner: MockAdapter::new("Extra")
                .on_page(1, &["Assalto em Botafogo deixa feridos"])
                .on_page(2, &["Roubo de carga na Avenida Brasil"])
                .on_page(3, &["Furto de cabos em Bangu"]),
            page: 2,
            cancel: h.cancel.clone(),
        });
        let g1 = Arc::new(MockAdapter::new("G1 Rio"));
        let sources = vec![
            CrawlSource::new(adapter.clone(), 10, Duration::ZERO),
            source(&g1, 1),
        ];

        let summary = h.crawler(sources, 30).run().await;

        assert_eq!(adapter.inner.fetched(), vec![1, 2]);
        assert!(g1.fetched().is_empty());
        assert!(summary.cancelled);
        assert_eq!(summary.sources.len(), 1);
        assert_eq!(summary.sources[0].stop, StopReason::Cancelled);
        // Page 2 completed before the flag was seen, so resume starts at 3.
        assert_eq!(h.progress()["Extra"].page, 3);
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn same_story_from_two_sources_counts_as_alternative() {
        let h = Harness::new();
        let title = "Motorista é assaltado na Avenida Brasil em Bangu";
        let extra = Arc::new(MockAdapter::new("Extra").on_page(1, &[title]));
        let g1 = Arc::new(MockAdapter::new("G1 Rio").on_page(1, &[title]));

        let summary = h
            .crawler(vec![source(&extra, 1), source(&g1, 1)], 30)
            .run()
            .await;

        assert_eq!(summary.created(), 1);
        assert_eq!(summary.merged(), 1);
        let progress = h.progress();
        assert_eq!(progress["Extra"].total_collected, 1);
        assert_eq!(progress["G1 Rio"].total_alternatives, 1);

        let incident = &h.store.all()[0];
        assert_eq!(incident.fan_in, 2);
        assert_eq!(incident.locality.as_deref(), Some("Bangu"));
    }

    #[tokio::test]
    async fn repeated_headline_from_one_outlet_is_not_an_alternative() {
        let h = Harness::new();
        let title = "Motorista é assaltado na Avenida Brasil em Bangu";
        // Same story under two links on one listing page.
        let extra = Arc::new(MockAdapter::new("Extra").on_page(1, &[title, title]));

        let summary = h.crawler(vec![source(&extra, 1)], 30).run().await;

        assert_eq!(summary.created(), 1);
        assert_eq!(summary.merged(), 0);
        assert_eq!(summary.sources[0].totals.already_attached, 1);
        assert_eq!(h.progress()["Extra"].total_alternatives, 0);

        let incident = &h.store.all()[0];
        assert_eq!(incident.fan_in, 1);
        assert!(incident.alternate_sources.is_empty());
    }

    #[tokio::test]
    async fn recent_crawl_rereads_first_pages_and_leaves_progress_alone() {
        let h = Harness::new();
        let mut saved = ProgressState::new();
        saved.insert(
            "Extra".into(),
            SourceProgress {
                page: 6,
                total_collected: 40,
                total_alternatives: 2,
            },
        );
        ProgressTracker::new(&h.path, Vec::new()).save(&saved).unwrap();

        let extra = Arc::new(
            MockAdapter::new("Extra")
                .on_page(1, &["Assalto em Botafogo deixa feridos"])
                .on_page(2, &["Roubo de carga na Avenida Brasil"])
                .on_page(3, &["Furto de cabos em Bangu"]),
        );
        let g1 = Arc::new(MockAdapter::new("G1 Rio").on_page(1, &["Sequestro relâmpago em Niterói"]));

        let summary = h
            .crawler(vec![source(&extra, 5), source(&g1, 1)], 30)
            .run_recent(2)
            .await;

        assert_eq!(extra.fetched(), vec![1, 2]);
        assert_eq!(g1.fetched(), vec![1]);
        assert_eq!(summary.created(), 3);
        assert_eq!(summary.sources[0].first_page, 1);
        assert_eq!(summary.sources[0].pages, 2);
        assert_eq!(h.store.len(), 3);

        let progress = h.progress();
        assert_eq!(progress["Extra"], saved["Extra"]);
        assert!(!progress.contains_key("G1 Rio"));
    }

    #[test]
    fn unpaginated_source_is_capped_to_one_page() {
        let client = reqwest::Client::new();
        let feed = SourceConfig {
            name: "G1 Rio".into(),
            kind: safedrive_common::SourceKind::Feed,
            url: "https://g1.globo.com/rss/g1/rio-de-janeiro/".into(),
            max_pages: 50,
            delay_secs: 2,
            link_filter: None,
            min_title_len: 15,
        };
        assert_eq!(CrawlSource::from_config(&feed, client.clone()).max_pages, 1);

        let paged = SourceConfig {
            url: "https://g1.globo.com/rj/rio-de-janeiro/index/feed/pagina-{page}.ghtml".into(),
            ..feed
        };
        let source = CrawlSource::from_config(&paged, client);
        assert_eq!(source.max_pages, 50);
        assert_eq!(source.delay, Duration::from_secs(2));
    }
}
