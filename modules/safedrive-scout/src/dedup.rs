//! Near-duplicate detection and multi-source merging.
//!
//! For each classified record:
//!
//! 1. Pull the candidate pool: same category (and locality, when known),
//!    collected within the trailing window, newest first, capped.
//! 2. Score every candidate title against the record title.
//! 3. Best score at or above the threshold → the record is another report of
//!    that incident and its source is appended as an alternate.
//! 4. Otherwise insert a new canonical incident keyed by link.
//!
//! Store failures never escape: they are logged and reported as
//! `Rejected { reason: StorageError }` so the crawl moves on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use safedrive_common::{
    CanonicalIncident, Category, ClassifiedRecord, DedupConfig, DedupOutcome, RejectReason,
};
use safedrive_store::{AppendOutcome, IncidentStore, InsertOutcome, NewIncident, StoreError};

use crate::similarity::similarity;

type BucketKey = (Category, Option<String>);

pub struct Deduplicator {
    store: Arc<dyn IncidentStore>,
    config: DedupConfig,
    /// One async lock per (category, locality) bucket, held from the pool read
    /// through the write. Submits within a bucket are decided one at a time.
    buckets: Mutex<HashMap<BucketKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Whether a score makes two titles the same incident.
pub fn is_near_duplicate(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// Highest-scoring candidate. Ties keep the earlier (newer) candidate;
/// candidates scoring 0.0 never match.
pub fn best_match<'c>(
    title: &str,
    pool: &'c [CanonicalIncident],
) -> Option<(&'c CanonicalIncident, f64)> {
    let mut best: Option<(&CanonicalIncident, f64)> = None;
    for candidate in pool {
        let score = similarity(title, &candidate.title);
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((candidate, score));
        }
    }
    best
}

impl Deduplicator {
    pub fn new(store: Arc<dyn IncidentStore>, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a record, stamping it with the current time.
    pub async fn submit(&self, record: &ClassifiedRecord) -> DedupOutcome {
        self.submit_at(record, Utc::now()).await
    }

    /// Submit a record as of `now`. The candidate window is measured from `now`.
    pub async fn submit_at(&self, record: &ClassifiedRecord, now: DateTime<Utc>) -> DedupOutcome {
        let bucket = self.bucket(record);
        let _guard = bucket.lock().await;

        match self.decide(record, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    link = record.link.as_str(),
                    source = record.source.as_str(),
                    category = %record.category,
                    locality = record.locality.as_deref().unwrap_or(""),
                    error = %e,
                    "Incident store failed; record rejected"
                );
                DedupOutcome::Rejected {
                    reason: RejectReason::StorageError,
                }
            }
        }
    }

    fn bucket(&self, record: &ClassifiedRecord) -> Arc<tokio::sync::Mutex<()>> {
        let key = (record.category, record.locality.clone());
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.entry(key).or_default().clone()
    }

    async fn decide(
        &self,
        record: &ClassifiedRecord,
        now: DateTime<Utc>,
    ) -> Result<DedupOutcome, StoreError> {
        let since = now - Duration::days(self.config.window_days);
        let pool = self
            .store
            .recent_candidates(
                record.category,
                record.locality.as_deref(),
                since,
                self.config.pool_size,
            )
            .await?;

        if let Some((candidate, score)) = best_match(&record.title, &pool) {
            if is_near_duplicate(score, self.config.similarity_threshold) {
                return self.merge(candidate, record, score, now).await;
            }
            debug!(
                title = record.title.as_str(),
                best = score,
                pool = pool.len(),
                "No near-duplicate above threshold"
            );
        }

        self.create(record, now).await
    }

    async fn merge(
        &self,
        existing: &CanonicalIncident,
        record: &ClassifiedRecord,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<DedupOutcome, StoreError> {
        // Same article seen again (re-scrape or resumed crawl).
        if existing.has_link(&record.link) {
            self.store.touch(existing.id, now).await?;
            debug!(link = record.link.as_str(), existing_id = %existing.id, "Link already stored");
            return Ok(DedupOutcome::Rejected {
                reason: RejectReason::DuplicateLink,
            });
        }

        let merged = |appended| DedupOutcome::Merged {
            existing_id: existing.id,
            similarity: score,
            appended,
        };

        if existing.has_source(&record.source) {
            debug!(
                existing_id = %existing.id,
                source = record.source.as_str(),
                "Source already attached"
            );
            return Ok(merged(false));
        }

        match self
            .store
            .append_alternate_source(existing.id, &record.source, &record.link, now)
            .await?
        {
            AppendOutcome::Appended => {
                info!(
                    existing_id = %existing.id,
                    similarity = score,
                    source = record.source.as_str(),
                    primary = existing.primary_source.as_str(),
                    "Near-duplicate merged as alternate source"
                );
                Ok(merged(true))
            }
            AppendOutcome::AlreadyPresent => Ok(merged(false)),
            AppendOutcome::NotFound => Err(StoreError::Other(anyhow::anyhow!(
                "incident {} disappeared between pool read and merge",
                existing.id
            ))),
        }
    }

    async fn create(
        &self,
        record: &ClassifiedRecord,
        now: DateTime<Utc>,
    ) -> Result<DedupOutcome, StoreError> {
        let new = NewIncident::from_record(record, now);
        match self.store.insert_incident(&new).await? {
            InsertOutcome::Created(id) => {
                debug!(id = %id, title = record.title.as_str(), category = %record.category, "New incident");
                Ok(DedupOutcome::Created { id })
            }
            InsertOutcome::LinkExists => Ok(DedupOutcome::Rejected {
                reason: RejectReason::DuplicateLink,
            }),
        }
    }
}
