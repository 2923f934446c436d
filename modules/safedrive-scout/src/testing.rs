//! Test doubles for the scout pipeline.
//!
//! - `MockAdapter`: scripted pages per page number, records every fetch
//! - `FailingStore`: an `IncidentStore` whose every call errors
//! - builders for classified records and stored incidents

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use safedrive_common::{CandidateRecord, CanonicalIncident, Category, ClassifiedRecord};
use safedrive_store::{
    AppendOutcome, IncidentFilter, IncidentStats, IncidentStore, InsertOutcome, NearbyIncident,
    NewIncident, StoreError,
};

use crate::sources::SourceAdapter;

enum Page {
    Records(Vec<CandidateRecord>),
    Error(String),
}

/// Source adapter serving scripted pages. Unscripted pages are empty.
pub struct MockAdapter {
    name: String,
    pages: HashMap<u32, Page>,
    fetched: Mutex<Vec<u32>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: HashMap::new(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Serve `titles` on `page`, one record each with a link unique to the page.
    pub fn on_page(mut self, page: u32, titles: &[&str]) -> Self {
        let records = titles
            .iter()
            .enumerate()
            .map(|(n, title)| {
                let link = format!("https://{}/p{page}/{n}", self.name.replace(' ', "-").to_lowercase());
                CandidateRecord::new(*title, link, self.name.clone())
            })
            .collect();
        self.pages.insert(page, Page::Records(records));
        self
    }

    pub fn with_records(mut self, page: u32, records: Vec<CandidateRecord>) -> Self {
        self.pages.insert(page, Page::Records(records));
        self
    }

    pub fn failing_on(mut self, page: u32, message: &str) -> Self {
        self.pages.insert(page, Page::Error(message.to_string()));
        self
    }

    /// Page numbers fetched so far, in order.
    pub fn fetched(&self) -> Vec<u32> {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<CandidateRecord>> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(page);
        match self.pages.get(&page) {
            Some(Page::Records(records)) => Ok(records.clone()),
            Some(Page::Error(message)) => Err(anyhow!("{message}")),
            None => Ok(Vec::new()),
        }
    }
}

/// Store that fails every operation.
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Other(anyhow!("database unavailable"))
}

#[async_trait]
impl IncidentStore for FailingStore {
    async fn recent_candidates(
        &self,
        _category: Category,
        _locality: Option<&str>,
        _since: DateTime<Utc>,
        _limit: i64,
    ) -> safedrive_store::Result<Vec<CanonicalIncident>> {
        Err(unavailable())
    }

    async fn insert_incident(&self, _incident: &NewIncident) -> safedrive_store::Result<InsertOutcome> {
        Err(unavailable())
    }

    async fn append_alternate_source(
        &self,
        _id: Uuid,
        _source: &str,
        _link: &str,
        _now: DateTime<Utc>,
    ) -> safedrive_store::Result<AppendOutcome> {
        Err(unavailable())
    }

    async fn touch(&self, _id: Uuid, _now: DateTime<Utc>) -> safedrive_store::Result<()> {
        Err(unavailable())
    }

    async fn get_incident(&self, _id: Uuid) -> safedrive_store::Result<Option<CanonicalIncident>> {
        Err(unavailable())
    }

    async fn list_incidents(
        &self,
        _filter: &IncidentFilter,
    ) -> safedrive_store::Result<Vec<CanonicalIncident>> {
        Err(unavailable())
    }

    async fn incidents_near(
        &self,
        _lat: f64,
        _lng: f64,
        _radius_m: f64,
        _limit: usize,
    ) -> safedrive_store::Result<Vec<NearbyIncident>> {
        Err(unavailable())
    }

    async fn stats(&self, _top: i64) -> safedrive_store::Result<IncidentStats> {
        Err(unavailable())
    }
}

/// A robbery report with no locality, bypassing the classifier.
pub fn classified(title: &str, link: &str, source: &str) -> ClassifiedRecord {
    ClassifiedRecord {
        title: title.to_string(),
        link: link.to_string(),
        summary: String::new(),
        source: source.to_string(),
        published_at: None,
        category: Category::Roubo,
        locality: None,
        location: None,
        preview: title.to_string(),
    }
}

/// A stored single-source robbery incident collected at `at`.
pub fn incident_at(title: &str, link: &str, source: &str, at: DateTime<Utc>) -> CanonicalIncident {
    CanonicalIncident {
        id: Uuid::new_v4(),
        category: Category::Roubo,
        title: title.to_string(),
        link: link.to_string(),
        summary: String::new(),
        primary_source: source.to_string(),
        alternate_sources: Vec::new(),
        alternate_links: Vec::new(),
        fan_in: 1,
        locality: None,
        latitude: None,
        longitude: None,
        preview: title.to_string(),
        published_at: None,
        collected_at: at,
        updated_at: at,
    }
}
