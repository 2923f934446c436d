//! Persistence for canonical incidents.
//!
//! [`IncidentStore`] is the seam between the deduplicator and storage.
//! [`PgIncidentStore`] is the production implementation; [`MemoryIncidentStore`]
//! carries the same semantics in process for dry runs and tests.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use safedrive_common::{haversine_km, CanonicalIncident, Category, ClassifiedRecord};

pub use error::{Result, StoreError};
pub use memory::MemoryIncidentStore;
pub use postgres::PgIncidentStore;

/// Fields of a brand-new canonical incident. `collected_at` doubles as the
/// initial `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub id: Uuid,
    pub category: Category,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub source: String,
    pub locality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub preview: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
}

impl NewIncident {
    pub fn from_record(record: &ClassifiedRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: record.category,
            title: record.title.clone(),
            link: record.link.clone(),
            summary: record.summary.clone(),
            source: record.source.clone(),
            locality: record.locality.clone(),
            latitude: record.location.map(|p| p.lat),
            longitude: record.location.map(|p| p.lng),
            preview: record.preview.clone(),
            published_at: record.published_at,
            collected_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(Uuid),
    /// An incident with the same link exists; only its `updated_at` was refreshed.
    LinkExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The source is already the primary or an alternate source. Nothing changed.
    AlreadyPresent,
    NotFound,
}

/// Read filter for incident listings. `since` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub category: Option<Category>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyIncident {
    #[serde(flatten)]
    pub incident: CanonicalIncident,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBucket {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentStats {
    pub total: i64,
    pub multi_source: i64,
    pub with_coordinates: i64,
    pub by_category: Vec<CountBucket>,
    pub by_primary_source: Vec<CountBucket>,
    pub top_multi_source: Vec<CanonicalIncident>,
}

impl std::fmt::Display for IncidentStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |n: i64| {
            if self.total > 0 {
                100.0 * n as f64 / self.total as f64
            } else {
                0.0
            }
        };
        writeln!(f, "Total incidents: {}", self.total)?;
        writeln!(
            f,
            "Multiple sources: {} ({:.1}%)",
            self.multi_source,
            pct(self.multi_source)
        )?;
        writeln!(
            f,
            "With coordinates: {} ({:.1}%)",
            self.with_coordinates,
            pct(self.with_coordinates)
        )?;
        writeln!(f, "By category:")?;
        for bucket in &self.by_category {
            writeln!(f, "  {}: {}", bucket.label, bucket.count)?;
        }
        writeln!(f, "By primary source:")?;
        for bucket in &self.by_primary_source {
            writeln!(f, "  {}: {}", bucket.label, bucket.count)?;
        }
        writeln!(f, "Most reported:")?;
        for incident in &self.top_multi_source {
            let title: String = incident.title.chars().take(60).collect();
            writeln!(
                f,
                "  {} + {} others: {}",
                incident.primary_source,
                incident.fan_in - 1,
                title
            )?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    // --- Dedup path ---

    /// Incidents eligible for near-duplicate comparison, newest first.
    /// Filters on category, on locality when given, and on `collected_at >= since`.
    async fn recent_candidates(
        &self,
        category: Category,
        locality: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CanonicalIncident>>;

    /// Insert a new incident unless its link already exists.
    async fn insert_incident(&self, incident: &NewIncident) -> Result<InsertOutcome>;

    /// Record `source`/`link` as an alternate report of incident `id`.
    async fn append_alternate_source(
        &self,
        id: Uuid,
        source: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome>;

    /// Refresh `updated_at` only.
    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    // --- Read projections ---

    async fn get_incident(&self, id: Uuid) -> Result<Option<CanonicalIncident>>;

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<CanonicalIncident>>;

    /// Incidents with coordinates within `radius_m` meters, nearest first.
    async fn incidents_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyIncident>>;

    async fn stats(&self, top: i64) -> Result<IncidentStats>;
}

/// Lat/lng half-extents of a box enclosing a circle of `radius_m` around `lat`.
pub(crate) fn bounding_deltas(lat: f64, radius_m: f64) -> (f64, f64) {
    let radius_km = radius_m / 1000.0;
    let lat_delta = radius_km / 111.0;
    let lng_delta = radius_km / (111.0 * lat.to_radians().cos().abs().max(0.01));
    (lat_delta, lng_delta)
}

/// Exact distance filter and ordering applied after a bounding-box prefilter.
pub(crate) fn rank_by_distance(
    incidents: Vec<CanonicalIncident>,
    lat: f64,
    lng: f64,
    radius_m: f64,
    limit: usize,
) -> Vec<NearbyIncident> {
    let mut nearby: Vec<NearbyIncident> = incidents
        .into_iter()
        .filter_map(|incident| {
            let point = incident.location()?;
            let distance_m = haversine_km(lat, lng, point.lat, point.lng) * 1000.0;
            (distance_m <= radius_m).then_some(NearbyIncident {
                incident,
                distance_m,
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    nearby.truncate(limit);
    nearby
}
