use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SafeDriveError;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

// --- Category ---

/// Crime category. Declaration order is classification priority:
/// a text matching several categories is assigned the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Kidnapping.
    Sequestro,
    /// Robbery (theft with violence or threat).
    Roubo,
    /// Theft.
    Furto,
}

impl Category {
    /// All categories in priority order.
    pub const PRIORITY: [Category; 3] = [Category::Sequestro, Category::Roubo, Category::Furto];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sequestro => "Sequestro",
            Category::Roubo => "Roubo",
            Category::Furto => "Furto",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SafeDriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequestro" | "kidnapping" => Ok(Category::Sequestro),
            "roubo" | "robbery" => Ok(Category::Roubo),
            "furto" | "theft" => Ok(Category::Furto),
            other => Err(SafeDriveError::Validation(format!(
                "unknown category: {other}"
            ))),
        }
    }
}

// --- Records ---

/// A raw report produced by a source adapter. Not validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub summary: String,
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl CandidateRecord {
    pub fn new(title: impl Into<String>, link: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            summary: String::new(),
            source: source.into(),
            published_at: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Title and summary joined, the text that classification runs over.
    pub fn full_text(&self) -> String {
        if self.summary.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.summary)
        }
    }
}

/// A candidate that matched a category. Only classified records reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Category,
    pub locality: Option<String>,
    pub location: Option<GeoPoint>,
    pub preview: String,
}

/// The merged representation of one real-world event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIncident {
    pub id: Uuid,
    pub category: Category,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub primary_source: String,
    pub alternate_sources: Vec<String>,
    pub alternate_links: Vec<String>,
    pub fan_in: i32,
    pub locality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub preview: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalIncident {
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }

    /// Whether `source` already contributed to this incident.
    pub fn has_source(&self, source: &str) -> bool {
        self.primary_source == source || self.alternate_sources.iter().any(|s| s == source)
    }

    /// Whether `link` is the primary link or one of the alternate links.
    pub fn has_link(&self, link: &str) -> bool {
        self.link == link || self.alternate_links.iter().any(|l| l == link)
    }
}

// --- Dedup outcomes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateLink,
    StorageError,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DuplicateLink => write!(f, "duplicate link"),
            RejectReason::StorageError => write!(f, "storage error"),
        }
    }
}

/// Result of submitting one classified record to the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DedupOutcome {
    Created { id: Uuid },
    /// `appended` is false when the source was already attached and nothing changed.
    Merged {
        existing_id: Uuid,
        similarity: f64,
        appended: bool,
    },
    Rejected { reason: RejectReason },
}
