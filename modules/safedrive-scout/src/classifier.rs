//! Keyword classification of raw reports into crime categories and localities.

use std::sync::LazyLock;

use tracing::debug;

use safedrive_common::{CandidateRecord, Category, ClassifiedRecord, GeoPoint};

use crate::lexicon::{category_keywords, GAZETTEER};

/// Maximum preview length, in characters.
pub const PREVIEW_MAX_CHARS: usize = 500;

struct Place {
    name: &'static str,
    needle: String,
    point: GeoPoint,
}

/// Gazetteer in match order: longest name first so "Barra da Tijuca" beats
/// "Tijuca"; equal lengths keep declaration order (stable sort).
static PLACES: LazyLock<Vec<Place>> = LazyLock::new(|| {
    let mut places: Vec<Place> = GAZETTEER
        .iter()
        .map(|&(name, lat, lng)| Place {
            name,
            needle: name.to_lowercase(),
            point: GeoPoint { lat, lng },
        })
        .collect();
    places.sort_by(|a, b| b.name.chars().count().cmp(&a.name.chars().count()));
    places
});

/// First category, in priority order, with a keyword contained in `text`.
pub fn classify_category(text: &str) -> Option<Category> {
    let lower = text.to_lowercase();
    Category::PRIORITY
        .into_iter()
        .find(|&category| category_keywords(category).iter().any(|k| lower.contains(k)))
}

/// Most specific gazetteer place mentioned in `text`.
pub fn extract_locality(text: &str) -> Option<(&'static str, GeoPoint)> {
    let lower = text.to_lowercase();
    PLACES
        .iter()
        .find(|p| lower.contains(&p.needle))
        .map(|p| (p.name, p.point))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Classify a raw record. Returns `None` for records without a title or link
/// and for records that match no category; neither is ever persisted.
pub fn classify(candidate: CandidateRecord) -> Option<ClassifiedRecord> {
    let candidate = CandidateRecord {
        title: candidate.title.trim().to_string(),
        link: candidate.link.trim().to_string(),
        summary: candidate.summary.trim().to_string(),
        ..candidate
    };
    if candidate.title.is_empty() || candidate.link.is_empty() {
        debug!(source = candidate.source.as_str(), "Dropping record without title or link");
        return None;
    }

    let text = candidate.full_text();
    let category = classify_category(&text)?;
    let (locality, location) = match extract_locality(&text) {
        Some((name, point)) => (Some(name.to_string()), Some(point)),
        None => (None, None),
    };

    Some(ClassifiedRecord {
        preview: truncate_chars(&text, PREVIEW_MAX_CHARS),
        title: candidate.title,
        link: candidate.link,
        summary: candidate.summary,
        source: candidate.source,
        published_at: candidate.published_at,
        category,
        locality,
        location,
    })
}
