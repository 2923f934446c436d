use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use safedrive_common::Category;
use safedrive_store::{IncidentFilter, NearbyIncident};

use crate::AppState;

const NEAR_DEFAULT_RADIUS_M: f64 = 2_000.0;
const NEAR_MAX_RADIUS_M: f64 = 20_000.0;
const NEAR_MAX_RESULTS: usize = 100;
const LIST_DEFAULT_LIMIT: i64 = 50;
const LIST_MAX_LIMIT: i64 = 200;
const STATS_TOP: i64 = 10;

// --- Query structs ---

#[derive(Deserialize)]
pub struct NearQuery {
    lat: f64,
    lng: f64,
    /// Meters.
    radius: Option<f64>,
}

#[derive(Deserialize)]
pub struct IncidentsQuery {
    category: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

// --- Helpers ---

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

pub fn incidents_to_geojson(incidents: &[NearbyIncident]) -> serde_json::Value {
    let features: Vec<serde_json::Value> = incidents
        .iter()
        .filter_map(|nearby| {
            let incident = &nearby.incident;
            let loc = incident.location()?;
            Some(serde_json::json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [loc.lng, loc.lat]
                },
                "properties": {
                    "id": incident.id.to_string(),
                    "title": incident.title,
                    "category": incident.category.as_str(),
                    "locality": incident.locality,
                    "link": incident.link,
                    "primary_source": incident.primary_source,
                    "alternate_sources": incident.alternate_sources,
                    "fan_in": incident.fan_in,
                    "collected_at": incident.collected_at.to_rfc3339(),
                    "distance_m": nearby.distance_m,
                }
            }))
        })
        .collect();

    serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

// --- Handlers ---

pub async fn api_incidents_near(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearQuery>,
) -> impl IntoResponse {
    let radius = params
        .radius
        .unwrap_or(NEAR_DEFAULT_RADIUS_M)
        .clamp(0.0, NEAR_MAX_RADIUS_M);

    match state
        .store
        .incidents_near(params.lat, params.lng, radius, NEAR_MAX_RESULTS)
        .await
    {
        Ok(incidents) => Json(incidents_to_geojson(&incidents)).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load incidents near");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_incidents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IncidentsQuery>,
) -> impl IntoResponse {
    let category = match params.category.as_deref().map(str::parse::<Category>).transpose() {
        Ok(category) => category,
        Err(e) => return bad_request(e.to_string()),
    };

    let filter = IncidentFilter {
        category,
        since: params.since,
        until: params.until,
        limit: params
            .limit
            .unwrap_or(LIST_DEFAULT_LIMIT)
            .clamp(1, LIST_MAX_LIMIT),
    };

    match state.store.list_incidents(&filter).await {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list incidents");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_incident_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let uuid = match Uuid::parse_str(&id) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match state.store.get_incident(uuid).await {
        Ok(Some(incident)) => Json(incident).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, id = %uuid, "Failed to load incident");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.stats(STATS_TOP).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to compute stats");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
