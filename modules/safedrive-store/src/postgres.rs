// Postgres persistence for canonical incidents.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use safedrive_common::{CanonicalIncident, Category};

use crate::error::{Result, StoreError};
use crate::{
    bounding_deltas, rank_by_distance, AppendOutcome, CountBucket, IncidentFilter,
    IncidentStats, IncidentStore, InsertOutcome, NearbyIncident, NewIncident,
};

const INCIDENT_COLUMNS: &str = r#"
    id, category, title, link, summary, primary_source,
    alternate_sources, alternate_links, fan_in,
    locality, latitude, longitude, preview,
    published_at, collected_at, updated_at
"#;

/// A row from the incidents table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct IncidentRow {
    id: Uuid,
    category: String,
    title: String,
    link: String,
    summary: String,
    primary_source: String,
    alternate_sources: Vec<String>,
    alternate_links: Vec<String>,
    fan_in: i32,
    locality: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    preview: String,
    published_at: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<IncidentRow> for CanonicalIncident {
    type Error = StoreError;

    fn try_from(row: IncidentRow) -> Result<Self> {
        let category = Category::from_str(&row.category).map_err(|e| StoreError::Corrupt {
            id: row.id,
            reason: e.to_string(),
        })?;
        Ok(CanonicalIncident {
            id: row.id,
            category,
            title: row.title,
            link: row.link,
            summary: row.summary,
            primary_source: row.primary_source,
            alternate_sources: row.alternate_sources,
            alternate_links: row.alternate_links,
            fan_in: row.fan_in,
            locality: row.locality,
            latitude: row.latitude,
            longitude: row.longitude,
            preview: row.preview,
            published_at: row.published_at,
            collected_at: row.collected_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_incidents(rows: Vec<IncidentRow>) -> Result<Vec<CanonicalIncident>> {
    rows.into_iter().map(CanonicalIncident::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct CountRow {
    label: String,
    count: i64,
}

pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Incident store migrations applied");
        Ok(())
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await?)
    }

    async fn buckets(&self, sql: &str) -> Result<Vec<CountBucket>> {
        let rows = sqlx::query_as::<_, CountRow>(sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| CountBucket {
                label: r.label,
                count: r.count,
            })
            .collect())
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn recent_candidates(
        &self,
        category: Category,
        locality: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CanonicalIncident>> {
        let sql = format!(
            r#"
            SELECT {INCIDENT_COLUMNS} FROM incidents
            WHERE category = $1
              AND ($2::text IS NULL OR locality = $2)
              AND collected_at >= $3
            ORDER BY collected_at DESC
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, IncidentRow>(&sql)
            .bind(category.as_str())
            .bind(locality)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_incidents(rows)
    }

    async fn insert_incident(&self, new: &NewIncident) -> Result<InsertOutcome> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO incidents
                (id, category, title, link, summary, primary_source,
                 fan_in, locality, latitude, longitude, preview,
                 published_at, collected_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT (link) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(new.id)
        .bind(new.category.as_str())
        .bind(&new.title)
        .bind(&new.link)
        .bind(&new.summary)
        .bind(&new.source)
        .bind(&new.locality)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(&new.preview)
        .bind(new.published_at)
        .bind(new.collected_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(InsertOutcome::Created(id));
        }

        sqlx::query("UPDATE incidents SET updated_at = $2 WHERE link = $1")
            .bind(&new.link)
            .bind(new.collected_at)
            .execute(&self.pool)
            .await?;
        Ok(InsertOutcome::LinkExists)
    }

    async fn append_alternate_source(
        &self,
        id: Uuid,
        source: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        // The membership check lives in the WHERE clause so the append is
        // atomic per row even when two writers race.
        let appended = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE incidents
            SET alternate_sources = array_append(alternate_sources, $2),
                alternate_links = array_append(alternate_links, $3),
                fan_in = fan_in + 1,
                updated_at = $4
            WHERE id = $1
              AND primary_source <> $2
              AND NOT ($2 = ANY(alternate_sources))
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(source)
        .bind(link)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if appended.is_some() {
            return Ok(AppendOutcome::Appended);
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM incidents WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            AppendOutcome::AlreadyPresent
        } else {
            AppendOutcome::NotFound
        })
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE incidents SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<CanonicalIncident>> {
        let sql = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1");
        let row = sqlx::query_as::<_, IncidentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CanonicalIncident::try_from).transpose()
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<CanonicalIncident>> {
        let sql = format!(
            r#"
            SELECT {INCIDENT_COLUMNS} FROM incidents
            WHERE ($1::text IS NULL OR category = $1)
              AND ($2::timestamptz IS NULL OR collected_at >= $2)
              AND ($3::timestamptz IS NULL OR collected_at < $3)
            ORDER BY collected_at DESC
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, IncidentRow>(&sql)
            .bind(filter.category.map(|c| c.as_str()))
            .bind(filter.since)
            .bind(filter.until)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        into_incidents(rows)
    }

    async fn incidents_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyIncident>> {
        let (lat_delta, lng_delta) = bounding_deltas(lat, radius_m);
        let sql = format!(
            r#"
            SELECT {INCIDENT_COLUMNS} FROM incidents
            WHERE latitude BETWEEN $1 AND $2
              AND longitude BETWEEN $3 AND $4
            "#
        );
        let rows = sqlx::query_as::<_, IncidentRow>(&sql)
            .bind(lat - lat_delta)
            .bind(lat + lat_delta)
            .bind(lng - lng_delta)
            .bind(lng + lng_delta)
            .fetch_all(&self.pool)
            .await?;
        Ok(rank_by_distance(into_incidents(rows)?, lat, lng, radius_m, limit))
    }

    async fn stats(&self, top: i64) -> Result<IncidentStats> {
        let total = self.count("SELECT COUNT(*) FROM incidents").await?;
        let multi_source = self
            .count("SELECT COUNT(*) FROM incidents WHERE fan_in > 1")
            .await?;
        let with_coordinates = self
            .count("SELECT COUNT(*) FROM incidents WHERE latitude IS NOT NULL")
            .await?;
        let by_category = self
            .buckets(
                r#"
                SELECT category AS label, COUNT(*) AS count
                FROM incidents GROUP BY category ORDER BY count DESC, label
                "#,
            )
            .await?;
        let by_primary_source = self
            .buckets(
                r#"
                SELECT primary_source AS label, COUNT(*) AS count
                FROM incidents GROUP BY primary_source ORDER BY count DESC, label
                "#,
            )
            .await?;

        let sql = format!(
            r#"
            SELECT {INCIDENT_COLUMNS} FROM incidents
            WHERE fan_in > 1
            ORDER BY fan_in DESC, updated_at DESC
            LIMIT $1
            "#
        );
        let rows = sqlx::query_as::<_, IncidentRow>(&sql)
            .bind(top)
            .fetch_all(&self.pool)
            .await?;

        Ok(IncidentStats {
            total,
            multi_source,
            with_coordinates,
            by_category,
            by_primary_source,
            top_multi_source: into_incidents(rows)?,
        })
    }
}
