// In-process incident store. Same contract as the Postgres store; used for
// `--dry-run` crawls and by tests. Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use safedrive_common::{CanonicalIncident, Category};

use crate::{
    bounding_deltas, rank_by_distance, AppendOutcome, CountBucket, IncidentFilter,
    IncidentStats, IncidentStore, InsertOutcome, NearbyIncident, NewIncident, Result,
};

#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: Mutex<Vec<CanonicalIncident>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed incident, bypassing link checks. For fixtures.
    pub fn seed(&self, incident: CanonicalIncident) {
        self.lock().push(incident);
    }

    /// Snapshot of every stored incident in insertion order.
    pub fn all(&self) -> Vec<CanonicalIncident> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CanonicalIncident>> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.incidents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn newest_first(incidents: &mut [CanonicalIncident]) {
    incidents.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
}

fn count_by<F>(incidents: &[CanonicalIncident], key: F) -> Vec<CountBucket>
where
    F: Fn(&CanonicalIncident) -> String,
{
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for incident in incidents {
        *counts.entry(key(incident)).or_default() += 1;
    }
    let mut buckets: Vec<CountBucket> = counts
        .into_iter()
        .map(|(label, count)| CountBucket { label, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    buckets
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn recent_candidates(
        &self,
        category: Category,
        locality: Option<&str>,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CanonicalIncident>> {
        let mut pool: Vec<CanonicalIncident> = self
            .lock()
            .iter()
            .filter(|i| i.category == category)
            .filter(|i| locality.is_none() || i.locality.as_deref() == locality)
            .filter(|i| i.collected_at >= since)
            .cloned()
            .collect();
        newest_first(&mut pool);
        pool.truncate(limit.max(0) as usize);
        Ok(pool)
    }

    async fn insert_incident(&self, new: &NewIncident) -> Result<InsertOutcome> {
        let mut incidents = self.lock();
        if let Some(existing) = incidents.iter_mut().find(|i| i.link == new.link) {
            existing.updated_at = new.collected_at;
            return Ok(InsertOutcome::LinkExists);
        }
        incidents.push(CanonicalIncident {
            id: new.id,
            category: new.category,
            title: new.title.clone(),
            link: new.link.clone(),
            summary: new.summary.clone(),
            primary_source: new.source.clone(),
            alternate_sources: Vec::new(),
            alternate_links: Vec::new(),
            fan_in: 1,
            locality: new.locality.clone(),
            latitude: new.latitude,
            longitude: new.longitude,
            preview: new.preview.clone(),
            published_at: new.published_at,
            collected_at: new.collected_at,
            updated_at: new.collected_at,
        });
        Ok(InsertOutcome::Created(new.id))
    }

    async fn append_alternate_source(
        &self,
        id: Uuid,
        source: &str,
        link: &str,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let mut incidents = self.lock();
        let Some(incident) = incidents.iter_mut().find(|i| i.id == id) else {
            return Ok(AppendOutcome::NotFound);
        };
        if incident.has_source(source) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        incident.alternate_sources.push(source.to_string());
        incident.alternate_links.push(link.to_string());
        incident.fan_in += 1;
        incident.updated_at = now;
        Ok(AppendOutcome::Appended)
    }

    async fn touch(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if let Some(incident) = self.lock().iter_mut().find(|i| i.id == id) {
            incident.updated_at = now;
        }
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<CanonicalIncident>> {
        Ok(self.lock().iter().find(|i| i.id == id).cloned())
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<CanonicalIncident>> {
        let mut incidents: Vec<CanonicalIncident> = self
            .lock()
            .iter()
            .filter(|i| filter.category.map_or(true, |c| i.category == c))
            .filter(|i| filter.since.map_or(true, |since| i.collected_at >= since))
            .filter(|i| filter.until.map_or(true, |until| i.collected_at < until))
            .cloned()
            .collect();
        newest_first(&mut incidents);
        incidents.truncate(filter.limit.max(0) as usize);
        Ok(incidents)
    }

    async fn incidents_near(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyIncident>> {
        let (lat_delta, lng_delta) = bounding_deltas(lat, radius_m);
        let boxed: Vec<CanonicalIncident> = self
            .lock()
            .iter()
            .filter(|i| match i.location() {
                Some(p) => (p.lat - lat).abs() <= lat_delta && (p.lng - lng).abs() <= lng_delta,
                None => false,
            })
            .cloned()
            .collect();
        Ok(rank_by_distance(boxed, lat, lng, radius_m, limit))
    }

    async fn stats(&self, top: i64) -> Result<IncidentStats> {
        let incidents = self.all();

        let mut top_multi_source: Vec<CanonicalIncident> =
            incidents.iter().filter(|i| i.fan_in > 1).cloned().collect();
        top_multi_source.sort_by(|a, b| {
            b.fan_in
                .cmp(&a.fan_in)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        top_multi_source.truncate(top.max(0) as usize);

        Ok(IncidentStats {
            total: incidents.len() as i64,
            multi_source: incidents.iter().filter(|i| i.fan_in > 1).count() as i64,
            with_coordinates: incidents.iter().filter(|i| i.location().is_some()).count() as i64,
            by_category: count_by(&incidents, |i| i.category.to_string()),
            by_primary_source: count_by(&incidents, |i| i.primary_source.clone()),
            top_multi_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_incident(link: &str, source: &str, locality: Option<&str>, at: DateTime<Utc>) -> NewIncident {
        NewIncident {
            id: Uuid::new_v4(),
            category: Category::Roubo,
            title: format!("Assalto {link}"),
            link: link.to_string(),
            summary: String::new(),
            source: source.to_string(),
            locality: locality.map(str::to_string),
            latitude: None,
            longitude: None,
            preview: String::new(),
            published_at: None,
            collected_at: at,
        }
    }

    #[tokio::test]
    async fn insert_then_same_link_only_refreshes_updated_at() {
        let store = MemoryIncidentStore::new();
        let t0 = Utc::now();
        let first = new_incident("https://extra/1", "Extra", None, t0);
        assert_eq!(
            store.insert_incident(&first).await.unwrap(),
            InsertOutcome::Created(first.id)
        );

        let mut again = new_incident("https://extra/1", "G1 Rio", Some("Tijuca"), t0 + Duration::hours(1));
        again.title = "Outro titulo".into();
        assert_eq!(
            store.insert_incident(&again).await.unwrap(),
            InsertOutcome::LinkExists
        );

        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, first.title);
        assert_eq!(stored[0].primary_source, "Extra");
        assert_eq!(stored[0].collected_at, t0);
        assert_eq!(stored[0].updated_at, t0 + Duration::hours(1));
    }

    #[tokio::test]
    async fn append_keeps_fan_in_in_step_with_alternates() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        let new = new_incident("https://extra/1", "Extra", None, now);
        store.insert_incident(&new).await.unwrap();

        let outcome = store
            .append_alternate_source(new.id, "G1 Rio", "https://g1/1", now)
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);

        // Primary and existing alternates are both no-ops.
        for source in ["Extra", "G1 Rio"] {
            let outcome = store
                .append_alternate_source(new.id, source, "https://x/2", now)
                .await
                .unwrap();
            assert_eq!(outcome, AppendOutcome::AlreadyPresent);
        }

        let incident = store.get_incident(new.id).await.unwrap().unwrap();
        assert_eq!(incident.fan_in, 2);
        assert_eq!(incident.alternate_sources, vec!["G1 Rio"]);
        assert_eq!(incident.alternate_links, vec!["https://g1/1"]);

        let missing = store
            .append_alternate_source(Uuid::new_v4(), "R7 Rio", "https://r7/1", now)
            .await
            .unwrap();
        assert_eq!(missing, AppendOutcome::NotFound);
    }

    #[tokio::test]
    async fn candidate_pool_filters_window_locality_and_caps_size() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        for n in 0..5 {
            let at = now - Duration::minutes(n);
            store
                .insert_incident(&new_incident(&format!("https://a/{n}"), "Extra", Some("Centro"), at))
                .await
                .unwrap();
        }
        store
            .insert_incident(&new_incident("https://old", "Extra", Some("Centro"), now - Duration::days(31)))
            .await
            .unwrap();
        store
            .insert_incident(&new_incident("https://lapa", "Extra", Some("Lapa"), now))
            .await
            .unwrap();

        let since = now - Duration::days(30);
        let pool = store
            .recent_candidates(Category::Roubo, Some("Centro"), since, 3)
            .await
            .unwrap();
        let links: Vec<_> = pool.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["https://a/0", "https://a/1", "https://a/2"]);

        // No locality on the record: any locality in the category qualifies.
        let unscoped = store
            .recent_candidates(Category::Roubo, None, since, 100)
            .await
            .unwrap();
        assert_eq!(unscoped.len(), 6);

        let other_category = store
            .recent_candidates(Category::Furto, None, since, 100)
            .await
            .unwrap();
        assert!(other_category.is_empty());
    }

    #[tokio::test]
    async fn near_query_orders_by_distance_within_radius() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        let places = [
            ("https://copa", -22.971177, -43.182543),
            ("https://ipanema", -22.983889, -43.204722),
            ("https://bangu", -22.875833, -43.465833),
        ];
        for (link, lat, lng) in places {
            let mut new = new_incident(link, "Extra", None, now);
            new.latitude = Some(lat);
            new.longitude = Some(lng);
            store.insert_incident(&new).await.unwrap();
        }
        store
            .insert_incident(&new_incident("https://nowhere", "Extra", None, now))
            .await
            .unwrap();

        let near = store
            .incidents_near(-22.9712, -43.1826, 5_000.0, 10)
            .await
            .unwrap();
        let links: Vec<_> = near.iter().map(|n| n.incident.link.as_str()).collect();
        assert_eq!(links, vec!["https://copa", "https://ipanema"]);
        assert!(near[0].distance_m < near[1].distance_m);
    }

    #[tokio::test]
    async fn stats_count_sources_categories_and_coordinates() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        let a = new_incident("https://extra/1", "Extra", None, now);
        let mut b = new_incident("https://g1/1", "G1 Rio", None, now);
        b.category = Category::Furto;
        b.latitude = Some(-22.9);
        b.longitude = Some(-43.2);
        store.insert_incident(&a).await.unwrap();
        store.insert_incident(&b).await.unwrap();
        store
            .append_alternate_source(a.id, "R7 Rio", "https://r7/1", now)
            .await
            .unwrap();

        let stats = store.stats(10).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.multi_source, 1);
        assert_eq!(stats.with_coordinates, 1);
        assert_eq!(stats.top_multi_source.len(), 1);
        assert_eq!(stats.top_multi_source[0].id, a.id);
        assert!(stats.by_category.contains(&CountBucket { label: "Roubo".into(), count: 1 }));
        assert!(stats.by_primary_source.contains(&CountBucket { label: "G1 Rio".into(), count: 1 }));
        assert!(stats.to_string().contains("Total incidents: 2"));
    }

    #[tokio::test]
    async fn top_multi_source_breaks_fan_in_ties_by_latest_update() {
        let store = MemoryIncidentStore::new();
        let t0 = Utc::now() - Duration::days(1);

        let mut ids = Vec::new();
        for n in 0..3 {
            let new = new_incident(&format!("https://extra/{n}"), "Extra", None, t0);
            store.insert_incident(&new).await.unwrap();
            store
                .append_alternate_source(new.id, "G1 Rio", &format!("https://g1/{n}"), t0 + Duration::hours(n))
                .await
                .unwrap();
            ids.push(new.id);
        }
        // Widest fan-in ranks first even though it was updated earliest.
        store
            .append_alternate_source(ids[0], "R7 Rio", "https://r7/0", t0)
            .await
            .unwrap();

        let top: Vec<Uuid> = store
            .stats(10)
            .await
            .unwrap()
            .top_multi_source
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(top, vec![ids[0], ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn list_filters_by_category_and_window() {
        let store = MemoryIncidentStore::new();
        let now = Utc::now();
        store
            .insert_incident(&new_incident("https://recent", "Extra", None, now))
            .await
            .unwrap();
        store
            .insert_incident(&new_incident("https://older", "Extra", None, now - Duration::days(3)))
            .await
            .unwrap();

        let filter = IncidentFilter {
            category: Some(Category::Roubo),
            since: Some(now - Duration::days(1)),
            until: None,
            limit: 50,
        };
        let listed = store.list_incidents(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].link, "https://recent");

        let furto = IncidentFilter {
            category: Some(Category::Furto),
            limit: 50,
            ..Default::default()
        };
        assert!(store.list_incidents(&furto).await.unwrap().is_empty());
    }
}
