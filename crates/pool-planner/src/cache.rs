//! Element cache
//!
//! Holds the newest element set per catalog number together with the time
//! it was fetched. Owned by the caller and handed to each pipeline run;
//! entries are replaced wholesale, never edited.

use chrono::{DateTime, Duration, Utc};
use orbital_mechanics::OrbitalElementSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries fetched longer ago than this are evicted
    pub max_fetch_age_hours: f64,
    /// Element sets whose epoch is older than this are not propagated
    pub max_epoch_age_days: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_fetch_age_hours: 24.0,
            max_epoch_age_days: 14.0,
        }
    }
}

impl CacheConfig {
    pub fn max_fetch_age(&self) -> Duration {
        Duration::milliseconds((self.max_fetch_age_hours * 3_600_000.0) as i64)
    }

    pub fn max_epoch_age(&self) -> Duration {
        Duration::milliseconds((self.max_epoch_age_days * 86_400_000.0) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Inserted,
    /// A newer epoch replaced the cached set
    Replaced,
    /// Same epoch seen again; fetch time refreshed
    Refreshed,
    /// Older epoch than the cached set; ignored
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub inserted: usize,
    pub replaced: usize,
    pub refreshed: usize,
    pub ignored: usize,
}

impl IngestStats {
    fn record(&mut self, outcome: CacheOutcome) {
        match outcome {
            CacheOutcome::Inserted => self.inserted += 1,
            CacheOutcome::Replaced => self.replaced += 1,
            CacheOutcome::Refreshed => self.refreshed += 1,
            CacheOutcome::Ignored => self.ignored += 1,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEntry {
    elements: OrbitalElementSet,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ElementCache {
    entries: BTreeMap<u32, CachedEntry>,
    max_fetch_age: Duration,
}

impl Default for ElementCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl ElementCache {
    pub fn new(max_fetch_age: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_fetch_age,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_fetch_age())
    }

    pub fn insert(&mut self, elements: OrbitalElementSet, fetched_at: DateTime<Utc>) -> CacheOutcome {
        let catalog = elements.catalog_number();
        match self.entries.get(&catalog) {
            None => {
                self.entries.insert(catalog, CachedEntry { elements, fetched_at });
                CacheOutcome::Inserted
            }
            Some(existing) if elements.epoch() > existing.elements.epoch() => {
                debug!(catalog, "Replacing element set with newer epoch");
                self.entries.insert(catalog, CachedEntry { elements, fetched_at });
                CacheOutcome::Replaced
            }
            Some(existing) if elements.epoch() == existing.elements.epoch() => {
                let elements = existing.elements.clone();
                self.entries.insert(catalog, CachedEntry { elements, fetched_at });
                CacheOutcome::Refreshed
            }
            Some(_) => CacheOutcome::Ignored,
        }
    }

    pub fn extend<I>(&mut self, sets: I, fetched_at: DateTime<Utc>) -> IngestStats
    where
        I: IntoIterator<Item = OrbitalElementSet>,
    {
        let mut stats = IngestStats::default();
        for set in sets {
            stats.record(self.insert(set, fetched_at));
        }
        stats
    }

    pub fn get(&self, catalog: u32) -> Option<&OrbitalElementSet> {
        self.entries.get(&catalog).map(|e| &e.elements)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, entry: &CachedEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.fetched_at) <= self.max_fetch_age
    }

    /// Drop entries fetched more than the maximum age ago
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let max_age = self.max_fetch_age;
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.fetched_at) <= max_age);
        before - self.entries.len()
    }

    /// Fresh element sets in catalog order
    pub fn fresh(&self, now: DateTime<Utc>) -> impl Iterator<Item = &OrbitalElementSet> + '_ {
        self.entries
            .values()
            .filter(move |entry| self.is_fresh(entry, now))
            .map(|entry| &entry.elements)
    }

    /// Fresh element sets grouped by constellation, each in catalog order
    pub fn by_constellation(&self, now: DateTime<Utc>) -> BTreeMap<String, Vec<OrbitalElementSet>> {
        let mut groups: BTreeMap<String, Vec<OrbitalElementSet>> = BTreeMap::new();
        for set in self.fresh(now) {
            groups
                .entry(set.constellation().to_string())
                .or_default()
                .push(set.clone());
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use orbital_mechanics::MeanElements;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_set(name: &str, catalog: u32, epoch: DateTime<Utc>, raan: f64) -> OrbitalElementSet {
        let m = MeanElements::circular(name, catalog, epoch, 550.0, 53.0, raan, 0.0);
        OrbitalElementSet::from_mean_elements(&m).unwrap()
    }

    #[test]
    fn test_newer_epoch_replaces() {
        let mut cache = ElementCache::default();
        let old = make_set("STARLINK-1", 1, now() - Duration::days(2), 10.0);
        let new = make_set("STARLINK-1", 1, now() - Duration::days(1), 20.0);

        assert_eq!(cache.insert(old.clone(), now()), CacheOutcome::Inserted);
        assert_eq!(cache.insert(new, now()), CacheOutcome::Replaced);
        assert!((cache.get(1).map(|s| s.raan_deg()).unwrap_or_default() - 20.0).abs() < 1e-9);

        assert_eq!(cache.insert(old, now()), CacheOutcome::Ignored);
        assert!((cache.get(1).map(|s| s.raan_deg()).unwrap_or_default() - 20.0).abs() < 1e-9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_epoch_refreshes_fetch_time() {
        let mut cache = ElementCache::new(Duration::hours(1));
        let set = make_set("STARLINK-2", 2, now(), 0.0);
        cache.insert(set.clone(), now() - Duration::hours(2));
        assert_eq!(cache.fresh(now()).count(), 0);

        assert_eq!(cache.insert(set, now()), CacheOutcome::Refreshed);
        assert_eq!(cache.fresh(now()).count(), 1);
    }

    #[test]
    fn test_evicts_by_fetch_age() {
        let mut cache = ElementCache::new(Duration::hours(6));
        cache.insert(make_set("STARLINK-1", 1, now(), 0.0), now() - Duration::hours(7));
        cache.insert(make_set("STARLINK-2", 2, now(), 0.0), now() - Duration::hours(1));

        assert_eq!(cache.evict_stale(now()), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn test_groups_by_constellation() {
        let mut cache = ElementCache::default();
        let stats = cache.extend(
            vec![
                make_set("STARLINK-1", 3, now(), 0.0),
                make_set("ONEWEB-0001", 2, now(), 0.0),
                make_set("STARLINK-2", 1, now(), 0.0),
                make_set("STARLINK-2", 1, now(), 0.0),
            ],
            now(),
        );
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.refreshed, 1);

        let groups = cache.by_constellation(now());
        assert_eq!(groups.len(), 2);
        let starlink: Vec<u32> = groups["starlink"].iter().map(|s| s.catalog_number()).collect();
        assert_eq!(starlink, vec![1, 3]);
        assert_eq!(groups["oneweb"].len(), 1);
    }
}
