//! Hierarchical spatial index (spec.md §4.B): stage 1 country routing,
//! stage 2 LRU shard cache, stage 3 STR bulk-load (delegated to
//! [`crate::rtree`]), stage 4 BFS query.
//!
//! The shard cache is grounded on the teacher's `net::stake_registry`
//! load/save-backed registry keyed by a string id, adapted here to an
//! `lru`-cached map of R-tree shards (the `lru` crate itself is grounded
//! on `starkware-libs-sequencer`'s dependency graph).

use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::boundary_store::BoundaryStore;
use crate::error::LookupError;
use crate::geometry::Bbox;
use crate::rtree::{LeafEntry, RTree, DEFAULT_NODE_CAPACITY};

/// Country-level routing entry (stage 1).
#[derive(Debug, Clone)]
struct CountryEntry {
    bbox: Bbox,
}

/// Counters backing the `health()` operation's index-related fields.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    /// Country-table scans that found at least one containing partition.
    pub country_hits: AtomicU64,
    /// Country-table scans that found no containing partition.
    pub country_misses: AtomicU64,
    /// Shard cache hits.
    pub shard_hits: AtomicU64,
    /// Shard cache misses (triggering a build).
    pub shard_builds: AtomicU64,
    /// Shards evicted from the LRU cache.
    pub shard_evictions: AtomicU64,
}

/// Two-stage spatial index: a small in-memory country table plus an LRU
/// cache of lazily-built per-country R-tree shards.
pub struct SpatialIndex {
    countries: Vec<(String, CountryEntry)>,
    shards: Mutex<LruCache<String, RTree>>,
    node_capacity: usize,
    pub metrics: IndexMetrics,
}

impl SpatialIndex {
    /// Builds the stage-1 country table from every district bbox in
    /// `store`, bucketed by derived country code.
    pub fn from_store(store: &BoundaryStore, max_countries_in_memory: usize, node_capacity: usize) -> Self {
        let mut by_country: std::collections::BTreeMap<String, Bbox> = std::collections::BTreeMap::new();
        for (id, bbox) in store.range_query(&Bbox {
            min_lon: f64::NEG_INFINITY,
            min_lat: f64::NEG_INFINITY,
            max_lon: f64::INFINITY,
            max_lat: f64::INFINITY,
        }) {
            let country = crate::district::derive_country_code(&id, None);
            by_country
                .entry(country)
                .and_modify(|b| *b = b.union(&bbox))
                .or_insert(bbox);
        }
        let countries = by_country
            .into_iter()
            .map(|(code, bbox)| (code, CountryEntry { bbox }))
            .collect();
        let capacity = NonZeroUsize::new(max_countries_in_memory.max(1)).unwrap();
        SpatialIndex {
            countries,
            shards: Mutex::new(LruCache::new(capacity)),
            node_capacity: if node_capacity == 0 { DEFAULT_NODE_CAPACITY } else { node_capacity },
            metrics: IndexMetrics::default(),
        }
    }

    /// Stage 1: countries whose bbox contains the point. Usually exactly
    /// one; more than one only in border/overlap cases.
    fn country_candidates(&self, lon: f64, lat: f64) -> Vec<&str> {
        let hits: Vec<&str> = self
            .countries
            .iter()
            .filter(|(_, entry)| entry.bbox.contains_point(lon, lat))
            .map(|(code, _)| code.as_str())
            .collect();
        if hits.is_empty() {
            self.metrics.country_misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.country_hits.fetch_add(1, Ordering::Relaxed);
        }
        hits
    }

    /// Stages 2–4: for each candidate country, fetch (or build) its shard
    /// and query it for candidate district ids containing the point.
    /// Returns an empty vector, not an error, when no country contains the
    /// point (ocean, Antarctica) — per spec.md §4.B failure semantics.
    pub fn lookup(&self, store: &BoundaryStore, lon: f64, lat: f64) -> Result<Vec<String>, LookupError> {
        let mut candidates = Vec::new();
        for country in self.country_candidates(lon, lat) {
            self.ensure_shard(store, country)?;
            let mut shards = self.shards.lock().expect("shard cache mutex poisoned");
            if let Some(tree) = shards.get(country) {
                candidates.extend(tree.query_point(lon, lat));
            }
        }
        Ok(candidates)
    }

    /// Builds and caches the shard for `country` if it is not already
    /// cached, evicting the least-recently-used shard if the cache is full.
    fn ensure_shard(&self, store: &BoundaryStore, country: &str) -> Result<(), LookupError> {
        {
            let mut shards = self.shards.lock().expect("shard cache mutex poisoned");
            if shards.get(country).is_some() {
                self.metrics.shard_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        let entries: Vec<LeafEntry> = store
            .ids_for_country(country)
            .into_iter()
            .map(|(id, bbox)| LeafEntry { id, bbox })
            .collect();
        if entries.is_empty() {
            return Err(LookupError::ShardLoadFailed {
                country: country.to_string(),
                reason: "no districts found for country partition".to_string(),
            });
        }
        let tree = RTree::build_str(entries, self.node_capacity);
        self.metrics.shard_builds.fetch_add(1, Ordering::Relaxed);
        let mut shards = self.shards.lock().expect("shard cache mutex poisoned");
        if shards.put(country.to_string(), tree).is_some() {
            self.metrics.shard_evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Proactively builds shards for `countries`. The preload strategy
    /// (timezone-aware, event-driven, traffic-predicted, ...) is policy
    /// decided by the caller; this index only honors the request.
    pub fn preload(&self, store: &BoundaryStore, countries: &[String]) -> Result<(), LookupError> {
        for country in countries {
            self.ensure_shard(store, country)?;
        }
        Ok(())
    }

    /// Number of countries currently tracked in the stage-1 table.
    pub fn country_count(&self) -> usize {
        self.countries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_store::write_store;
    use crate::district::{DistrictProvenance, DistrictType};
    use crate::geometry::{MultiPolygonGeom, SimplePolygon};

    fn sample_district(id: &str, min_lon: f64, min_lat: f64) -> crate::district::District {
        crate::district::District {
            id: id.to_string(),
            name: "Test".to_string(),
            jurisdiction: "Testville".to_string(),
            district_type: DistrictType::Council,
            geometry: MultiPolygonGeom {
                polygons: vec![SimplePolygon {
                    exterior: vec![
                        (min_lon, min_lat),
                        (min_lon + 1.0, min_lat),
                        (min_lon + 1.0, min_lat + 1.0),
                        (min_lon, min_lat + 1.0),
                        (min_lon, min_lat),
                    ],
                    interiors: vec![],
                }],
            },
            bbox: Bbox { min_lon, min_lat, max_lon: min_lon + 1.0, max_lat: min_lat + 1.0 },
            precision_rank: 0,
            provenance: DistrictProvenance {
                source_url: "https://example.test".to_string(),
                authority_level: 3,
                license: "CC0".to_string(),
                retrieved_at: chrono::Utc::now(),
                data_version: "v1".to_string(),
                content_hash: "deadbeef".to_string(),
            },
        }
    }

    #[test]
    fn lookup_in_ocean_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![sample_district("usa-aa-1", -120.0, 45.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        let hits = index.lookup(&store, 0.0, 0.0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn lookup_finds_containing_district() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![sample_district("usa-aa-1", -120.0, 45.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        let hits = index.lookup(&store, -119.5, 45.5).unwrap();
        assert_eq!(hits, vec!["usa-aa-1".to_string()]);
    }

    #[test]
    fn shard_cache_reuses_built_shard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![sample_district("usa-aa-1", -120.0, 45.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        index.lookup(&store, -119.5, 45.5).unwrap();
        index.lookup(&store, -119.5, 45.5).unwrap();
        assert_eq!(index.metrics.shard_builds.load(Ordering::Relaxed), 1);
        assert!(index.metrics.shard_hits.load(Ordering::Relaxed) >= 1);
    }
}
