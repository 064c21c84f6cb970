//! Point-in-polygon resolver (spec.md §4.C).
//!
//! Consumes the candidate id iterator from [`crate::spatial_index`],
//! fetches each candidate from the boundary store, and applies the exact
//! winding-number test. Malformed candidate geometry is logged and
//! skipped rather than failing the whole lookup, mirroring the teacher's
//! `net::availability::verify_sample` shape: fetch, verify, count and
//! report rather than propagate a hard failure for one bad sample.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::boundary_store::BoundaryStore;
use crate::district::{precision_rank, District};
use crate::error::LookupError;
use crate::spatial_index::SpatialIndex;

/// Quantizes a coordinate to six decimal places for cache keying, per
/// spec.md §6 ("Coordinates quantize to six decimals for caching").
fn quantize(value: f64) -> i64 {
    (value * 1_000_000.0).round() as i64
}

/// Cache key: `(lat₆, lon₆)`.
type CacheKey = (i64, i64);

struct CacheEntry {
    result: Option<District>,
    inserted_at: Instant,
}

/// Counters for malformed-candidate occurrences, exposed via `health()`.
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    /// Candidates whose geometry failed to parse or test, skipped.
    pub malformed_candidates: AtomicU64,
    /// Cache hits on the PIP result cache.
    pub cache_hits: AtomicU64,
    /// Cache misses requiring a fresh resolve.
    pub cache_misses: AtomicU64,
}

/// Resolves a coordinate to the finest-precision containing district,
/// backed by a bounded, TTL'd cache of hot coordinates.
pub struct Resolver {
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
    pub metrics: ResolverMetrics,
}

impl Resolver {
    /// Builds a resolver with a cache of `capacity` entries and `ttl`
    /// staleness window.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Resolver {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            metrics: ResolverMetrics::default(),
        }
    }

    /// Invalidates every cached entry (called on snapshot swap).
    pub fn invalidate_all(&self) {
        self.cache.lock().expect("resolver cache mutex poisoned").clear();
    }

    /// Resolves `(lon, lat)` against `store`/`index`, returning the
    /// finest-precision containing district, ordered results sorted
    /// ascending by precisionRank with ties broken by lexicographic id
    /// (ascending; the caller takes the first element as the winner).
    pub fn resolve_ordered(
        &self,
        store: &BoundaryStore,
        index: &SpatialIndex,
        lon: f64,
        lat: f64,
    ) -> Result<Vec<District>, LookupError> {
        let key = (quantize(lat), quantize(lon));
        if let Some(cached) = self.lookup_cache(key) {
            return Ok(cached.map(|d| vec![d]).unwrap_or_default());
        }

        let candidate_ids = index.lookup(store, lon, lat)?;
        let mut matches = Vec::new();
        for id in candidate_ids {
            match store.get(&id) {
                Ok(Some(district)) => {
                    if district.geometry.contains_point(lon, lat) {
                        matches.push(district);
                    }
                }
                Ok(None) | Err(_) => {
                    self.metrics.malformed_candidates.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        matches.sort_by(|a, b| {
            precision_rank(&a.district_type)
                .cmp(&precision_rank(&b.district_type))
                .then_with(|| a.id.cmp(&b.id))
        });

        self.store_cache(key, matches.first().cloned());
        Ok(matches)
    }

    /// Convenience wrapper returning only the winning (finest-precision)
    /// district, or `DistrictNotFound`.
    pub fn resolve(
        &self,
        store: &BoundaryStore,
        index: &SpatialIndex,
        lon: f64,
        lat: f64,
    ) -> Result<District, LookupError> {
        self.resolve_ordered(store, index, lon, lat)?
            .into_iter()
            .next()
            .ok_or(LookupError::DistrictNotFound)
    }

    fn lookup_cache(&self, key: CacheKey) -> Option<Option<District>> {
        let mut cache = self.cache.lock().expect("resolver cache mutex poisoned");
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.result.clone());
            }
            cache.pop(&key);
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn store_cache(&self, key: CacheKey, result: Option<District>) {
        let mut cache = self.cache.lock().expect("resolver cache mutex poisoned");
        cache.put(key, CacheEntry { result, inserted_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_store::write_store;
    use crate::district::{DistrictProvenance, DistrictType};
    use crate::geometry::{Bbox, MultiPolygonGeom, SimplePolygon};

    fn district(id: &str, district_type: DistrictType, min_lon: f64, min_lat: f64, size: f64) -> District {
        District {
            id: id.to_string(),
            name: "Test".to_string(),
            jurisdiction: "Testville".to_string(),
            district_type,
            geometry: MultiPolygonGeom {
                polygons: vec![SimplePolygon {
                    exterior: vec![
                        (min_lon, min_lat),
                        (min_lon + size, min_lat),
                        (min_lon + size, min_lat + size),
                        (min_lon, min_lat + size),
                        (min_lon, min_lat),
                    ],
                    interiors: vec![],
                }],
            },
            bbox: Bbox { min_lon, min_lat, max_lon: min_lon + size, max_lat: min_lat + size },
            precision_rank: precision_rank(&district_type),
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
    fn overlapping_districts_sort_by_precision_rank_then_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![
            district("usa-county-z", DistrictType::County, -120.0, 45.0, 2.0),
            district("usa-council-a", DistrictType::Council, -120.0, 45.0, 2.0),
            district("usa-council-b", DistrictType::Council, -120.0, 45.0, 2.0),
        ];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        let resolver = Resolver::new(16, Duration::from_secs(60));
        let ordered = resolver.resolve_ordered(&store, &index, -119.0, 46.0).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["usa-council-a", "usa-council-b", "usa-county-z"]);
    }

    #[test]
    fn ocean_point_is_district_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![district("usa-aa-1", DistrictType::Council, -120.0, 45.0, 1.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        let resolver = Resolver::new(16, Duration::from_secs(60));
        assert!(matches!(
            resolver.resolve(&store, &index, 0.0, 0.0),
            Err(LookupError::DistrictNotFound)
        ));
    }

    #[test]
    fn repeated_lookup_within_ttl_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let districts = vec![district("usa-aa-1", DistrictType::Council, -120.0, 45.0, 1.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let index = SpatialIndex::from_store(&store, 4, 16);
        let resolver = Resolver::new(16, Duration::from_secs(60));
        resolver.resolve(&store, &index, -119.5, 45.5).unwrap();
        resolver.resolve(&store, &index, -119.5, 45.5).unwrap();
        assert_eq!(resolver.metrics.cache_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_swap_invalidates_cache() {
        let resolver = Resolver::new(16, Duration::from_secs(60));
        resolver.store_cache((1, 1), None);
        resolver.invalidate_all();
        assert!(resolver.lookup_cache((1, 1)).is_none());
    }
}
