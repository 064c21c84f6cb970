#![deny(missing_docs)]

//! `terraledger` is a content-addressed geospatial district lookup
//! service: given a point, it resolves the finest-precision
//! administrative district containing it and returns a compact Merkle
//! inclusion proof that the answer is present in the currently active,
//! content-addressed snapshot.
//!
//! The crate is organized as five collaborating components:
//!
//! * [`boundary_store`] — the read-only, memory-mapped per-snapshot
//!   district store.
//! * [`spatial_index`] — the hierarchical (country table + R-tree shard)
//!   spatial index.
//! * [`resolver`] — exact point-in-polygon resolution with a hot-coordinate
//!   cache.
//! * [`merkle`] — the fixed-depth sparse Merkle tree and compact proof
//!   format.
//! * [`snapshot`] — the content-addressed snapshot synchronizer.
//! * [`provenance`] — the append-only discovery provenance ledger.
//!
//! [`TerraLedger`] wires these into the five external operations spec'd
//! at the service boundary: `lookupByPoint`, `districtById`,
//! `currentSnapshot`, `listSnapshots`, and `health`. Translating these to
//! an HTTP/JSON surface is left to a collaborator outside this crate —
//! `TerraLedger`'s method signatures and `Result` error types are the
//! entire boundary contract.

pub mod boundary_store;
pub mod concurrency;
pub mod config;
pub mod district;
pub mod error;
pub mod geometry;
pub mod hashing;
pub mod merkle;
pub mod metrics;
pub mod provenance;
pub mod resolver;
pub mod rtree;
pub mod snapshot;
pub mod spatial_index;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::boundary_store::BoundaryStore;
use crate::config::Config;
use crate::district::District;
use crate::error::{LookupError, ProvenanceError, TerraLedgerError};
use crate::merkle::{CompactProof, MerkleProof};
use crate::metrics::{HealthReport, Metrics};
use crate::provenance::MergeWorker;
use crate::resolver::Resolver;
use crate::snapshot::{Synchronizer, SynchronizerConfig};
use crate::spatial_index::SpatialIndex;

/// `{district, merkleProof, cacheHit, latencyMs}`, the `lookupByPoint`
/// response payload (spec.md §6).
#[derive(Debug, Clone)]
pub struct PointLookup {
    /// The resolved district.
    pub district: District,
    /// Compact inclusion proof against the active snapshot's Merkle root.
    pub merkle_proof: CompactProof,
    /// Whether the PIP resolver cache served this answer.
    pub cache_hit: bool,
    /// Wall-clock latency of the lookup, in milliseconds.
    pub latency_ms: u64,
}

/// `{merkleProof}`, the `districtById` response payload.
#[derive(Debug, Clone)]
pub struct DistrictLookup {
    /// The resolved district.
    pub district: District,
    /// Compact inclusion proof against the active snapshot's Merkle root.
    pub merkle_proof: CompactProof,
}

/// `{snapshotId, ipfsCID, merkleRoot, timestamp, districtCount, coverage}`,
/// the `currentSnapshot` response payload.
#[derive(Debug, Clone)]
pub struct CurrentSnapshot {
    /// Unique snapshot identifier.
    pub snapshot_id: String,
    /// IPFS content identifier for the bundle.
    pub ipfs_cid: String,
    /// Hex-encoded Merkle root.
    pub merkle_root: String,
    /// Activation timestamp, epoch millis.
    pub timestamp: u64,
    /// Number of districts in the snapshot.
    pub district_count: usize,
    /// ISO country codes covered.
    pub coverage: Vec<String>,
}

/// Installs a process-wide `tracing` subscriber: compact formatting to
/// stdout, level filtered by `RUST_LOG` (default `info` if unset or
/// unparsable). Intended to be called once by whatever binary embeds
/// this crate; a second call is a harmless no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The service facade: the single entry point wiring the synchronizer,
/// spatial index, resolver, and provenance ledger into the five
/// operations spec'd at the external boundary.
pub struct TerraLedger {
    config: Config,
    synchronizer: Synchronizer,
    index: std::sync::RwLock<Option<SpatialIndex>>,
    resolver: Resolver,
    merge_worker: MergeWorker,
    metrics: Metrics,
    request_pool: concurrency::RequestPool,
}

impl TerraLedger {
    /// Builds a service instance around `config` and `synchronizer`, with
    /// no active snapshot until [`TerraLedger::sync_once`] succeeds.
    pub fn new(config: Config, synchronizer: Synchronizer) -> Self {
        let staging_dir = config.cache_dir.join("provenance").join("staging");
        let shard_root = config.cache_dir.join("provenance").join("shards");
        let request_pool =
            concurrency::RequestPool::new(config.request_pool_capacity, config.request_acquire_timeout());
        TerraLedger {
            resolver: Resolver::new(config.pip_cache_size, config.pip_cache_ttl()),
            merge_worker: MergeWorker::new(staging_dir, shard_root),
            index: std::sync::RwLock::new(None),
            synchronizer,
            config,
            metrics: Metrics::new(),
            request_pool,
        }
    }

    /// Runs one synchronization cycle and, on success, rebuilds the
    /// spatial index and invalidates the resolver cache for the new
    /// snapshot (spec.md §5 "swap invalidates the PIP cache").
    pub fn sync_once(&self) -> Result<(), TerraLedgerError> {
        self.synchronizer.sync_once()?;
        let store = self.synchronizer.active_store()?;
        let built = SpatialIndex::from_store(&store, self.config.max_countries_in_memory, self.config.node_capacity);
        *self.index.write().expect("index lock poisoned") = Some(built);
        self.resolver.invalidate_all();
        info!(districts = store.len(), "activated snapshot");
        Ok(())
    }

    /// Runs one provenance merge cycle, a no-op if a previous cycle is
    /// still in flight.
    pub fn merge_provenance_once(&self) -> Result<(), TerraLedgerError> {
        match self.merge_worker.run_cycle(provenance::DEFAULT_QUIESCENCE) {
            Ok(Some(report)) => {
                info!(
                    files = report.merged_files,
                    entries = report.entries_written,
                    "merged provenance staging"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(error = %err, "provenance merge cycle failed");
                Err(err.into())
            }
        }
    }

    /// Spawns the three background tasks (spec.md §5): periodic snapshot
    /// sync, periodic provenance merge, and periodic preload of the
    /// configured country set. Each runs on its own interval so a slow
    /// cycle in one never stalls another; the caller owns the returned
    /// pool and aborts it on shutdown.
    pub fn spawn_background_tasks(
        self: std::sync::Arc<Self>,
        preload_countries: Vec<String>,
    ) -> concurrency::BackgroundPool {
        let mut pool = concurrency::BackgroundPool::new();

        let sync_target = std::sync::Arc::clone(&self);
        pool.track(concurrency::spawn_interval_task(
            sync_target.config.snapshot_poll_interval(),
            move || {
                let target = std::sync::Arc::clone(&sync_target);
                async move {
                    if let Err(err) = target.sync_once() {
                        warn!(error = %err, "snapshot sync cycle failed");
                    }
                }
            },
        ));

        let merge_target = std::sync::Arc::clone(&self);
        pool.track(concurrency::spawn_interval_task(
            merge_target.config.merge_interval(),
            move || {
                let target = std::sync::Arc::clone(&merge_target);
                async move {
                    if let Err(err) = target.merge_provenance_once() {
                        warn!(error = %err, "provenance merge cycle failed");
                    }
                }
            },
        ));

        if !preload_countries.is_empty() {
            let preload_target = std::sync::Arc::clone(&self);
            pool.track(concurrency::spawn_interval_task(
                preload_target.config.snapshot_poll_interval(),
                move || {
                    let target = std::sync::Arc::clone(&preload_target);
                    let countries = preload_countries.clone();
                    async move {
                        let store = match target.synchronizer.active_store() {
                            Ok(store) => store,
                            Err(_) => return,
                        };
                        let index_guard = target.index.read().expect("index lock poisoned");
                        if let Some(index) = index_guard.as_ref() {
                            if let Err(err) = index.preload(&store, &countries) {
                                warn!(error = %err, "shard preload failed");
                            }
                        }
                    }
                },
            ));
        }

        pool
    }

    fn proof_for(&self, store: &BoundaryStore, id: &str) -> Result<CompactProof, TerraLedgerError> {
        let index = store
            .leaf_index(id)
            .ok_or_else(|| TerraLedgerError::Lookup(LookupError::DistrictNotFound))?;
        let leaves = store.leaf_digests();
        let proof: MerkleProof =
            merkle::build_proof(&leaves, index).map_err(TerraLedgerError::Merkle)?;
        merkle::verify_proof_against_root(&proof, &store.declared_root)
            .map_err(TerraLedgerError::Merkle)?;
        Ok((&proof).into())
    }

    /// `lookupByPoint`: resolves the finest-precision district containing
    /// `(lat, lng)` and returns it alongside a compact inclusion proof.
    pub fn lookup_by_point(&self, lat: f64, lng: f64) -> Result<PointLookup, TerraLedgerError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            self.metrics.record_error();
            return Err(TerraLedgerError::Lookup(LookupError::InvalidCoordinates { lat, lng }));
        }

        let started = Instant::now();
        let store = self.synchronizer.active_store()?;
        let index_guard = self.index.read().expect("index lock poisoned");
        let index = index_guard.as_ref().ok_or(LookupError::DistrictNotFound)?;

        let hits_before = self.resolver.metrics.cache_hits.load(std::sync::atomic::Ordering::Relaxed);
        let district = match self.resolver.resolve(&store, index, lng, lat) {
            Ok(d) => d,
            Err(err) => {
                self.metrics.record_error();
                return Err(err.into());
            }
        };
        let cache_hit =
            self.resolver.metrics.cache_hits.load(std::sync::atomic::Ordering::Relaxed) > hits_before;
        self.metrics.record_cache(cache_hit);

        let merkle_proof = self.proof_for(&store, &district.id)?;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_latency(started.elapsed());

        Ok(PointLookup { district, merkle_proof, cache_hit, latency_ms })
    }

    /// `districtById`: fetches a district directly by id and returns its
    /// inclusion proof.
    pub fn district_by_id(&self, id: &str) -> Result<DistrictLookup, TerraLedgerError> {
        let store = self.synchronizer.active_store()?;
        let district = store
            .get(id)
            .map_err(crate::error::TerraLedgerError::Snapshot)?
            .ok_or(LookupError::DistrictNotFound)?;
        let merkle_proof = self.proof_for(&store, id)?;
        Ok(DistrictLookup { district, merkle_proof })
    }

    /// `currentSnapshot`: metadata for the currently Active snapshot.
    pub fn current_snapshot(&self) -> Result<CurrentSnapshot, TerraLedgerError> {
        let meta = self
            .synchronizer
            .active_meta()
            .ok_or(crate::error::SnapshotError::SnapshotUnavailable)?;
        Ok(CurrentSnapshot {
            snapshot_id: meta.snapshot_id,
            ipfs_cid: meta.ipfs_cid,
            merkle_root: meta.merkle_root,
            timestamp: meta.timestamp_ms,
            district_count: meta.district_count,
            coverage: meta.coverage,
        })
    }

    /// `listSnapshots`: every known snapshot's metadata, most recent first.
    pub fn list_snapshots(&self) -> Vec<snapshot::SnapshotMeta> {
        self.synchronizer.list_snapshots()
    }

    /// `health`: current service health summary.
    pub fn health(&self) -> HealthReport {
        let snapshot_age = self
            .synchronizer
            .active_meta()
            .map(|meta| {
                let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
                Duration::from_millis(now_ms.saturating_sub(meta.timestamp_ms))
            })
            .unwrap_or(Duration::ZERO);
        let has_active = self.synchronizer.active_store().is_ok();
        self.metrics.snapshot(snapshot_age, has_active)
    }

    /// The request pool gating concurrent blocking lookups.
    pub fn request_pool(&self) -> &concurrency::RequestPool {
        &self.request_pool
    }

    /// Appends a provenance entry to the staging area. Rejected
    /// synchronously if the entry fails validation.
    pub fn append_provenance(&self, entry: &provenance::ProvenanceEntry) -> Result<PathBuf, TerraLedgerError> {
        let staging_dir = self.config.cache_dir.join("provenance").join("staging");
        provenance::append_entry(&staging_dir, entry).map_err(TerraLedgerError::from)
    }

    /// Checks whether `fips`'s latest provenance entry currently permits a
    /// retry, consulting the retry policy table. Returns
    /// [`TerraLedgerError::Provenance`]`(`[`ProvenanceError::PolicyBlocked`]`)`
    /// if its blocker code is classified NEVER; a caller driving a discovery
    /// agent should consult this before attempting to re-fetch a blocked
    /// district.
    pub fn check_retry_eligible(&self, fips: &str) -> Result<(), TerraLedgerError> {
        let staging_dir = self.config.cache_dir.join("provenance").join("staging");
        let shard_root = self.config.cache_dir.join("provenance").join("shards");
        let filter = provenance::ProvenanceFilter { fips: Some(fips.to_string()), ..Default::default() };
        let entries = provenance::query_provenance(&shard_root, &staging_dir, &filter)
            .map_err(|e| TerraLedgerError::Provenance(ProvenanceError::Io(e.to_string())))?;
        if let Some(latest) = provenance::latest_per_key(&entries).into_iter().next() {
            provenance::ensure_retryable(&latest).map_err(TerraLedgerError::Provenance)?;
        }
        Ok(())
    }
}
