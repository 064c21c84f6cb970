//! Snapshot synchronizer (spec.md §4.E): discovers, downloads, validates
//! and atomically activates content-addressed snapshot bundles.
//!
//! The catalog poll/download step is a pluggable [`SnapshotSource`] trait
//! (spec.md §9's "polymorphism over boundary sources" principle — the
//! synchronizer never branches on *how* a snapshot arrived), with
//! [`LocalCatalogSource`] provided for tests and local/staging
//! deployments. Durable metadata persistence follows the teacher's
//! `net::checkpoint` atomic tmp-then-rename pattern; the Merkle-root
//! validation follows `commands::stake_snapshot`'s deterministic
//! sorted-leaf root computation.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::boundary_store::BoundaryStore;
use crate::district::District;
use crate::error::SnapshotError;
use crate::hashing::{self, Digest32};

/// Lifecycle state of a snapshot, exactly the eight states in spec.md §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    /// Not yet seen by this node.
    Unknown,
    /// A `snapshotId`/CID appeared in the catalog.
    Discovered,
    /// Bundle fetch to staging is in progress.
    Downloading,
    /// Bundle is complete and passed integrity checks.
    Validated,
    /// Currently serving reads.
    Active,
    /// A newer snapshot has become Active.
    Superseded,
    /// Kept within the retention window for rollback.
    Retained,
    /// Past the retention grace period; eligible for deletion.
    Pruned,
    /// Failed validation; never became Active.
    Rejected,
}

/// Content-addressed snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Unique snapshot identifier.
    pub snapshot_id: String,
    /// IPFS content identifier for the bundle.
    pub ipfs_cid: String,
    /// Hex-encoded Merkle root declared for this snapshot's districts.
    pub merkle_root: String,
    /// Discovery/activation timestamp, epoch millis.
    pub timestamp_ms: u64,
    /// Number of districts contained in the bundle.
    pub district_count: usize,
    /// ISO country codes covered by this snapshot.
    pub coverage: Vec<String>,
    /// Current lifecycle state.
    pub state: SnapshotState,
}

/// A pluggable source of snapshot bundles. External ingesters (a remote
/// catalog API, an IPFS gateway fetch, a local fixture directory) all
/// implement the same contract; the synchronizer never branches on which
/// one is in play.
pub trait SnapshotSource: Send + Sync {
    /// Polls for snapshots newer than any already known, in catalog order.
    fn discover(&self) -> Result<Vec<SnapshotMeta>, SnapshotError>;
    /// Downloads the bundle for `meta` into `staging_dir`, returning the
    /// districts it contains (unsorted).
    fn download(&self, meta: &SnapshotMeta, staging_dir: &Path) -> Result<Vec<District>, SnapshotError>;
    /// Independently corroborates that `meta`'s IPFS CID is reachable,
    /// beyond the Merkle-root check already performed on the downloaded
    /// bundle. Consulted by the synchronizer only when
    /// [`SynchronizerConfig::require_cid_reachable`] is set. Sources with
    /// no meaningful reachability notion (e.g. a local fixture directory)
    /// can leave this at its default of always reachable.
    fn cid_reachable(&self, _meta: &SnapshotMeta) -> Result<bool, SnapshotError> {
        Ok(true)
    }
}

/// A filesystem-backed [`SnapshotSource`] reading a local catalog
/// directory of `{snapshot_id}.json` bundle files (each a JSON array of
/// districts) alongside a `catalog.json` index of [`SnapshotMeta`].
/// Suitable for tests and local/staging deployments.
pub struct LocalCatalogSource {
    catalog_dir: PathBuf,
}

impl LocalCatalogSource {
    /// Points at a directory containing `catalog.json` and per-snapshot
    /// bundle files.
    pub fn new(catalog_dir: impl Into<PathBuf>) -> Self {
        LocalCatalogSource { catalog_dir: catalog_dir.into() }
    }
}

impl SnapshotSource for LocalCatalogSource {
    fn discover(&self) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let catalog_path = self.catalog_dir.join("catalog.json");
        match fs::read_to_string(&catalog_path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| SnapshotError::Io(e.to_string()))
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    fn download(&self, meta: &SnapshotMeta, _staging_dir: &Path) -> Result<Vec<District>, SnapshotError> {
        let bundle_path = self.catalog_dir.join(format!("{}.json", meta.snapshot_id));
        let contents = fs::read_to_string(&bundle_path).map_err(|e| SnapshotError::Io(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| SnapshotError::Io(e.to_string()))
    }
}

/// Retention/rollback policy knobs for the synchronizer.
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// How many superseded snapshots to keep for rollback.
    pub retained_snapshots: usize,
    /// Whether the synchronizer should refuse to serve a snapshot whose
    /// IPFS CID could not be corroborated reachable, even though the
    /// Merkle root verified locally (DESIGN.md Open Question resolution #3).
    pub require_cid_reachable: bool,
    /// Directory backing the active boundary-store file and staging area.
    pub data_dir: PathBuf,
}

/// Manages the lifecycle of snapshots and the currently `Active`
/// boundary store, guarded by a reader-writer lock around an `Arc` so
/// readers never block the swap beyond a short clone (spec.md §5).
pub struct Synchronizer {
    source: Box<dyn SnapshotSource>,
    config: SynchronizerConfig,
    active: RwLock<Option<Arc<BoundaryStore>>>,
    active_meta: RwLock<Option<SnapshotMeta>>,
    history: RwLock<VecDeque<SnapshotMeta>>,
}

impl Synchronizer {
    /// Builds a synchronizer around `source`, with no Active snapshot yet.
    pub fn new(source: Box<dyn SnapshotSource>, config: SynchronizerConfig) -> Self {
        Synchronizer {
            source,
            config,
            active: RwLock::new(None),
            active_meta: RwLock::new(None),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Returns a cloned handle to the currently Active store, or
    /// [`SnapshotError::SnapshotUnavailable`] on cold start.
    pub fn active_store(&self) -> Result<Arc<BoundaryStore>, SnapshotError> {
        self.active
            .read()
            .expect("active store lock poisoned")
            .clone()
            .ok_or(SnapshotError::SnapshotUnavailable)
    }

    /// Current Active snapshot's metadata, if any.
    pub fn active_meta(&self) -> Option<SnapshotMeta> {
        self.active_meta.read().expect("active meta lock poisoned").clone()
    }

    /// Every known snapshot's metadata, most recent first.
    pub fn list_snapshots(&self) -> Vec<SnapshotMeta> {
        self.history.read().expect("history lock poisoned").iter().cloned().collect()
    }

    /// Runs one synchronization cycle: discover → download → validate →
    /// activate, for every newly discovered snapshot in catalog order.
    pub fn sync_once(&self) -> Result<(), SnapshotError> {
        for mut meta in self.source.discover()? {
            if self
                .active_meta()
                .map(|m| m.snapshot_id == meta.snapshot_id)
                .unwrap_or(false)
            {
                continue; // idempotent: re-activating the Active snapshot is a no-op
            }
            meta.state = SnapshotState::Discovered;
            meta.state = SnapshotState::Downloading;
            let staging_dir = self.config.data_dir.join("staging").join(&meta.snapshot_id);
            let districts = match self.source.download(&meta, &staging_dir) {
                Ok(d) => d,
                Err(err) => {
                    meta.state = SnapshotState::Rejected;
                    self.history.write().expect("history lock poisoned").push_front(meta);
                    return Err(err);
                }
            };

            let expected_root = hashing::from_hex(&meta.merkle_root)
                .map_err(|e| SnapshotError::CorruptSnapshot { snapshot_id: meta.snapshot_id.clone(), reason: e })?;
            let store_path = self.config.data_dir.join(format!("{}.bin", meta.snapshot_id));
            let computed_root = crate::boundary_store::write_store(&store_path, &districts)?;
            if computed_root != expected_root {
                meta.state = SnapshotState::Rejected;
                self.history.write().expect("history lock poisoned").push_front(meta);
                return Err(SnapshotError::CorruptSnapshot {
                    snapshot_id: meta.snapshot_id.clone(),
                    reason: "computed Merkle root does not match declared root".to_string(),
                });
            }
            if districts.len() != meta.district_count {
                meta.state = SnapshotState::Rejected;
                self.history.write().expect("history lock poisoned").push_front(meta);
                return Err(SnapshotError::CorruptSnapshot {
                    snapshot_id: meta.snapshot_id.clone(),
                    reason: "district count does not match declared count".to_string(),
                });
            }
            if self.config.require_cid_reachable && !self.source.cid_reachable(&meta)? {
                meta.state = SnapshotState::Rejected;
                self.history.write().expect("history lock poisoned").push_front(meta);
                return Err(SnapshotError::CorruptSnapshot {
                    snapshot_id: meta.snapshot_id.clone(),
                    reason: "IPFS CID could not be corroborated reachable".to_string(),
                });
            }
            meta.state = SnapshotState::Validated;

            let store = BoundaryStore::open(&store_path, expected_root)?;
            self.activate(meta, store)?;
        }
        Ok(())
    }

    /// Atomically swaps in `store` as the new Active snapshot. The
    /// previous Active snapshot (if any) transitions to Superseded;
    /// readers already holding its `Arc` continue to completion, it is
    /// dropped once the last reader releases it (spec.md §5).
    fn activate(&self, mut meta: SnapshotMeta, store: BoundaryStore) -> Result<(), SnapshotError> {
        meta.state = SnapshotState::Active;
        {
            let mut active = self.active.write().expect("active store lock poisoned");
            *active = Some(Arc::new(store));
        }
        {
            let mut active_meta = self.active_meta.write().expect("active meta lock poisoned");
            if let Some(mut previous) = active_meta.replace(meta.clone()) {
                previous.state = SnapshotState::Superseded;
                self.history.write().expect("history lock poisoned").push_front(previous);
            }
        }
        self.history.write().expect("history lock poisoned").push_front(meta);
        self.enforce_retention();
        Ok(())
    }

    /// Keeps only the configured number of Superseded snapshots Retained;
    /// older ones transition to Pruned.
    fn enforce_retention(&self) {
        let mut history = self.history.write().expect("history lock poisoned");
        let mut retained_seen = 0usize;
        for meta in history.iter_mut() {
            match meta.state {
                SnapshotState::Superseded => {
                    meta.state = SnapshotState::Retained;
                    retained_seen += 1;
                }
                SnapshotState::Retained if retained_seen >= self.config.retained_snapshots => {
                    meta.state = SnapshotState::Pruned;
                }
                SnapshotState::Retained => {
                    retained_seen += 1;
                }
                _ => {}
            }
        }
    }

    /// Manual rollback: re-activates a Retained snapshot by id, same
    /// atomic swap path as a fresh activation.
    pub fn rollback_to(&self, snapshot_id: &str) -> Result<(), SnapshotError> {
        if self
            .active_meta()
            .map(|m| m.snapshot_id == snapshot_id)
            .unwrap_or(false)
        {
            return Ok(()); // idempotent: re-activating the Active snapshot is a no-op
        }
        let meta = {
            let history = self.history.read().expect("history lock poisoned");
            history
                .iter()
                .find(|m| m.snapshot_id == snapshot_id && m.state == SnapshotState::Retained)
                .cloned()
                .ok_or_else(|| SnapshotError::UnknownSnapshot(snapshot_id.to_string()))?
        };
        let store_path = self.config.data_dir.join(format!("{}.bin", meta.snapshot_id));
        let expected_root = hashing::from_hex(&meta.merkle_root)
            .map_err(|e| SnapshotError::CorruptSnapshot { snapshot_id: meta.snapshot_id.clone(), reason: e })?;
        let store = BoundaryStore::open(&store_path, expected_root)?;
        self.history.write().expect("history lock poisoned").retain(|m| m.snapshot_id != snapshot_id);
        self.activate(meta, store)
    }
}

/// Computes the content digest used to label a downloaded bundle on disk,
/// independent of the Merkle root (used to corroborate CID reachability).
pub fn bundle_content_digest(bytes: &[u8]) -> Digest32 {
    hashing::content_digest(bytes)
}
