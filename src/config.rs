//! Service configuration (spec.md §6 configuration table).
//!
//! Persisted as JSON with the teacher's missing-file-is-default
//! semantics (`net::stake_registry::StakeRegistry::load`/`save`) rather
//! than a config-crate layering, since the teacher's durable state is
//! always plain JSON with atomic writes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Every tunable the service reads at startup; all fields have spec-given
/// defaults so a missing config file is equivalent to [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of boundary-store staging and active snapshot files.
    pub cache_dir: PathBuf,
    /// LRU capacity for R-tree country shards held in memory.
    pub max_countries_in_memory: usize,
    /// R-tree fan-out (node capacity `K`).
    pub node_capacity: usize,
    /// Point-in-polygon hot-coordinate result cache capacity.
    pub pip_cache_size: usize,
    /// Point-in-polygon hot-coordinate result cache entry TTL, in seconds.
    pub pip_cache_ttl_secs: u64,
    /// How often, in seconds, to poll for a new snapshot.
    pub snapshot_poll_interval_secs: u64,
    /// Number of superseded snapshots retained before pruning.
    pub retained_snapshots: usize,
    /// How often, in seconds, the provenance merge worker runs a cycle.
    pub merge_interval_secs: u64,
    /// Rate-limit hint (requests/minute) forwarded to the HTTP collaborator
    /// responsible for discovery fetches; not enforced in-process.
    pub rate_limit_per_minute: u32,
    /// Per-request timeout, in milliseconds, forwarded to the same
    /// collaborator.
    pub request_timeout_ms: u64,
    /// Maximum concurrent in-flight lookup requests before shedding load.
    pub request_pool_capacity: usize,
    /// How long a lookup waits for a free request-pool permit before
    /// returning `ServiceBusy`, in milliseconds.
    pub request_acquire_timeout_ms: u64,
    /// Whether `currentSnapshot`/sync validation requires the snapshot's
    /// IPFS CID to be independently reachable, or accepts Merkle-root
    /// validation alone.
    pub require_cid_reachable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: PathBuf::from("./data"),
            max_countries_in_memory: 16,
            node_capacity: 16,
            pip_cache_size: 10_000,
            pip_cache_ttl_secs: 300,
            snapshot_poll_interval_secs: 60,
            retained_snapshots: 3,
            merge_interval_secs: 30,
            rate_limit_per_minute: 60,
            request_timeout_ms: 10_000,
            request_pool_capacity: 64,
            request_acquire_timeout_ms: 500,
            require_cid_reachable: true,
        }
    }
}

impl Config {
    /// Loads config from `path`; a missing file yields [`Config::default`].
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }

    /// Persists config to `path` as pretty JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| e.to_string())?;
        fs::write(path, data).map_err(|e| e.to_string())
    }

    /// The PIP cache entry TTL as a [`Duration`].
    pub fn pip_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pip_cache_ttl_secs)
    }

    /// The snapshot poll interval as a [`Duration`].
    pub fn snapshot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_poll_interval_secs)
    }

    /// The merge worker interval as a [`Duration`].
    pub fn merge_interval(&self) -> Duration {
        Duration::from_secs(self.merge_interval_secs)
    }

    /// The request-pool permit acquire timeout as a [`Duration`].
    pub fn request_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.request_acquire_timeout_ms)
    }
}
