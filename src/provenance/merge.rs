//! Periodic, single-instance merge worker (spec.md §4.F "Merge worker").
//!
//! Batches quiescent staging files into their target monthly FIPS shards,
//! deleting staging files only after every target shard has been
//! successfully appended. Grounded on the teacher's
//! `commands::stake_snapshot`-style batch-then-atomically-commit shape.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ProvenanceError;
use crate::provenance::entry::ProvenanceEntry;
use crate::provenance::shard::{self, ShardLocks};
use crate::provenance::staging;

/// Default quiescence threshold before a staging file is eligible for merge.
pub const DEFAULT_QUIESCENCE: std::time::Duration = std::time::Duration::from_secs(30);

/// Drives merge cycles, skipping a cycle if the previous one has not
/// finished (spec.md §5 "Merge worker skips its cycle if it did not
/// finish the previous one — no concurrent merges").
pub struct MergeWorker {
    staging_dir: PathBuf,
    shard_root: PathBuf,
    shards: ShardLocks,
    running: AtomicBool,
}

/// Summary of one merge cycle, returned for logging/metrics.
#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    /// Staging files successfully merged and deleted.
    pub merged_files: usize,
    /// Entries written across all target shards.
    pub entries_written: usize,
    /// Distinct target shards touched.
    pub shards_touched: usize,
}

impl MergeWorker {
    /// Builds a worker over `staging_dir` and `shard_root`.
    pub fn new(staging_dir: impl Into<PathBuf>, shard_root: impl Into<PathBuf>) -> Self {
        MergeWorker {
            staging_dir: staging_dir.into(),
            shard_root: shard_root.into(),
            shards: ShardLocks::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Runs one merge cycle. Returns `Ok(None)` without doing any work if
    /// a previous cycle is still in flight.
    pub fn run_cycle(&self, quiescence: std::time::Duration) -> Result<Option<MergeReport>, ProvenanceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let result = self.run_cycle_inner(quiescence);
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    fn run_cycle_inner(&self, quiescence: std::time::Duration) -> Result<MergeReport, ProvenanceError> {
        let files = staging::list_quiescent_files(&self.staging_dir, quiescence.as_nanos())
            .map_err(|e| ProvenanceError::Io(e.to_string()))?;
        if files.is_empty() {
            return Ok(MergeReport::default());
        }

        let mut by_shard: HashMap<PathBuf, Vec<ProvenanceEntry>> = HashMap::new();
        for file in &files {
            let entries = staging::read_staging_file(file)?;
            for entry in entries {
                let year_month = entry.ts.format("%Y-%m").to_string();
                let target = shard::shard_path(&self.shard_root, &year_month, &entry.f);
                by_shard.entry(target).or_default().push(entry);
            }
        }

        let mut entries_written = 0usize;
        for (target, entries) in &by_shard {
            self.shards.append(target, entries)?;
            entries_written += entries.len();
        }

        // All shard appends succeeded: every staging file is now durably
        // represented, so it is safe to delete them.
        for file in &files {
            let _ = std::fs::remove_file(file);
        }

        Ok(MergeReport {
            merged_files: files.len(),
            entries_written,
            shards_touched: by_shard.len(),
        })
    }
}
