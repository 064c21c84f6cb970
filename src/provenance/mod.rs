//! Append-only provenance ledger (spec.md §4.F).
//!
//! Per-agent lock-free staging, periodic merge into gzip-compressed
//! FIPS-sharded monthly logs, and a query/aggregation surface over the
//! merged shards. Module layout mirrors the teacher's `net/mod.rs`
//! re-export style.

mod entry;
mod merge;
mod query;
mod retry_policy;
mod shard;
mod staging;

pub use entry::{ProvenanceEntry, QualityRecord};
pub use merge::{MergeReport, MergeWorker, DEFAULT_QUIESCENCE};
pub use query::{
    freshness_queue, latest_per_key, query_provenance, retry_candidates, stats, FreshnessBucket,
    FreshnessEntry, ProvenanceFilter, Stats,
};
pub use retry_policy::{ensure_retryable, is_retry_due, policy_for, RetryInterval};
pub use shard::{list_all_shards, read_shard_tolerant, shard_path, ShardLocks};
pub use staging::{append_entry, list_quiescent_files, read_staging_file};
