//! Crate-wide error types.
//!
//! Each component defines its own narrow error enum; [`TerraLedgerError`]
//! composes them at the facade boundary, mirroring the teacher's pattern of
//! per-module `thiserror` enums folded into a single top-level error at the
//! CLI/service entry point.

use thiserror::Error;

/// Errors raised while resolving a point-in-polygon lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Latitude or longitude fell outside their valid ranges.
    #[error("invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates {
        /// Offending latitude.
        lat: f64,
        /// Offending longitude.
        lng: f64,
    },
    /// No district contains the queried point, or the requested id is absent.
    #[error("district not found")]
    DistrictNotFound,
    /// A shard failed its integrity check while being built or loaded.
    #[error("shard load failed for country {country}: {reason}")]
    ShardLoadFailed {
        /// Country partition whose shard failed to load.
        country: String,
        /// Human-readable cause.
        reason: String,
    },
    /// The request pool could not admit the request before its deadline.
    #[error("service busy, retry with jitter")]
    ServiceBusy,
}

/// Errors raised by the Merkle commitment engine.
#[derive(Debug, Error)]
pub enum MerkleError {
    /// The key has no corresponding leaf in the current snapshot.
    #[error("key not present in tree")]
    KeyNotInTree,
    /// A proof's recomputed root did not match the expected root.
    #[error("proof does not verify against the expected root")]
    InvalidProof,
    /// Compact wire-format decoding failed.
    #[error("malformed proof encoding: {0}")]
    Malformed(String),
}

/// Errors raised while synchronizing or reading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No snapshot has ever become Active.
    #[error("no active snapshot available")]
    SnapshotUnavailable,
    /// A downloaded bundle failed validation (hash or Merkle root mismatch).
    #[error("snapshot {snapshot_id} is corrupt: {reason}")]
    CorruptSnapshot {
        /// Snapshot identifier that failed validation.
        snapshot_id: String,
        /// Human-readable cause.
        reason: String,
    },
    /// Underlying I/O failure while reading or writing snapshot state.
    #[error("snapshot I/O error: {0}")]
    Io(String),
    /// The requested snapshot id is not known to the synchronizer.
    #[error("unknown snapshot id {0}")]
    UnknownSnapshot(String),
}

/// Errors raised while appending to or querying the provenance ledger.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    /// The entry failed synchronous append-time validation.
    #[error("invalid provenance entry: {0}")]
    InvalidEntry(String),
    /// A retry was requested for a key whose blocker code is classified NEVER.
    #[error("retry blocked permanently by policy for blocker code {0}")]
    PolicyBlocked(String),
    /// Underlying I/O failure while reading or writing ledger shards.
    #[error("provenance I/O error: {0}")]
    Io(String),
}

/// The union of all component errors, surfaced at the `TerraLedger` facade.
#[derive(Debug, Error)]
pub enum TerraLedgerError {
    /// A lookup-path failure.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// A Merkle engine failure.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// A snapshot synchronizer failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// A provenance ledger failure.
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
}
