//! Provenance entry type and append-time validation (spec.md §3, §4.F).
//!
//! Field names mirror the compact serialization spec.md prescribes
//! (`f`, `n`, `g`, `conf`, `auth`, ...) to keep entries near the §3
//! storage-sizing budget. Validate-on-read/append follows the teacher's
//! `data::parse_record`/`verify_record_lines` discipline of rejecting a
//! malformed record immediately rather than storing it and failing later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProvenanceError;

/// Data-quality sub-record attached to a provenance entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityRecord {
    /// Whether the boundary geometry parsed and validated.
    pub valid: bool,
    /// Whether topology checks (self-intersection, ring orientation) passed.
    pub topology: bool,
    /// Source response time in milliseconds.
    #[serde(rename = "responseMs")]
    pub response_ms: u32,
    /// Vintage/year of the underlying data, if reported by the source.
    pub vintage: Option<u16>,
}

/// One audit record of a single discovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvenanceEntry {
    /// FIPS / district key. Required.
    pub f: String,
    /// Name, if resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// State or region, if resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Population, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<u64>,
    /// Discovery granularity tier, 0–4. Required.
    pub g: u8,
    /// Feature count in the retrieved source, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fc: Option<u32>,
    /// Confidence, 0–100. Required.
    pub conf: u8,
    /// Authority level, 0–5. Required.
    pub auth: u8,
    /// Source identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Source URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Data-quality sub-record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<QualityRecord>,
    /// Reasoning chain. Non-empty, required.
    pub why: Vec<String>,
    /// Discovery tier ids attempted before this result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tried: Vec<u8>,
    /// Blocker code, if this attempt did not yield a finer-grain boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
    /// ISO-8601 timestamp. Required.
    pub ts: DateTime<Utc>,
    /// Agent id that produced this entry. Required.
    pub aid: String,
}

impl ProvenanceEntry {
    /// Validates the required fields and ranges spec.md §3 lists for
    /// append-time validation. Rejects the entry rather than storing it.
    pub fn validate(&self) -> Result<(), ProvenanceError> {
        if self.f.trim().is_empty() {
            return Err(ProvenanceError::InvalidEntry("missing FIPS/district key".to_string()));
        }
        if self.aid.trim().is_empty() {
            return Err(ProvenanceError::InvalidEntry("missing agent id".to_string()));
        }
        if self.g > 4 {
            return Err(ProvenanceError::InvalidEntry(format!("tier {} out of range 0..=4", self.g)));
        }
        if self.conf > 100 {
            return Err(ProvenanceError::InvalidEntry(format!(
                "confidence {} out of range 0..=100",
                self.conf
            )));
        }
        if self.auth > 5 {
            return Err(ProvenanceError::InvalidEntry(format!(
                "authority {} out of range 0..=5",
                self.auth
            )));
        }
        if self.why.is_empty() {
            return Err(ProvenanceError::InvalidEntry("reasoning chain must be non-empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_entry() -> ProvenanceEntry {
        ProvenanceEntry {
            f: "0666000".to_string(),
            n: None,
            s: None,
            p: None,
            g: 1,
            fc: None,
            conf: 85,
            auth: 3,
            src: None,
            url: None,
            q: None,
            why: vec!["T1 success".to_string()],
            tried: vec![0, 1],
            blocked: None,
            ts: "2025-11-19T07:42:00Z".parse().unwrap(),
            aid: "agt-001".to_string(),
        }
    }

    #[test]
    fn valid_entry_passes() {
        assert!(valid_entry().validate().is_ok());
    }

    #[test]
    fn empty_reasoning_chain_is_rejected() {
        let mut entry = valid_entry();
        entry.why.clear();
        assert!(entry.validate().is_err());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let mut entry = valid_entry();
        entry.conf = 101;
        assert!(entry.validate().is_err());
    }

    #[test]
    fn out_of_range_tier_is_rejected() {
        let mut entry = valid_entry();
        entry.g = 5;
        assert!(entry.validate().is_err());
    }
}
