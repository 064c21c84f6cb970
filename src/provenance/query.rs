//! Query and aggregation surface over the provenance ledger (spec.md §4.F
//! "Query path" and "Aggregation queries").
//!
//! Streams every month-shard (and the staging area) in the filter's date
//! range, applying predicates as an AND, folding where needed. Grounded
//! on the teacher's `log_parser`'s stream-parse-then-fold shape.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::provenance::entry::ProvenanceEntry;
use crate::provenance::retry_policy::is_retry_due;
use crate::provenance::shard;
use crate::provenance::staging;

/// Filter predicates for [`query`]. All set fields compose as AND.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceFilter {
    /// Restrict to this discovery tier.
    pub tier: Option<u8>,
    /// Restrict to this state/region.
    pub state: Option<String>,
    /// Minimum confidence, inclusive.
    pub min_confidence: Option<u8>,
    /// Restrict to this FIPS/district key.
    pub fips: Option<String>,
    /// Restrict to this blocker code.
    pub blocker_code: Option<String>,
    /// Restrict to entries with `ts >= from`.
    pub from: Option<DateTime<Utc>>,
    /// Restrict to entries with `ts <= to`.
    pub to: Option<DateTime<Utc>>,
}

impl ProvenanceFilter {
    fn matches(&self, entry: &ProvenanceEntry) -> bool {
        if let Some(tier) = self.tier {
            if entry.g != tier {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if entry.s.as_deref() != Some(state.as_str()) {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_confidence {
            if entry.conf < min_confidence {
                return false;
            }
        }
        if let Some(fips) = &self.fips {
            if &entry.f != fips {
                return false;
            }
        }
        if let Some(blocker) = &self.blocker_code {
            if entry.blocked.as_deref() != Some(blocker.as_str()) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.ts < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.ts > to {
                return false;
            }
        }
        true
    }
}

/// Streams every shard plus the staging area, applying `filter` as an AND
/// of its set predicates.
pub fn query_provenance(
    shard_root: &Path,
    staging_dir: &Path,
    filter: &ProvenanceFilter,
) -> std::io::Result<Vec<ProvenanceEntry>> {
    let mut out = Vec::new();
    for shard_path in shard::list_all_shards(shard_root)? {
        if let Ok(entries) = shard::read_shard_tolerant(&shard_path) {
            out.extend(entries.into_iter().filter(|e| filter.matches(e)));
        }
    }
    for staging_path in staging::list_quiescent_files(staging_dir, 0)? {
        if let Ok(entries) = staging::read_staging_file(&staging_path) {
            out.extend(entries.into_iter().filter(|e| filter.matches(e)));
        }
    }
    Ok(out)
}

/// Aggregate counts over every entry: by tier, by authority, by blocker
/// code, plus average confidence. Single pass.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    /// Count of entries per discovery tier.
    pub by_tier: HashMap<u8, usize>,
    /// Count of entries per authority level.
    pub by_authority: HashMap<u8, usize>,
    /// Count of entries per blocker code (absent entries are not counted).
    pub by_blocker_code: HashMap<String, usize>,
    /// Mean confidence across all entries, or `None` if there are none.
    pub average_confidence: Option<f64>,
}

/// Computes [`Stats`] over `entries` in a single pass.
pub fn stats(entries: &[ProvenanceEntry]) -> Stats {
    let mut result = Stats::default();
    let mut confidence_sum = 0u64;
    for entry in entries {
        *result.by_tier.entry(entry.g).or_insert(0) += 1;
        *result.by_authority.entry(entry.auth).or_insert(0) += 1;
        if let Some(code) = &entry.blocked {
            *result.by_blocker_code.entry(code.clone()).or_insert(0) += 1;
        }
        confidence_sum += entry.conf as u64;
    }
    if !entries.is_empty() {
        result.average_confidence = Some(confidence_sum as f64 / entries.len() as f64);
    }
    result
}

/// Folds `entries` to the newest entry per `f` key.
pub fn latest_per_key(entries: &[ProvenanceEntry]) -> Vec<ProvenanceEntry> {
    let mut latest: HashMap<&str, &ProvenanceEntry> = HashMap::new();
    for entry in entries {
        latest
            .entry(entry.f.as_str())
            .and_modify(|current| {
                if entry.ts > current.ts {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }
    let mut out: Vec<ProvenanceEntry> = latest.into_values().cloned().collect();
    out.sort_by(|a, b| a.f.cmp(&b.f));
    out
}

/// `latestPerKey` filtered to entries eligible for retry right now,
/// sorted descending by priority (population first, then by
/// tier-upgrade potential, i.e. coarser tiers first).
pub fn retry_candidates(entries: &[ProvenanceEntry], now: DateTime<Utc>) -> Vec<ProvenanceEntry> {
    let mut candidates: Vec<ProvenanceEntry> = latest_per_key(entries)
        .into_iter()
        .filter(|e| {
            e.blocked
                .as_deref()
                .map(|code| is_retry_due(code, e.ts, now))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.p.unwrap_or(0)
            .cmp(&a.p.unwrap_or(0))
            .then_with(|| b.g.cmp(&a.g))
    });
    candidates
}

/// Freshness bucket for a district's most recent unblocked provenance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FreshnessBucket {
    /// Under 90 days old.
    Fresh,
    /// 90–180 days old.
    Aging,
    /// 180–365 days old.
    Stale,
    /// Over 365 days old.
    Critical,
}

fn bucket_for_age(age_days: i64) -> FreshnessBucket {
    match age_days {
        d if d < 90 => FreshnessBucket::Fresh,
        d if d < 180 => FreshnessBucket::Aging,
        d if d < 365 => FreshnessBucket::Stale,
        _ => FreshnessBucket::Critical,
    }
}

/// An entry paired with its derived freshness bucket.
#[derive(Debug, Clone)]
pub struct FreshnessEntry {
    /// The underlying latest-per-key entry.
    pub entry: ProvenanceEntry,
    /// Its derived freshness bucket.
    pub bucket: FreshnessBucket,
}

/// `latestPerKey` filtered to `blocked = null`, bucketed by age, most
/// critical first.
pub fn freshness_queue(entries: &[ProvenanceEntry], now: DateTime<Utc>) -> Vec<FreshnessEntry> {
    let mut out: Vec<FreshnessEntry> = latest_per_key(entries)
        .into_iter()
        .filter(|e| e.blocked.is_none())
        .map(|e| {
            let age_days = (now - e.ts).num_days();
            FreshnessEntry { bucket: bucket_for_age(age_days), entry: e }
        })
        .collect();
    out.sort_by(|a, b| b.bucket.cmp(&a.bucket));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(f: &str, ts: &str, conf: u8, blocked: Option<&str>, population: Option<u64>, tier: u8) -> ProvenanceEntry {
        ProvenanceEntry {
            f: f.to_string(),
            n: None,
            s: None,
            p: population,
            g: tier,
            fc: None,
            conf,
            auth: 3,
            src: None,
            url: None,
            q: None,
            why: vec!["T1 success".to_string()],
            tried: vec![],
            blocked: blocked.map(|b| b.to_string()),
            ts: ts.parse().unwrap(),
            aid: "agt-001".to_string(),
        }
    }

    #[test]
    fn stats_counts_and_averages_confidence() {
        let entries = vec![
            entry("a", "2025-11-19T00:00:00Z", 80, None, None, 1),
            entry("b", "2025-11-19T00:00:00Z", 90, Some("portal-404"), None, 2),
        ];
        let result = stats(&entries);
        assert_eq!(result.by_tier[&1], 1);
        assert_eq!(result.by_blocker_code["portal-404"], 1);
        assert_eq!(result.average_confidence, Some(85.0));
    }

    #[test]
    fn latest_per_key_keeps_newest_timestamp() {
        let entries = vec![
            entry("a", "2025-01-01T00:00:00Z", 50, None, None, 1),
            entry("a", "2025-11-19T00:00:00Z", 90, None, None, 1),
        ];
        let latest = latest_per_key(&entries);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].conf, 90);
    }

    #[test]
    fn retry_candidates_exclude_never_policy_and_include_daily_policy() {
        let now: DateTime<Utc> = Utc::now();
        let old_ts = (now - chrono::Duration::days(7)).to_rfc3339();
        let entries = vec![
            entry("0100000", &old_ts, 50, Some("at-large-governance"), None, 1),
            entry("0200000", &old_ts, 50, Some("portal-404"), None, 1),
        ];
        let candidates = retry_candidates(&entries, now);
        let keys: Vec<&str> = candidates.iter().map(|e| e.f.as_str()).collect();
        assert!(!keys.contains(&"0100000"));
        assert!(keys.contains(&"0200000"));
    }

    #[test]
    fn freshness_queue_sorts_most_critical_first() {
        let now: DateTime<Utc> = Utc::now();
        let fresh_ts = (now - chrono::Duration::days(10)).to_rfc3339();
        let critical_ts = (now - chrono::Duration::days(400)).to_rfc3339();
        let entries = vec![
            entry("a", &fresh_ts, 80, None, None, 1),
            entry("b", &critical_ts, 80, None, None, 1),
        ];
        let queue = freshness_queue(&entries, now);
        assert_eq!(queue[0].entry.f, "b");
        assert_eq!(queue[0].bucket, FreshnessBucket::Critical);
    }

    #[test]
    fn query_with_tier_and_confidence_filter_finds_matching_entry() {
        let shard_root = tempfile::tempdir().unwrap();
        let staging_dir = tempfile::tempdir().unwrap();
        let e = entry("0666000", "2025-11-19T07:42:00Z", 85, None, None, 1);
        crate::provenance::staging::append_entry(staging_dir.path(), &e).unwrap();

        let filter = ProvenanceFilter { tier: Some(1), min_confidence: Some(80), ..Default::default() };
        let results = query_provenance(shard_root.path(), staging_dir.path(), &filter).unwrap();
        assert!(results.iter().any(|r| r.f == "0666000"));
    }
}
