//! Process-wide retry policy table (spec.md §3 "Retry policy table").
//!
//! A fixed, immutable mapping from blocker code to retry cadence, grounded
//! on the teacher's `net::policy::IdentityPolicy` static-table pattern —
//! a plain `match` rather than a macro-generated lookup table, consistent
//! with the rest of this corpus's preference for explicit code over
//! derive-heavy static maps.

use chrono::{DateTime, Utc};

use crate::error::ProvenanceError;
use crate::provenance::entry::ProvenanceEntry;

/// Retry cadence classification for a discovery blocker code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryInterval {
    /// Permanent: this blocker code is never retried.
    Never,
    /// Transient infrastructure failure: retry hourly.
    Hourly,
    /// Transient infrastructure failure: retry daily.
    Daily,
    /// Data-publication cycle: retry quarterly.
    Quarterly,
}

impl RetryInterval {
    /// The wall-clock duration this interval represents, or `None` for
    /// [`RetryInterval::Never`].
    pub fn duration(self) -> Option<chrono::Duration> {
        match self {
            RetryInterval::Never => None,
            RetryInterval::Hourly => Some(chrono::Duration::hours(1)),
            RetryInterval::Daily => Some(chrono::Duration::days(1)),
            RetryInterval::Quarterly => Some(chrono::Duration::days(90)),
        }
    }
}

/// Looks up the retry policy for `blocker_code`. Unknown codes default to
/// [`RetryInterval::Daily`], the conservative middle ground between
/// retrying too aggressively and never retrying at all.
pub fn policy_for(blocker_code: &str) -> RetryInterval {
    match blocker_code {
        "at-large-governance" | "multi-county-unsupported" => RetryInterval::Never,
        "portal-404" | "portal-timeout" | "rate-limited" => RetryInterval::Daily,
        "dns-failure" | "connection-reset" => RetryInterval::Hourly,
        "publication-pending" | "census-cycle-wait" => RetryInterval::Quarterly,
        _ => RetryInterval::Daily,
    }
}

/// True if a retry is due: `policy != Never` and `now - ts >= interval`.
pub fn is_retry_due(blocker_code: &str, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match policy_for(blocker_code).duration() {
        Some(interval) => now - ts >= interval,
        None => false,
    }
}

/// Explicit retry-eligibility check for a single entry, used by callers
/// that want to attempt a retry against one named key rather than sweep
/// [`crate::provenance::retry_candidates`]. Returns
/// [`ProvenanceError::PolicyBlocked`] if the entry's blocker code is
/// classified [`RetryInterval::Never`], regardless of how much time has
/// elapsed.
pub fn ensure_retryable(entry: &ProvenanceEntry) -> Result<(), ProvenanceError> {
    if let Some(code) = &entry.blocked {
        if matches!(policy_for(code), RetryInterval::Never) {
            return Err(ProvenanceError::PolicyBlocked(code.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_large_governance_is_never_retried() {
        assert_eq!(policy_for("at-large-governance"), RetryInterval::Never);
    }

    #[test]
    fn portal_404_is_daily() {
        assert_eq!(policy_for("portal-404"), RetryInterval::Daily);
    }

    #[test]
    fn never_policy_blocks_retry_regardless_of_elapsed_time() {
        let ts = Utc::now() - chrono::Duration::days(365);
        assert!(!is_retry_due("at-large-governance", ts, Utc::now()));
    }

    #[test]
    fn daily_policy_is_due_after_one_day_elapsed() {
        let ts = Utc::now() - chrono::Duration::days(7);
        assert!(is_retry_due("portal-404", ts, Utc::now()));
    }

    #[test]
    fn daily_policy_is_not_due_before_one_day_elapsed() {
        let ts = Utc::now() - chrono::Duration::hours(2);
        assert!(!is_retry_due("portal-404", ts, Utc::now()));
    }

    fn entry(blocked: Option<&str>) -> ProvenanceEntry {
        ProvenanceEntry {
            f: "0100000".to_string(),
            n: None,
            s: None,
            p: None,
            g: 1,
            fc: None,
            conf: 50,
            auth: 3,
            src: None,
            url: None,
            q: None,
            why: vec![],
            tried: vec![],
            blocked: blocked.map(|b| b.to_string()),
            ts: Utc::now(),
            aid: "agt-001".to_string(),
        }
    }

    #[test]
    fn ensure_retryable_rejects_never_policy_blocker() {
        let err = ensure_retryable(&entry(Some("at-large-governance"))).unwrap_err();
        assert!(matches!(err, ProvenanceError::PolicyBlocked(code) if code == "at-large-governance"));
    }

    #[test]
    fn ensure_retryable_allows_unblocked_or_retryable_entry() {
        assert!(ensure_retryable(&entry(None)).is_ok());
        assert!(ensure_retryable(&entry(Some("portal-404"))).is_ok());
    }
}
