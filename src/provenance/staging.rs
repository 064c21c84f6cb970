//! Zero-contention per-agent staging append (spec.md §4.F "Append path").
//!
//! Each agent writes its own uniquely named file into the staging
//! directory; concurrency is unbounded because no two writers ever
//! target the same path. Grounded on the teacher's `io::write_text_series`
//! (directory creation plus a buffered line writer) and the
//! `checkpoint_{epoch}.json` naming convention in `net::checkpoint`.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ProvenanceError;
use crate::provenance::entry::ProvenanceEntry;

/// Appends `entry` (already validated) as one NDJSON line to a fresh,
/// uniquely named staging file `{agentId}-{unixNanoTime}.ndjson`.
pub fn append_entry(staging_dir: &Path, entry: &ProvenanceEntry) -> Result<PathBuf, ProvenanceError> {
    entry.validate()?;
    fs::create_dir_all(staging_dir).map_err(|e| ProvenanceError::Io(e.to_string()))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let path = staging_dir.join(format!("{}-{}.ndjson", entry.aid, nanos));

    let line = serde_json::to_string(entry).map_err(|e| ProvenanceError::Io(e.to_string()))?;
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .map_err(|e| ProvenanceError::Io(e.to_string()))?;
    writeln!(file, "{line}").map_err(|e| ProvenanceError::Io(e.to_string()))?;
    Ok(path)
}

/// Lists staging files whose filename-embedded timestamp is older than
/// `quiescence_nanos` relative to now, the candidate set the merge worker
/// consumes.
pub fn list_quiescent_files(staging_dir: &Path, quiescence_nanos: u128) -> std::io::Result<Vec<PathBuf>> {
    let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let mut out = Vec::new();
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Some((_, nanos_str)) = stem.rsplit_once('-') {
                if let Ok(written_at) = nanos_str.parse::<u128>() {
                    if now_nanos.saturating_sub(written_at) >= quiescence_nanos {
                        out.push(path);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Reads every entry from a single staging file (one NDJSON record per line).
pub fn read_staging_file(path: &Path) -> Result<Vec<ProvenanceEntry>, ProvenanceError> {
    let contents = fs::read_to_string(path).map_err(|e| ProvenanceError::Io(e.to_string()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| ProvenanceError::Io(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(aid: &str) -> ProvenanceEntry {
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
            aid: aid.to_string(),
        }
    }

    #[test]
    fn append_creates_unique_file_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = append_entry(dir.path(), &sample("agt-001")).unwrap();
        let p2 = append_entry(dir.path(), &sample("agt-001")).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn read_back_entry_is_bitwise_equal() {
        let dir = tempfile::tempdir().unwrap();
        let entry = sample("agt-001");
        let path = append_entry(dir.path(), &entry).unwrap();
        let read_back = read_staging_file(&path).unwrap();
        assert_eq!(read_back, vec![entry]);
    }

    #[test]
    fn invalid_entry_is_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = sample("agt-001");
        entry.why.clear();
        assert!(append_entry(dir.path(), &entry).is_err());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
