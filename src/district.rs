//! District and country-partition entities.
//!
//! Mirrors the teacher's preference for small, serde-derived plain structs
//! (see `net::schema::AnchorJson`) over a heavier ORM-style model.

use serde::{Deserialize, Serialize};

use crate::geometry::{Bbox, MultiPolygonGeom};

/// Closed enumeration of administrative levels a district can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistrictType {
    /// City or town council district.
    Council,
    /// Ward subdivision of a municipality.
    Ward,
    /// Municipal boundary.
    Municipal,
    /// County or county-equivalent.
    County,
    /// Congressional district.
    Congressional,
    /// Upper-chamber state legislative district.
    StateUpper,
    /// Lower-chamber state legislative district.
    StateLower,
    /// Incorporated place.
    Place,
    /// Census-designated place.
    Cdp,
    /// School district at the given tier, e.g. `School(0)` for elementary.
    School(u8),
    /// Sovereign country.
    Country,
}

/// Returns the fixed precisionRank for a district type (lower = finer).
///
/// This table is a process-wide constant (spec.md §9 "Global state"):
/// loaded once, never mutated. Gaps between ordinals are intentional, to
/// leave room for future jurisdiction-specific tiers without renumbering.
pub fn precision_rank(district_type: &DistrictType) -> u8 {
    match district_type {
        DistrictType::Council => 0,
        DistrictType::Ward => 1,
        DistrictType::Cdp => 1,
        DistrictType::Place => 2,
        DistrictType::Municipal => 2,
        DistrictType::County => 3,
        DistrictType::School(_) => 4,
        DistrictType::StateLower => 5,
        DistrictType::StateUpper => 6,
        DistrictType::Congressional => 7,
        DistrictType::Country => 10,
    }
}

/// Provenance metadata attached to a district record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictProvenance {
    /// Source URL the boundary was retrieved from.
    pub source_url: String,
    /// Authority level, 0 (lowest) through 5 (highest).
    pub authority_level: u8,
    /// License identifier under which the source data was published.
    pub license: String,
    /// Retrieval timestamp, RFC 3339.
    pub retrieved_at: chrono::DateTime<chrono::Utc>,
    /// Source-reported data version string.
    pub data_version: String,
    /// Content hash (SHA-256, hex) of the raw response the record was derived from.
    pub content_hash: String,
}

/// A single administrative district boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct District {
    /// Globally unique identifier, also the Merkle leaf key.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable jurisdiction (e.g. "Seattle, WA").
    pub jurisdiction: String,
    /// Administrative level.
    pub district_type: DistrictType,
    /// Polygon or multipolygon geometry in WGS84.
    pub geometry: MultiPolygonGeom,
    /// Bounding box fully containing `geometry`.
    pub bbox: Bbox,
    /// Precomputed precisionRank (must equal `precision_rank(&district_type)`).
    pub precision_rank: u8,
    /// Source and authority metadata.
    pub provenance: DistrictProvenance,
}

impl District {
    /// Returns true when `bbox` matches the invariant `bbox ⊇ geometry`
    /// within the provided tolerance, and `precision_rank` matches the
    /// fixed table for `district_type`.
    pub fn check_invariants(&self) -> bool {
        self.precision_rank == precision_rank(&self.district_type)
            && self.bbox.contains_bbox(&self.geometry.bbox())
    }
}

/// A country partition: the set of districts whose id or explicit
/// `countryCode` property maps to the same ISO 3166-1 alpha-2 code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryPartition {
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// Union of member district bboxes.
    pub bbox: Bbox,
    /// Number of districts in this partition.
    pub district_count: usize,
    /// Last time this partition's shard was accessed (epoch millis).
    pub last_accessed_ms: u64,
}

/// Small static table correcting common FIPS-style id prefixes to ISO
/// 3166-1 alpha-2 codes, used only when a district record has no explicit
/// `countryCode` property.
const FIPS_TO_ISO: &[(&str, &str)] = &[("usa", "US"), ("can", "CA"), ("mex", "MX"), ("gbr", "GB")];

/// Derives the country partition key for a district: prefers an explicit
/// `country_code` property, falling back to the first dash-delimited
/// segment of `id`, normalized through [`FIPS_TO_ISO`].
pub fn derive_country_code(id: &str, explicit_country_code: Option<&str>) -> String {
    if let Some(code) = explicit_country_code {
        return code.to_ascii_uppercase();
    }
    let prefix = id.split('-').next().unwrap_or(id).to_ascii_lowercase();
    for (fips, iso) in FIPS_TO_ISO {
        if *fips == prefix {
            return (*iso).to_string();
        }
    }
    prefix.to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_rank_table_matches_spec() {
        assert_eq!(precision_rank(&DistrictType::Council), 0);
        assert_eq!(precision_rank(&DistrictType::Ward), 1);
        assert_eq!(precision_rank(&DistrictType::Cdp), 1);
        assert_eq!(precision_rank(&DistrictType::Place), 2);
        assert_eq!(precision_rank(&DistrictType::Municipal), 2);
        assert_eq!(precision_rank(&DistrictType::County), 3);
        assert_eq!(precision_rank(&DistrictType::School(0)), 4);
        assert_eq!(precision_rank(&DistrictType::StateLower), 5);
        assert_eq!(precision_rank(&DistrictType::StateUpper), 6);
        assert_eq!(precision_rank(&DistrictType::Congressional), 7);
        assert_eq!(precision_rank(&DistrictType::Country), 10);
    }

    #[test]
    fn country_code_prefers_explicit_property() {
        assert_eq!(
            derive_country_code("usa-hi-honolulu-district-1", Some("us")),
            "US"
        );
    }

    #[test]
    fn country_code_falls_back_to_id_prefix_with_fips_mapping() {
        assert_eq!(derive_country_code("usa-hi-honolulu-district-1", None), "US");
        assert_eq!(derive_country_code("fra-paris-arrondissement-1", None), "FRA");
    }
}
