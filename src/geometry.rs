//! Geometry primitives: bounding boxes and point-in-polygon testing.
//!
//! Polygons are plain `(lon, lat)` rings rather than a third-party geometry
//! type: bbox containment and the winding-number test are hand-written so the
//! edge rule adopted in DESIGN.md has exact control over which edges are
//! inclusive, which a third-party predicate would not expose directly.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box `[minLon, minLat, maxLon, maxLat]`.
///
/// Containment is edge-inclusive on `min_lon`/`min_lat` and
/// edge-exclusive on `max_lon`/`max_lat` (DESIGN.md Open Question
/// resolution #2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    /// Minimum longitude.
    pub min_lon: f64,
    /// Minimum latitude.
    pub min_lat: f64,
    /// Maximum longitude.
    pub max_lon: f64,
    /// Maximum latitude.
    pub max_lat: f64,
}

impl Bbox {
    /// Builds the smallest bbox fully covering both `self` and `other`.
    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// True if `point` falls within this bbox under the edge-inclusive
    /// min / edge-exclusive max rule.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon < self.max_lon && lat >= self.min_lat && lat < self.max_lat
    }

    /// True if `other` is fully covered by `self`, i.e. `self ⊇ other`.
    pub fn contains_bbox(&self, other: &Bbox) -> bool {
        other.min_lon >= self.min_lon
            && other.max_lon <= self.max_lon
            && other.min_lat >= self.min_lat
            && other.max_lat <= self.max_lat
    }

    /// True if `self` and `other` overlap (share any area or edge).
    pub fn intersects(&self, other: &Bbox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }
}

/// A polygon or multipolygon geometry in WGS84 (EPSG:4326).
///
/// Antimeridian-crossing boundaries (Alaska, Fiji) are represented as a
/// `MultiPolygon` whose parts have already been split at ±180°, matching
/// spec.md §8's boundary-behavior requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPolygonGeom {
    /// One or more simple polygons (each may carry interior rings/holes).
    pub polygons: Vec<SimplePolygon>,
}

/// A single polygon: an outer ring plus zero or more interior holes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplePolygon {
    /// Outer boundary ring, `(lon, lat)` pairs, implicitly closed.
    pub exterior: Vec<(f64, f64)>,
    /// Interior holes, same winding convention as `exterior`.
    pub interiors: Vec<Vec<(f64, f64)>>,
}

impl MultiPolygonGeom {
    /// Computes the bounding box that fully contains this geometry.
    pub fn bbox(&self) -> Bbox {
        let mut min_lon = f64::INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        for poly in &self.polygons {
            for &(lon, lat) in &poly.exterior {
                min_lon = min_lon.min(lon);
                min_lat = min_lat.min(lat);
                max_lon = max_lon.max(lon);
                max_lat = max_lat.max(lat);
            }
        }
        Bbox { min_lon, min_lat, max_lon, max_lat }
    }

    /// Exact point-in-polygon test using the winding-number rule, applied
    /// across every part of the multipolygon (a point is contained if any
    /// part contains it, net of its holes).
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        self.polygons.iter().any(|poly| poly.contains_point(lon, lat))
    }
}

impl SimplePolygon {
    /// Winding-number point-in-polygon test against this polygon's
    /// exterior ring, with interior rings subtracted (holes).
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        if winding_number(&self.exterior, lon, lat) == 0 {
            return false;
        }
        for hole in &self.interiors {
            if winding_number(hole, lon, lat) != 0 {
                return false;
            }
        }
        true
    }
}

/// Computes the winding number of `ring` around `(lon, lat)`. Non-zero
/// means the point is inside; the sign encodes orientation.
fn winding_number(ring: &[(f64, f64)], lon: f64, lat: f64) -> i32 {
    if ring.len() < 3 {
        return 0;
    }
    let mut winding = 0i32;
    let n = ring.len();
    for i in 0..n {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % n];
        if y1 <= lat {
            if y2 > lat && is_left(x1, y1, x2, y2, lon, lat) > 0.0 {
                winding += 1;
            }
        } else if y2 <= lat && is_left(x1, y1, x2, y2, lon, lat) < 0.0 {
            winding -= 1;
        }
    }
    winding
}

/// Returns >0 if `(px, py)` is left of the directed line `(x1,y1)->(x2,y2)`,
/// <0 if right, 0 if exactly on the line.
fn is_left(x1: f64, y1: f64, x2: f64, y2: f64, px: f64, py: f64) -> f64 {
    (x2 - x1) * (py - y1) - (px - x1) * (y2 - y1)
}
