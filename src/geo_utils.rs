//! # Geometry and Math Utilities
//!
//! Core geographic and numeric operations for the roughness pipeline.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//! | [`cumulative_distances`] | Running distance along a GPS track |
//! | [`cumulative_trapezoid`] | Cumulative trapezoidal integral on an irregular base |
//! | [`trapezoid`] | Definite trapezoidal integral |
//! | [`cut_line_at`] | Split a planar polyline at an arc-length distance |
//! | [`line_substring`] | Extract the planar polyline between two arc lengths |
//! | [`LocalProjection`] | Equirectangular lon/lat to planar meters and back |
//!
//! ## Coordinate Systems
//!
//! GPS inputs are WGS84 degrees. Arc-length cutting and the merge overlap test
//! run in a [`LocalProjection`] plane: an equirectangular projection about a
//! fixed origin, accurate to well under a meter at the scale of a driving
//! session. All planar functions take and return [`geo::LineString`] in meters.
//!
//! ### Haversine Formula
//!
//! Great-circle distances use the haversine formula on a spherical Earth
//! (radius 6,371 km), the standard choice for GPS traces.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use crate::GpsPoint;
use geo::{Coord, Distance, Haversine, LineString, Point};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points in meters.
///
/// # Example
///
/// ```rust
/// use iri_mapper::GpsPoint;
/// use iri_mapper::geo_utils::haversine_distance;
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Calculate the total length of a GPS track in meters.
///
/// Sums the haversine distance between consecutive points. Empty or
/// single-point tracks return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Running distance along a GPS track.
///
/// `cd[0] = 0` and `cd[i] = cd[i-1] + dist(p[i-1], p[i])`, so the result is
/// non-decreasing by construction and has the same length as the input.
///
/// # Example
///
/// ```rust
/// use iri_mapper::GpsPoint;
/// use iri_mapper::geo_utils::cumulative_distances;
///
/// let track = vec![
///     GpsPoint::new(3.1400, 101.6869),
///     GpsPoint::new(3.1410, 101.6869),
///     GpsPoint::new(3.1420, 101.6869),
/// ];
///
/// let cd = cumulative_distances(&track);
/// assert_eq!(cd[0], 0.0);
/// assert!(cd[2] > cd[1]);
/// ```
pub fn cumulative_distances(points: &[GpsPoint]) -> Vec<f64> {
    let mut cd = Vec::with_capacity(points.len());
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            total += haversine_distance(&points[i - 1], p);
        }
        cd.push(total);
    }
    cd
}

// =============================================================================
// Numeric Integration
// =============================================================================

/// Cumulative trapezoidal integral of `y` sampled at `x`.
///
/// Built for irregular time bases: every non-finite or non-positive step in
/// `x` is clamped to 1e-6 so a duplicated or jittered timestamp cannot blow
/// up the integral. Returns a vector of the same length, starting at 0.0.
pub fn cumulative_trapezoid(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    let mut out = Vec::with_capacity(n);
    if n == 0 {
        return out;
    }

    out.push(0.0);
    let mut acc = 0.0;
    for i in 1..n {
        let mut dx = x[i] - x[i - 1];
        if !dx.is_finite() || dx <= 0.0 {
            dx = 1e-6;
        }
        acc += 0.5 * (y[i] + y[i - 1]) * dx;
        out.push(acc);
    }
    out
}

/// Definite trapezoidal integral of `y` over `x`.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    let n = y.len().min(x.len());
    if n < 2 {
        return 0.0;
    }

    (1..n)
        .map(|i| 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]))
        .sum()
}

// =============================================================================
// Planar Polyline Operations
// =============================================================================

/// Total length of a planar polyline in meters.
pub fn planar_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|w| (w[1].x - w[0].x).hypot(w[1].y - w[0].y))
        .sum()
}

/// Split a planar polyline at arc-length distance `d`.
///
/// Returns the `(before, after)` sub-polylines. `d <= 0` yields an empty
/// "before" part and `d >= length` an empty "after" part. When `d` falls
/// inside an edge, that edge is split at the interpolated point, which ends
/// the first part and starts the second; a cut landing exactly on a vertex
/// splits there, so rejoining the parts reproduces the original coordinates.
///
/// # Example
///
/// ```rust
/// use geo::{Coord, LineString};
/// use iri_mapper::geo_utils::cut_line_at;
///
/// let line = LineString::new(vec![
///     Coord { x: 0.0, y: 0.0 },
///     Coord { x: 10.0, y: 0.0 },
/// ]);
///
/// let (before, after) = cut_line_at(&line, 4.0);
/// assert_eq!(before.0.last().unwrap().x, 4.0);
/// assert_eq!(after.0.first().unwrap().x, 4.0);
/// ```
pub fn cut_line_at(line: &LineString<f64>, d: f64) -> (LineString<f64>, LineString<f64>) {
    let coords = &line.0;

    if d <= 0.0 {
        return (LineString::new(Vec::new()), line.clone());
    }
    if d >= planar_length(line) {
        return (line.clone(), LineString::new(Vec::new()));
    }

    let mut acc = 0.0;
    for i in 1..coords.len() {
        let seg_len = (coords[i].x - coords[i - 1].x).hypot(coords[i].y - coords[i - 1].y);
        if seg_len > 0.0 && acc + seg_len >= d {
            // A cut landing exactly on vertex i splits there without
            // inserting a duplicate point.
            if d - acc >= seg_len {
                return (
                    LineString::new(coords[..=i].to_vec()),
                    LineString::new(coords[i..].to_vec()),
                );
            }
            let t = (d - acc) / seg_len;
            let split = Coord {
                x: coords[i - 1].x + t * (coords[i].x - coords[i - 1].x),
                y: coords[i - 1].y + t * (coords[i].y - coords[i - 1].y),
            };
            let mut before: Vec<Coord<f64>> = coords[..i].to_vec();
            before.push(split);
            let mut after: Vec<Coord<f64>> = vec![split];
            after.extend_from_slice(&coords[i..]);
            return (LineString::new(before), LineString::new(after));
        }
        acc += seg_len;
    }

    (line.clone(), LineString::new(Vec::new()))
}

/// The planar polyline between arc lengths `d0` and `d1`.
///
/// Composition of two cuts. Returns an empty line when `d1 <= d0`.
pub fn line_substring(line: &LineString<f64>, d0: f64, d1: f64) -> LineString<f64> {
    if d1 <= d0 {
        return LineString::new(Vec::new());
    }
    let (_, right) = cut_line_at(line, d0);
    let (sub, _) = cut_line_at(&right, d1 - d0);
    sub
}

// =============================================================================
// Local Projection
// =============================================================================

/// Equirectangular projection of lon/lat degrees to planar meters.
///
/// East/north offsets from a fixed origin, with longitude scaled by the
/// cosine of the origin latitude. Locally Euclidean: good to sub-meter
/// accuracy at driving-session scale, which is all the cutting and the
/// 10 m merge buffer need. Not suitable for continental extents.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin_lat: f64,
    origin_lon: f64,
    cos_lat: f64,
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

impl LocalProjection {
    /// Create a projection centred at `origin`.
    pub fn new(origin: GpsPoint) -> Self {
        Self {
            origin_lat: origin.latitude,
            origin_lon: origin.longitude,
            cos_lat: origin.latitude.to_radians().cos(),
        }
    }

    /// Project a GPS point to planar meters.
    pub fn to_plane(&self, p: &GpsPoint) -> Coord<f64> {
        let d_lat = (p.latitude - self.origin_lat).to_radians();
        let d_lon = (p.longitude - self.origin_lon).to_radians();
        Coord {
            x: EARTH_RADIUS_M * d_lon * self.cos_lat,
            y: EARTH_RADIUS_M * d_lat,
        }
    }

    /// Unproject planar meters back to a GPS point.
    pub fn to_gps(&self, c: Coord<f64>) -> GpsPoint {
        let d_lat = c.y / EARTH_RADIUS_M;
        let d_lon = c.x / (EARTH_RADIUS_M * self.cos_lat);
        GpsPoint::new(
            self.origin_lat + d_lat.to_degrees(),
            self.origin_lon + d_lon.to_degrees(),
        )
    }

    /// Project a whole track to a planar polyline.
    pub fn line_to_plane(&self, points: &[GpsPoint]) -> LineString<f64> {
        LineString::new(points.iter().map(|p| self.to_plane(p)).collect())
    }

    /// Project raw `[lon, lat]` coordinate pairs to a planar polyline.
    pub fn coords_to_plane(&self, coords: &[[f64; 2]]) -> LineString<f64> {
        LineString::new(
            coords
                .iter()
                .map(|c| self.to_plane(&GpsPoint::new(c[1], c[0])))
                .collect(),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
