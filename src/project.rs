//! # Window-to-Geometry Projection
//!
//! The map-matched polyline is not point-for-point aligned with the raw
//! samples: it is built from a subsampled point set and snapped to road
//! centrelines, so raw sample indices mean nothing on it. Windows are mapped
//! by arc length instead, rescaled proportionally between the raw track
//! length and the matched polyline length.
//!
//! The proportional mapping assumes a uniform raw-to-matched distance
//! correspondence, which is not strictly true on curved roads where snapping
//! shortens some stretches more than others. Accepted as an approximation;
//! see [`scale_to_matched`].

use crate::geo_utils::{line_substring, planar_length, LocalProjection};
use crate::geojson::Feature;
use crate::GpsPoint;

/// One finished road segment: matched geometry plus its roughness value.
#[derive(Debug, Clone, PartialEq)]
pub struct RoughSegment {
    /// Segment geometry as `[lon, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
    /// IRI surrogate value for the window this segment came from.
    pub iri: f64,
}

impl RoughSegment {
    /// Convert into a GeoJSON feature (colour band derived from the IRI).
    pub fn to_feature(&self) -> Feature {
        Feature::new(self.coordinates.clone(), self.iri)
    }
}

/// A reliable window expressed in raw arc lengths, ready for projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpan {
    /// Raw cumulative distance at the window start (meters).
    pub start_m: f64,
    /// Raw cumulative distance at the window end (meters).
    pub end_m: f64,
    /// IRI value computed for the window.
    pub iri: f64,
}

/// Proportionally rescale a raw-track arc length onto the matched polyline.
///
/// The single named operation behind the raw/matched coupling:
/// `d_snap = matched_total * (d_raw / raw_total)`. Exposed on its own so the
/// approximation has one place to live (and one place to replace if a
/// true arc-length correspondence ever becomes available).
#[inline]
pub fn scale_to_matched(d_raw: f64, raw_total_m: f64, matched_total_m: f64) -> f64 {
    matched_total_m * (d_raw / raw_total_m.max(1e-6))
}

/// Project window spans onto the matched polyline, one segment per window.
///
/// Each span's start and end distances are rescaled onto the matched line,
/// the corresponding substring is cut in a local planar projection, and the
/// result is unprojected back to lon/lat. Degenerate substrings (fewer than
/// two points) produce no segment.
pub fn project_segments(
    spans: &[WindowSpan],
    raw_total_m: f64,
    matched: &[GpsPoint],
) -> Vec<RoughSegment> {
    if matched.len() < 2 || spans.is_empty() {
        return Vec::new();
    }

    let projection = LocalProjection::new(matched[0]);
    let matched_line = projection.line_to_plane(matched);
    let matched_total = planar_length(&matched_line);

    let mut segments = Vec::with_capacity(spans.len());
    for span in spans {
        let d0 = scale_to_matched(span.start_m, raw_total_m, matched_total);
        let d1 = scale_to_matched(span.end_m, raw_total_m, matched_total);

        let sub = line_substring(&matched_line, d0, d1);
        if sub.0.len() < 2 {
            log::debug!(
                "[Project] Window {:.0}..{:.0} m maps to a degenerate substring, skipping",
                span.start_m,
                span.end_m
            );
            continue;
        }

        let coordinates = sub
            .0
            .iter()
            .map(|c| {
                let p = projection.to_gps(*c);
                [p.longitude, p.latitude]
            })
            .collect();

        segments.push(RoughSegment { coordinates, iri: span.iri });
    }

    segments
}

// =============================================================================
// Unit Tests
// =============================================================================
