//! # Segment Merge and Deduplication
//!
//! Reconciles the segments produced by a run against the previously
//! persisted collection. The policy is deliberately coarse:
//!
//! - new data always wins and is always kept verbatim, including overlaps
//!   between new segments from different tracks;
//! - an old segment survives only if it stays clear of every new segment by
//!   more than the buffer distance (the "buffered union" test);
//! - an old feature whose geometry cannot be parsed is kept as-is rather
//!   than dropped, so a bad write can never silently erase coverage.
//!
//! This is whole-feature keep/drop, not a geometric merge: overlapping ends
//! are not trimmed. The overlap test runs in one shared planar projection;
//! "old intersects the buffered union of new" is evaluated as "minimum
//! Euclidean distance to some new geometry is within the buffer", with an
//! R-tree over buffer-expanded new-segment envelopes as prefilter.

use crate::geo_utils::LocalProjection;
use crate::geojson::geometry_coords;
use crate::project::RoughSegment;
use crate::GpsPoint;
use geo::{Distance, Euclidean, LineString};
use rstar::{RTree, RTreeObject, AABB};
use serde_json::Value;

/// Envelope of one new segment, expanded by the buffer distance.
struct SegmentBounds {
    index: usize,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for SegmentBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

fn planar_bounds(line: &LineString<f64>) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::MAX, f64::MAX];
    let mut max = [f64::MIN, f64::MIN];
    for c in &line.0 {
        min[0] = min[0].min(c.x);
        min[1] = min[1].min(c.y);
        max[0] = max[0].max(c.x);
        max[1] = max[1].max(c.y);
    }
    (min, max)
}

/// Merge new segments into the previously persisted feature set.
///
/// Returns the surviving old features followed by every new segment as a
/// GeoJSON feature value. With no new segments the old collection is
/// returned unchanged. Output order carries no meaning; consumers treat the
/// collection as an unordered set.
pub fn merge_segments(
    new_segments: &[RoughSegment],
    old_features: Vec<Value>,
    buffer_m: f64,
) -> Vec<Value> {
    let new_segments: Vec<&RoughSegment> = new_segments
        .iter()
        .filter(|s| s.coordinates.len() >= 2)
        .collect();
    if new_segments.is_empty() {
        return old_features;
    }

    // One shared planar frame for every distance test in this merge.
    let origin = new_segments[0].coordinates[0];
    let projection = LocalProjection::new(GpsPoint::new(origin[1], origin[0]));

    let new_lines: Vec<LineString<f64>> = new_segments
        .iter()
        .map(|s| projection.coords_to_plane(&s.coordinates))
        .collect();

    let bounds: Vec<SegmentBounds> = new_lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let (min, max) = planar_bounds(line);
            SegmentBounds {
                index,
                min: [min[0] - buffer_m, min[1] - buffer_m],
                max: [max[0] + buffer_m, max[1] + buffer_m],
            }
        })
        .collect();
    let rtree = RTree::bulk_load(bounds);

    let old_count = old_features.len();
    let mut merged: Vec<Value> = old_features
        .into_iter()
        .filter(|feature| match geometry_coords(feature) {
            Some(coords) => {
                let old_line = projection.coords_to_plane(&coords);
                let (min, max) = planar_bounds(&old_line);
                let envelope = AABB::from_corners(min, max);

                let covered = rtree
                    .locate_in_envelope_intersecting(&envelope)
                    .any(|b| Euclidean::distance(&old_line, &new_lines[b.index]) <= buffer_m);
                !covered
            }
            // Fail open: keep what we cannot parse.
            None => true,
        })
        .collect();

    let kept_old = merged.len();
    for segment in &new_segments {
        match serde_json::to_value(segment.to_feature()) {
            Ok(value) => merged.push(value),
            Err(e) => log::warn!("[Merge] Failed to serialize a new segment: {}", e),
        }
    }

    log::info!(
        "[Merge] {} new segments, kept {}/{} old features",
        new_segments.len(),
        kept_old,
        old_count
    );

    merged
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A northbound segment at the given longitude offset (degrees).
    fn segment_at(lon_offset: f64, iri: f64) -> RoughSegment {
        RoughSegment {
            coordinates: (0..10)
                .map(|i| [101.6869 + lon_offset, 3.14 + i as f64 * 1e-4])
                .collect(),
            iri,
        }
    }

    fn as_old_features(segments: &[RoughSegment]) -> Vec<Value> {
        segments
            .iter()
            .map(|s| serde_json::to_value(s.to_feature()).unwrap())
            .collect()
    }

    #[test]
    fn test_empty_new_keeps_old_unchanged() {
        let old = as_old_features(&[segment_at(0.0, 1.0)]);
        let merged = merge_segments(&[], old.clone(), 10.0);
        assert_eq!(merged, old);
    }

    #[test]
    fn test_reprocessing_replaces_overlapping_old() {
        // Run A persisted set S; run B reprocesses the same road and
        // produces the same S. Every old feature is covered and replaced.
        let segments = vec![segment_at(0.0, 1.0), segment_at(0.0, 3.0)];
        let old = as_old_features(&segments);

        let merged = merge_segments(&segments, old, 10.0);

        // No shrink: all new segments present, all stale old dropped.
        assert_eq!(merged.len(), segments.len());
        for feature in &merged {
            assert!(geometry_coords(feature).is_some());
        }
    }

    #[test]
    fn test_old_within_buffer_dropped_beyond_kept() {
        let new = vec![segment_at(0.0, 2.0)];

        // ~5 m east: inside the 10 m buffer.
        let near = as_old_features(&[segment_at(4.5e-5, 9.0)]);
        let merged = merge_segments(&new, near, 10.0);
        assert_eq!(merged.len(), 1);

        // ~50 m east: clear of the buffer, survives (and sorts first).
        let far = as_old_features(&[segment_at(4.5e-4, 9.0)]);
        let merged = merge_segments(&new, far.clone(), 10.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], far[0]);
    }

    #[test]
    fn test_malformed_old_feature_is_kept() {
        let new = vec![segment_at(0.0, 2.0)];
        let old = vec![
            json!({"type": "Feature", "geometry": null, "properties": {}}),
            json!({"type": "Feature", "geometry": {"coordinates": [[1.0]]}, "properties": {}}),
            json!("not even an object"),
        ];

        let merged = merge_segments(&new, old.clone(), 10.0);
        assert_eq!(merged.len(), 4);
        assert_eq!(&merged[..3], &old[..]);
    }

    #[test]
    fn test_new_segments_never_dropped() {
        // Heavily overlapping new segments from different tracks all survive.
        let new = vec![
            segment_at(0.0, 1.0),
            segment_at(0.0, 2.0),
            segment_at(1e-6, 3.0),
        ];
        let merged = merge_segments(&new, Vec::new(), 10.0);
        assert_eq!(merged.len(), 3);
    }
}
