//! # Batch Pipeline
//!
//! One invocation per scheduling period: raw samples in, merged GeoJSON
//! feature set out. Control flow:
//!
//! ```text
//! samples -> split -> [per track] denoise -> windows/IRI -> snap -> project
//!                                   \________ collected segments ________/
//!                                                    |
//!                                        merge against old features
//! ```
//!
//! Tracks are independent after the split, so per-track processing runs in
//! parallel under the `parallel` feature (rayon map-collect: every track
//! writes its own slot, no shared mutable state). The map matcher is the
//! only cross-track contention point and does its own rate limiting. The
//! merge runs strictly after every track has completed, because the
//! buffered-union test is one batched operation over all new segments.
//!
//! Nothing here mutates external state. The caller persists the returned
//! collection and only then advances its cursor to
//! [`BatchOutput::last_timestamp`]; a failed run is simply re-run from the
//! same cursor (at-least-once, idempotent by reprocessing).

use crate::geo_utils::cumulative_distances;
use crate::iri::{iri_for_window, windows_by_distance};
use crate::matching::{snap_track, MapMatcher};
use crate::merge::merge_segments;
use crate::project::{project_segments, RoughSegment, WindowSpan};
use crate::signal::denoise;
use crate::tracks::split_into_tracks;
use crate::{clean_samples, FeatureCollection, GpsPoint, RoughnessConfig, Sample};
use log::{debug, info};
use serde_json::Value;

/// Result of one batch run.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// The merged feature set, ready to persist.
    pub features: Vec<Value>,
    /// Highest ingested sample timestamp, or `None` when the run produced no
    /// segments. The caller advances its processing cursor to this value
    /// only after persisting the features.
    pub last_timestamp: Option<f64>,
    /// Number of tracks the batch split into.
    pub track_count: usize,
    /// Number of new segments produced across all tracks.
    pub new_segment_count: usize,
}

impl BatchOutput {
    /// Wrap the merged features into a serializable `FeatureCollection`.
    pub fn into_collection(self) -> FeatureCollection {
        FeatureCollection::new(self.features)
    }
}

/// Process one track into roughness segments.
///
/// Insufficient data (too short, too little distance, a degenerate matched
/// line) produces an empty result, never an error; the batch carries on with
/// the other tracks.
pub fn process_track<M: MapMatcher + ?Sized>(
    track: &[Sample],
    matcher: &M,
    config: &RoughnessConfig,
) -> Vec<RoughSegment> {
    if track.len() < 2 {
        return Vec::new();
    }

    let t0 = track[0].timestamp_sec;
    let t_rel: Vec<f64> = track.iter().map(|s| s.timestamp_sec - t0).collect();
    let accel: Vec<f64> = track.iter().map(|s| s.accel_vertical).collect();
    let points: Vec<GpsPoint> = track.iter().map(|s| s.point).collect();

    let accel_clean = denoise(&accel, &t_rel, config);

    let cd_raw = cumulative_distances(&points);
    let raw_total = *cd_raw.last().unwrap_or(&0.0);
    if raw_total < config.min_track_meters {
        debug!(
            "[Pipeline] Skipping {:.0} m track (minimum {:.0} m)",
            raw_total, config.min_track_meters
        );
        return Vec::new();
    }

    // The matcher sees a thinned point set; road shape survives, request
    // sizes halve.
    let subsample = config.match_subsample_step.max(1);
    let thinned: Vec<GpsPoint> = points.iter().copied().step_by(subsample).collect();
    let snapped = snap_track(matcher, &thinned, config.max_chunk_points);
    if snapped.len() < 2 {
        debug!("[Pipeline] Skipping track with {} matched points", snapped.len());
        return Vec::new();
    }

    let windows = windows_by_distance(&cd_raw, config.window_step_meters, config.min_window_meters);
    let mut spans = Vec::with_capacity(windows.len());
    for (i0, i1) in windows {
        let start_m = cd_raw[i0];
        let end_m = cd_raw[i1];
        let distance = (end_m - start_m).max(0.0);

        // Unreliable windows drop out here; they are neither zero nor
        // carried forward.
        if let Some(iri) = iri_for_window(&t_rel[i0..=i1], &accel_clean[i0..=i1], distance, config)
        {
            spans.push(WindowSpan { start_m, end_m, iri });
        }
    }

    let segments = project_segments(&spans, raw_total, &snapped);
    debug!(
        "[Pipeline] Track of {} samples ({:.0} m): {} segments",
        track.len(),
        raw_total,
        segments.len()
    );
    segments
}

/// Run the whole batch: ingest, split, process every track, merge.
///
/// `old_features` is the previously persisted collection (empty when there
/// is none). The returned output is pure data; persistence and cursor
/// advancement stay with the caller.
pub fn run_batch<M: MapMatcher + ?Sized>(
    samples: Vec<Sample>,
    old_features: Vec<Value>,
    matcher: &M,
    config: &RoughnessConfig,
) -> BatchOutput {
    let cleaned = clean_samples(samples, None);
    let last_seen = cleaned.last().map(|s| s.timestamp_sec);

    let tracks = split_into_tracks(&cleaned, config);
    let track_count = tracks.len();

    #[cfg(feature = "parallel")]
    let per_track: Vec<Vec<RoughSegment>> = {
        use rayon::prelude::*;
        tracks
            .par_iter()
            .map(|track| process_track(track, matcher, config))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let per_track: Vec<Vec<RoughSegment>> = tracks
        .iter()
        .map(|track| process_track(track, matcher, config))
        .collect();

    let new_segments: Vec<RoughSegment> = per_track.into_iter().flatten().collect();
    let new_segment_count = new_segments.len();
    info!(
        "[Pipeline] {} tracks produced {} segments",
        track_count, new_segment_count
    );

    if new_segments.is_empty() {
        // Nothing to persist; the cursor must not move.
        return BatchOutput {
            features: old_features,
            last_timestamp: None,
            track_count,
            new_segment_count: 0,
        };
    }

    let features = merge_segments(&new_segments, old_features, config.dedup_buffer_meters);
    info!("[Pipeline] Merged collection holds {} features", features.len());

    BatchOutput {
        features,
        last_timestamp: last_seen,
        track_count,
        new_segment_count,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchError;

    /// Matcher that trusts the raw line.
    struct Passthrough;

    impl MapMatcher for Passthrough {
        fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            Ok(chunk.to_vec())
        }
    }

    /// A straight ~300 m track at 40 km/h, 10 Hz, quiet except for a burst
    /// of vertical acceleration inside the second 100 m window.
    fn excited_track(t0: f64, lat0: f64) -> Vec<Sample> {
        (0..271)
            .map(|i| {
                let accel = if (130..136).contains(&i) { 1.0 } else { 0.0 };
                Sample::new(
                    t0 + i as f64 * 0.1,
                    GpsPoint::new(lat0 + i as f64 * 1e-5, 101.6869),
                    accel,
                )
            })
            .collect()
    }

    fn feature_iri(feature: &Value) -> f64 {
        feature["properties"]["iri"].as_f64().unwrap()
    }

    #[test]
    fn test_end_to_end_excited_window_is_rougher() {
        let samples = excited_track(0.0, 3.14);
        let out = run_batch(samples, Vec::new(), &Passthrough, &RoughnessConfig::default());

        // 300 m at a 100 m step: exactly three windows, all fast enough.
        assert_eq!(out.track_count, 1);
        assert_eq!(out.new_segment_count, 3);
        assert_eq!(out.features.len(), 3);
        assert!((out.last_timestamp.unwrap() - 27.0).abs() < 1e-9);

        let iris: Vec<f64> = out.features.iter().map(feature_iri).collect();
        assert!(iris[1] > iris[0], "excited window not rougher: {:?}", iris);
        assert!(iris[1] > iris[2], "excited window not rougher: {:?}", iris);
        // The quiet windows carry no vibration energy at all.
        assert_eq!(iris[0], 0.0);
        assert_eq!(iris[2], 0.0);
    }

    #[test]
    fn test_empty_batch_keeps_old_and_cursor() {
        let old = vec![serde_json::json!({"type": "Feature"})];
        let out = run_batch(Vec::new(), old.clone(), &Passthrough, &RoughnessConfig::default());
        assert_eq!(out.features, old);
        assert_eq!(out.last_timestamp, None);
        assert_eq!(out.track_count, 0);
    }

    #[test]
    fn test_slow_track_produces_nothing() {
        // Same geometry stretched over 10x the time: ~4 km/h.
        let samples: Vec<Sample> = (0..271)
            .map(|i| {
                Sample::new(
                    i as f64,
                    GpsPoint::new(3.14 + i as f64 * 1e-5, 101.6869),
                    0.3,
                )
            })
            .collect();

        let out = run_batch(samples, Vec::new(), &Passthrough, &RoughnessConfig::default());
        assert_eq!(out.new_segment_count, 0);
        // No segments means the cursor must not advance.
        assert_eq!(out.last_timestamp, None);
    }

    #[test]
    fn test_two_sessions_split_and_processed() {
        let mut samples = excited_track(0.0, 3.14);
        samples.extend(excited_track(1000.0, 3.20));

        let out = run_batch(samples, Vec::new(), &Passthrough, &RoughnessConfig::default());
        assert_eq!(out.track_count, 2);
        assert_eq!(out.new_segment_count, 6);
        assert!((out.last_timestamp.unwrap() - 1027.0).abs() < 1e-9);
    }

    #[test]
    fn test_reprocessing_does_not_grow_the_collection() {
        let samples = excited_track(0.0, 3.14);
        let config = RoughnessConfig::default();

        let first = run_batch(samples.clone(), Vec::new(), &Passthrough, &config);
        let second = run_batch(samples, first.features.clone(), &Passthrough, &config);

        // The rerun covers exactly the same road: old segments are all
        // replaced, and no new data is lost.
        assert_eq!(second.features.len(), first.features.len());
    }

    #[test]
    fn test_process_track_too_short() {
        let track = excited_track(0.0, 3.14)[..5].to_vec();
        // 5 samples cover ~4.4 m, below the track minimum.
        assert!(process_track(&track, &Passthrough, &RoughnessConfig::default()).is_empty());
    }

    #[test]
    fn test_output_collection_shape() {
        let samples = excited_track(0.0, 3.14);
        let out = run_batch(samples, Vec::new(), &Passthrough, &RoughnessConfig::default());
        let collection = out.into_collection();
        assert_eq!(collection.collection_type, "FeatureCollection");

        let text = serde_json::to_string(&collection).unwrap();
        let reread = crate::parse_feature_collection(&text);
        assert_eq!(reread.len(), 3);
    }
}
