//! # Track Splitting
//!
//! A batch of samples can span many independent driving sessions and devices.
//! Drawing one polyline through all of them produces long straight-line
//! artifacts wherever a device lost its fix or a session ended, so the
//! stream is split into independent tracks at every temporal or spatial
//! discontinuity before any further processing.

use crate::geo_utils::haversine_distance;
use crate::{RoughnessConfig, Sample};

/// Split a time-sorted sample sequence into independent tracks.
///
/// A boundary opens between two consecutive samples when the time gap
/// exceeds `max_gap_seconds` or the great-circle jump exceeds
/// `max_gap_meters`. Each maximal run between boundaries becomes a track;
/// candidates with fewer than `min_track_samples` samples are discarded as
/// too short to yield a reliable window or a meaningful map match.
pub fn split_into_tracks(samples: &[Sample], config: &RoughnessConfig) -> Vec<Vec<Sample>> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut tracks = Vec::new();
    let mut start = 0;

    let push_candidate = |tracks: &mut Vec<Vec<Sample>>, lo: usize, hi: usize| {
        if hi - lo >= config.min_track_samples {
            tracks.push(samples[lo..hi].to_vec());
        } else {
            log::debug!(
                "[Splitter] Dropping candidate of {} samples (minimum {})",
                hi - lo,
                config.min_track_samples
            );
        }
    };

    for i in 1..samples.len() {
        let dt = samples[i].timestamp_sec - samples[i - 1].timestamp_sec;
        let jump = haversine_distance(&samples[i - 1].point, &samples[i].point);

        if dt > config.max_gap_seconds || jump > config.max_gap_meters {
            push_candidate(&mut tracks, start, i);
            start = i;
        }
    }
    push_candidate(&mut tracks, start, samples.len());

    log::info!(
        "[Splitter] Split {} samples into {} tracks",
        samples.len(),
        tracks.len()
    );
    tracks
}

// =============================================================================
// Unit Tests
// =============================================================================
