//! # IRI Mapper
//!
//! Road-roughness mapping from phone GPS and accelerometer traces.
//!
//! This library turns batches of noisy, crowd-sourced driving samples into a
//! colour-coded GeoJSON roughness map:
//! - splits the raw sample stream into physically coherent tracks
//! - denoises the vertical acceleration signal
//! - estimates a distance-windowed IRI value per 100 m of road
//! - projects each window onto a map-matched road polyline
//! - merges the resulting segments into the persisted segment collection,
//!   replacing stale coverage where new data overlaps it
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel per-track processing with rayon
//! - **`http`** - Enable the Mapbox map-matching HTTP client
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use iri_mapper::{GpsPoint, Sample, RoughnessConfig, run_batch};
//! use iri_mapper::matching::{MapMatcher, MatchError};
//!
//! // A matcher that trusts the raw GPS line (no road snapping).
//! struct Passthrough;
//! impl MapMatcher for Passthrough {
//!     fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
//!         Ok(chunk.to_vec())
//!     }
//! }
//!
//! // One sample every 0.1 s heading north at ~11 m/s.
//! let samples: Vec<Sample> = (0..400)
//!     .map(|i| Sample::new(
//!         i as f64 * 0.1,
//!         GpsPoint::new(3.1400 + i as f64 * 1e-5, 101.6869),
//!         0.0,
//!     ))
//!     .collect();
//!
//! let out = run_batch(samples, Vec::new(), &Passthrough, &RoughnessConfig::default());
//! println!("{} merged features", out.features.len());
//! ```

pub mod geo_utils;
pub mod geojson;
pub mod iri;
pub mod matching;
pub mod merge;
pub mod pipeline;
pub mod project;
pub mod signal;
pub mod tracks;

pub use geojson::{parse_feature_collection, Feature, FeatureCollection};
pub use iri::{iri_color, iri_for_window, windows_by_distance};
pub use matching::{snap_track, MapMatcher, MatchError};
pub use merge::merge_segments;
pub use pipeline::{process_track, run_batch, BatchOutput};
pub use project::RoughSegment;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use iri_mapper::GpsPoint;
/// let point = GpsPoint::new(3.1390, 101.6869); // Kuala Lumpur
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One phone reading: a timestamp, a GPS fix and a vertical acceleration.
///
/// Timestamps are seconds. Sources that report milliseconds are detected by
/// magnitude (> 1e12) and rescaled during ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Timestamp in seconds.
    pub timestamp_sec: f64,
    /// GPS fix at this timestamp.
    pub point: GpsPoint,
    /// Vertical acceleration reading (device y axis).
    pub accel_vertical: f64,
}

impl Sample {
    /// Create a new sample.
    pub fn new(timestamp_sec: f64, point: GpsPoint, accel_vertical: f64) -> Self {
        Self { timestamp_sec, point, accel_vertical }
    }

    /// Check that every field is usable.
    pub fn is_valid(&self) -> bool {
        self.timestamp_sec.is_finite() && self.accel_vertical.is_finite() && self.point.is_valid()
    }
}

/// Configuration for the whole signal-to-geometry pipeline.
///
/// Every stage takes this struct explicitly; there are no hidden module-level
/// constants, so tests can override any threshold per call.
#[derive(Debug, Clone)]
pub struct RoughnessConfig {
    /// Split a track when the time gap between samples exceeds this (seconds).
    /// Default: 15.0
    pub max_gap_seconds: f64,

    /// Split a track when the spatial jump between samples exceeds this (meters).
    /// Default: 200.0
    pub max_gap_meters: f64,

    /// Discard candidate tracks with fewer samples than this.
    /// Default: 11 (too short for a reliable window or a meaningful map match)
    pub min_track_samples: usize,

    /// Discard tracks whose raw length is below this (meters).
    /// Default: 50.0
    pub min_track_meters: f64,

    /// Target travelled distance per IRI window (meters).
    /// Default: 100.0
    pub window_step_meters: f64,

    /// Minimum travelled distance for any window, including the trailing
    /// partial one (meters). Default: 20.0
    pub min_window_meters: f64,

    /// Windows slower than this average speed yield no IRI value (m/s).
    /// Default: 8.3 (~30 km/h; below this accelerometer drift dominates)
    pub min_speed_mps: f64,

    /// High-pass stage: centred rolling-mean window (seconds). Default: 1.0
    pub highpass_window_seconds: f64,

    /// Hampel outlier stage: centred window (seconds). Default: 0.5
    pub hampel_window_seconds: f64,

    /// Hampel rejection threshold in robust scale units. Default: 3.0
    pub hampel_k: f64,

    /// Median smoothing window (seconds). Default: 0.2
    pub median_window_seconds: f64,

    /// Moving-average smoothing window (seconds). Default: 0.2
    pub mean_window_seconds: f64,

    /// Maximum points per map-matching request. Default: 90
    pub max_chunk_points: usize,

    /// Subsample step applied to a track before map matching.
    /// Default: 2 (every second point)
    pub match_subsample_step: usize,

    /// Buffer distance for the merge overlap test (meters).
    /// Default: 10.0 (urban road width tolerance)
    pub dedup_buffer_meters: f64,
}

impl Default for RoughnessConfig {
    fn default() -> Self {
        Self {
            max_gap_seconds: 15.0,
            max_gap_meters: 200.0,
            min_track_samples: 11,
            min_track_meters: 50.0,
            window_step_meters: 100.0,
            min_window_meters: 20.0,
            min_speed_mps: 8.3,
            highpass_window_seconds: 1.0,
            hampel_window_seconds: 0.5,
            hampel_k: 3.0,
            median_window_seconds: 0.2,
            mean_window_seconds: 0.2,
            max_chunk_points: 90,
            match_subsample_step: 2,
            dedup_buffer_meters: 10.0,
        }
    }
}

/// The "last processed timestamp" cursor.
///
/// Monotonically non-decreasing: [`advance`](Self::advance) never lowers the
/// value, so a retried run can only move it forward once the retry succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessingCursor(f64);

impl ProcessingCursor {
    /// Create a cursor at the given timestamp (seconds).
    pub fn new(timestamp_sec: f64) -> Self {
        Self(timestamp_sec)
    }

    /// The cursor value in seconds.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Merge in a candidate timestamp, keeping the maximum.
    pub fn advance(&mut self, timestamp_sec: f64) {
        if timestamp_sec > self.0 {
            self.0 = timestamp_sec;
        }
    }
}

/// Normalize and order a raw sample batch.
///
/// - millisecond timestamps (magnitude > 1e12) are rescaled to seconds
/// - samples with non-finite or out-of-range fields are dropped individually
/// - samples at or before `last_processed` are dropped
/// - the result is sorted by timestamp ascending
pub fn clean_samples(samples: Vec<Sample>, last_processed: Option<f64>) -> Vec<Sample> {
    let input_len = samples.len();

    let mut cleaned: Vec<Sample> = samples
        .into_iter()
        .map(|mut s| {
            if s.timestamp_sec.abs() > 1e12 {
                s.timestamp_sec /= 1000.0;
            }
            s
        })
        .filter(|s| s.is_valid())
        .filter(|s| last_processed.map_or(true, |ts| s.timestamp_sec > ts))
        .collect();

    cleaned.sort_by(|a, b| a.timestamp_sec.total_cmp(&b.timestamp_sec));

    if cleaned.len() < input_len {
        log::debug!(
            "[Ingest] Kept {}/{} samples after cleanup",
            cleaned.len(),
            input_len
        );
    }

    cleaned
}

// ============================================================================
// Tests
// ============================================================================
