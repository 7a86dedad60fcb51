//! # Windowed IRI Estimation
//!
//! Partitions a track by travelled distance and computes one roughness value
//! per window from the denoised vertical acceleration.
//!
//! The roughness value is a simplified IRI surrogate: integrate acceleration
//! once (trapezoidal) to a velocity-equivalent, integrate its absolute value
//! over the window to a displacement-equivalent, and normalize by the
//! travelled distance in kilometers. It is not the quarter-car-model IRI,
//! but it is monotone in the same vibration energy and cheap enough to run
//! over every batch.
//!
//! Windows that fail the reliability filter (low average speed, too little
//! distance, fewer than two samples) yield no value at all: they are neither
//! zero nor carried forward, so unreliable readings can never paint a road.

use crate::geo_utils::{cumulative_trapezoid, trapezoid};
use crate::RoughnessConfig;

/// Colour band breakpoints and codes, shared with the map viewer.
/// Boundaries are inclusive toward the higher (rougher) band.
const COLOR_BANDS: [(f64, &str); 3] = [
    (2.5, "#22c55e"),
    (4.5, "#eab308"),
    (6.5, "#f97316"),
];
const COLOR_WORST: &str = "#ef4444";

/// Partition a cumulative-distance array into index windows.
///
/// Walks the array and closes a window at the first index where the
/// accumulated distance since the window start reaches `step_m`. Window
/// bounds are inclusive sample indices `(i0, i1)`; consecutive windows share
/// their boundary sample. A trailing partial window is kept only when it
/// spans at least `min_window_m`, otherwise it is dropped (intentionally:
/// short tails are low-confidence data, not coverage worth keeping).
pub fn windows_by_distance(cd: &[f64], step_m: f64, min_window_m: f64) -> Vec<(usize, usize)> {
    let n = cd.len();
    if n < 2 {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut start_idx = 0;
    let mut start_dist = cd[0];

    for i in 1..n {
        if cd[i] - start_dist >= step_m {
            windows.push((start_idx, i));
            start_idx = i;
            start_dist = cd[i];
        }
    }

    if start_idx < n - 1 && cd[n - 1] - start_dist >= min_window_m {
        windows.push((start_idx, n - 1));
    }

    windows
}

/// Compute the IRI surrogate for one window, or `None` when the window is
/// unreliable.
///
/// `t` and `accel` are the window's relative-time and denoised-acceleration
/// subarrays; `distance_m` is the travelled distance the window spans.
pub fn iri_for_window(
    t: &[f64],
    accel: &[f64],
    distance_m: f64,
    config: &RoughnessConfig,
) -> Option<f64> {
    let duration = match (t.first(), t.last()) {
        (Some(first), Some(last)) => last - first,
        _ => return None,
    };
    if duration <= 0.0 {
        return None;
    }

    // Below the speed floor accelerometer drift dominates and shows up as
    // spurious high roughness.
    let avg_speed = distance_m / duration;
    if avg_speed < config.min_speed_mps {
        return None;
    }

    if distance_m < config.min_window_meters || t.len() < 2 {
        return None;
    }

    let velocity = cumulative_trapezoid(accel, t);
    let abs_velocity: Vec<f64> = velocity.iter().map(|v| v.abs()).collect();
    let displacement_equiv = trapezoid(&abs_velocity, t);

    Some(displacement_equiv / (distance_m / 1000.0))
}

/// Map an IRI value to its display colour band.
///
/// # Example
///
/// ```rust
/// use iri_mapper::iri_color;
///
/// assert_eq!(iri_color(1.0), "#22c55e"); // smooth
/// assert_eq!(iri_color(8.0), "#ef4444"); // rough
/// ```
pub fn iri_color(iri: f64) -> &'static str {
    for (limit, color) in COLOR_BANDS {
        if iri < limit {
            return color;
        }
    }
    COLOR_WORST
}

// =============================================================================
// Unit Tests
// =============================================================================
