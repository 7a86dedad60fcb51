//! # Acceleration Signal Denoising
//!
//! The fixed filter chain applied to a track's vertical acceleration before
//! roughness estimation:
//!
//! 1. **High-pass**: subtract a centred rolling mean (~1 s) to remove slow
//!    baseline drift from device tilt and gravity leakage.
//! 2. **Hampel outlier rejection** (~0.5 s): replace points that deviate from
//!    the local median by more than `k` robust scale units. Removes shock
//!    outliers without feeding them into neighbouring windows.
//! 3. **Median smoothing** (~0.2 s).
//! 4. **Moving-average smoothing** (~0.2 s).
//!
//! Window lengths are given in seconds and converted to an odd sample count
//! using the track's estimated sampling rate (reciprocal of the median time
//! delta), with a floor of 3 samples, so the chain behaves the same whether
//! the phone sampled at 20 Hz or 200 Hz. Edge samples use shrinking centred
//! windows rather than being dropped.
//!
//! Every stage is a pure slice-in, `Vec`-out function; nothing is mutated in
//! place, which keeps per-track processing trivially parallel.

use crate::RoughnessConfig;

/// Scale factor turning a median absolute deviation into a robust sigma
/// estimate for normally distributed noise.
const MAD_SIGMA: f64 = 1.4826;

/// Median time delta of a timestamp array, ignoring non-finite and
/// non-positive steps. `None` when no usable step exists.
pub fn median_dt(t: &[f64]) -> Option<f64> {
    let mut deltas: Vec<f64> = t
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_by(f64::total_cmp);
    Some(median_of_sorted(&deltas))
}

/// Estimated sampling rate in Hz. Falls back to 100 Hz when the timestamps
/// carry no usable deltas.
pub fn estimate_sample_rate(t: &[f64]) -> f64 {
    median_dt(t).map_or(100.0, |dt| 1.0 / dt)
}

/// Convert a window length in seconds to an odd sample count, floor 3.
pub fn window_samples(seconds: f64, sample_rate_hz: f64) -> usize {
    let n = (seconds * sample_rate_hz).round() as i64;
    let n = n.max(3) as usize;
    if n % 2 == 1 {
        n
    } else {
        n + 1
    }
}

/// Centred rolling mean with shrinking windows at the edges.
pub fn rolling_mean(y: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || y.len() < 2 {
        return y.to_vec();
    }
    let half = window / 2;
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(y.len());
            let slice = &y[lo..hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Centred rolling median with shrinking windows at the edges.
pub fn rolling_median(y: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || y.len() < 2 {
        return y.to_vec();
    }
    let half = window / 2;
    let mut scratch = Vec::with_capacity(window);
    (0..y.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(y.len());
            scratch.clear();
            scratch.extend_from_slice(&y[lo..hi]);
            scratch.sort_by(f64::total_cmp);
            median_of_sorted(&scratch)
        })
        .collect()
}

/// Hampel filter: replace a point with the local median when it deviates
/// from it by more than `k` times the local robust scale (1.4826 x MAD).
///
/// A zero local MAD means the neighbourhood carries no spread to judge
/// against, so the point is kept as-is.
pub fn hampel_filter(y: &[f64], window: usize, k: f64) -> Vec<f64> {
    if window <= 1 || y.len() < 2 {
        return y.to_vec();
    }

    let med = rolling_median(y, window);
    let deviation: Vec<f64> = y.iter().zip(&med).map(|(v, m)| (v - m).abs()).collect();
    let mad = rolling_median(&deviation, window);

    y.iter()
        .enumerate()
        .map(|(i, &v)| {
            let scale = MAD_SIGMA * mad[i];
            if scale > 0.0 && deviation[i] > k * scale {
                med[i]
            } else {
                v
            }
        })
        .collect()
}

/// Run the full denoise chain over one track's vertical acceleration.
///
/// `t_rel` is the matching relative-time array (seconds from the first
/// sample). Inputs shorter than 2 samples are returned unchanged.
pub fn denoise(accel: &[f64], t_rel: &[f64], config: &RoughnessConfig) -> Vec<f64> {
    if accel.len() < 2 {
        return accel.to_vec();
    }

    let fs = estimate_sample_rate(t_rel);

    // High-pass: remove the slow baseline.
    let hp_window = window_samples(config.highpass_window_seconds, fs);
    let baseline = rolling_mean(accel, hp_window);
    let hp: Vec<f64> = accel.iter().zip(&baseline).map(|(a, b)| a - b).collect();

    let y = hampel_filter(
        &hp,
        window_samples(config.hampel_window_seconds, fs),
        config.hampel_k,
    );
    let y = rolling_median(&y, window_samples(config.median_window_seconds, fs));
    rolling_mean(&y, window_samples(config.mean_window_seconds, fs))
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn times(n: usize, dt: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * dt).collect()
    }

    #[test]
    fn test_window_samples_odd_with_floor() {
        // 0.2 s at 50 Hz = 10 samples, bumped to 11.
        assert_eq!(window_samples(0.2, 50.0), 11);
        // 1.0 s at 5 Hz = 5 samples, already odd.
        assert_eq!(window_samples(1.0, 5.0), 5);
        // Tiny windows floor at 3.
        assert_eq!(window_samples(0.01, 10.0), 3);
    }

    #[test]
    fn test_estimate_sample_rate_ignores_bad_deltas() {
        let t = vec![0.0, 0.01, 0.01, f64::NAN, 0.03, 0.04];
        let fs = estimate_sample_rate(&t);
        assert_relative_eq!(fs, 100.0, max_relative = 0.01);

        // No usable deltas at all: fall back to 100 Hz.
        assert_eq!(estimate_sample_rate(&[1.0, 1.0, 1.0]), 100.0);
    }

    #[test]
    fn test_rolling_mean_constant() {
        let y = vec![4.2; 20];
        let out = rolling_mean(&y, 5);
        for v in out {
            assert_relative_eq!(v, 4.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rolling_mean_shrinks_at_edges() {
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = rolling_mean(&y, 3);
        // First window is just [1, 2].
        assert_relative_eq!(out[0], 1.5);
        assert_relative_eq!(out[2], 3.0);
        assert_relative_eq!(out[4], 4.5);
    }

    #[test]
    fn test_rolling_median_removes_single_spike() {
        let mut y = vec![0.0; 11];
        y[5] = 50.0;
        let out = rolling_median(&y, 3);
        assert_eq!(out[5], 0.0);
    }

    #[test]
    fn test_hampel_replaces_outlier() {
        // A varied signal, so the rolling MAD is non-zero around the spike.
        let mut y: Vec<f64> = (0..21).map(|i| ((i * 37) % 10) as f64 / 10.0).collect();
        y[10] = 50.0;
        let out = hampel_filter(&y, 5, 3.0);
        assert!(out[10] < 1.0, "outlier survived: {}", out[10]);
        // Inliers are untouched.
        assert_eq!(out[3], y[3]);
    }

    #[test]
    fn test_hampel_keeps_point_when_scale_is_zero() {
        // All-identical neighbourhood: MAD is zero, nothing is replaced.
        let mut y = vec![0.0; 15];
        y[7] = 5.0;
        let out = hampel_filter(&y, 5, 3.0);
        assert_eq!(out[7], 5.0);
    }

    #[test]
    fn test_denoise_constant_signal_unchanged() {
        // Zero-variance signal passes through the whole chain untouched.
        let y = vec![0.0; 100];
        let t = times(100, 0.02);
        let out = denoise(&y, &t, &RoughnessConfig::default());
        assert_eq!(out.len(), y.len());
        for v in out {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_denoise_removes_gravity_offset() {
        // A constant offset is baseline, not roughness.
        let y = vec![9.81; 200];
        let t = times(200, 0.01);
        let out = denoise(&y, &t, &RoughnessConfig::default());
        for v in out {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn test_denoise_suppresses_isolated_spike() {
        let mut y = vec![0.0; 200];
        y[100] = 30.0;
        let t = times(200, 0.01);
        let out = denoise(&y, &t, &RoughnessConfig::default());
        let peak = out.iter().cloned().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(peak < 1.0, "spike not suppressed: peak {}", peak);
    }

    #[test]
    fn test_denoise_short_input_passthrough() {
        let y = vec![1.0];
        let out = denoise(&y, &[0.0], &RoughnessConfig::default());
        assert_eq!(out, y);
    }
}
