//! # Map Matching
//!
//! Snapping a raw GPS polyline onto plausible road geometry is delegated to
//! an external service. This module owns the client side of that contract:
//!
//! - [`MapMatcher`] is the seam the pipeline talks to: one chunk of points
//!   in, one matched polyline out.
//! - [`snap_track`] handles the per-request point cap by submitting
//!   overlapping chunks (the last point of a chunk is the first point of the
//!   next, so the stitched result has no geometric seam) and falls back to a
//!   chunk's raw coordinates when that chunk fails. Degraded, never fatal.
//! - [`MapboxMatcher`] (behind the `http` feature) implements the trait
//!   against the Mapbox Matching API with rate limiting and retry.

use crate::GpsPoint;
use std::fmt::{Display, Formatter};

/// Errors from a map-matching request.
#[derive(Debug, Clone)]
pub enum MatchError {
    /// Transport-level failure (DNS, timeout, connection reset).
    Network(String),
    /// Non-success HTTP status.
    Http(u16),
    /// Response body did not parse.
    Parse(String),
    /// The service answered but produced no usable matching.
    NoMatch,
    /// The client could not be constructed (missing token, runtime failure).
    /// This is the only fatal configuration error in the pipeline.
    Config(String),
}

impl Display for MatchError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MatchError::Network(msg) => write!(f, "Network error: {}", msg),
            MatchError::Http(code) => write!(f, "HTTP error: {}", code),
            MatchError::Parse(msg) => write!(f, "Parse error: {}", msg),
            MatchError::NoMatch => write!(f, "No matching found"),
            MatchError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MatchError {}

/// The map-matching seam.
///
/// Implementations receive an ordered chunk of raw GPS points (at most the
/// configured per-request cap) and return the best-matched road polyline.
/// The blanket `Sync` bound lets one matcher be shared across parallel
/// per-track processing; implementations are expected to do their own rate
/// limiting.
pub trait MapMatcher: Sync {
    /// Match one chunk of points against the road network.
    fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError>;
}

/// Snap a whole track through the matcher, chunk by chunk.
///
/// Chunks overlap by one point and the duplicated first point of every chunk
/// after the first is dropped when concatenating, so chunk boundaries leave
/// no seam. A failed chunk degrades to its raw coordinates; the rest of the
/// track still gets matched geometry.
pub fn snap_track<M: MapMatcher + ?Sized>(
    matcher: &M,
    points: &[GpsPoint],
    max_chunk_points: usize,
) -> Vec<GpsPoint> {
    let n = points.len();
    let cap = max_chunk_points.max(2);

    let mut snapped: Vec<GpsPoint> = Vec::with_capacity(n);
    let mut i = 0;
    while i < n.saturating_sub(1) {
        let j = (i + cap).min(n);
        let chunk = &points[i..j];

        let matched = match matcher.match_chunk(chunk) {
            Ok(matched) if matched.len() >= 2 => matched,
            Ok(_) => {
                log::warn!("[Matching] Chunk {}..{} matched to a degenerate line, using raw points", i, j);
                chunk.to_vec()
            }
            Err(e) => {
                log::warn!("[Matching] Chunk {}..{} failed ({}), using raw points", i, j, e);
                chunk.to_vec()
            }
        };

        if i == 0 {
            snapped.extend(matched);
        } else {
            snapped.extend(matched.into_iter().skip(1));
        }
        i = j - 1;
    }

    snapped
}

// ============================================================================
// Mapbox Matching API client
// ============================================================================

#[cfg(feature = "http")]
pub use mapbox::MapboxMatcher;

#[cfg(feature = "http")]
mod mapbox {
    use super::{MapMatcher, MatchError};
    use crate::GpsPoint;
    use log::{debug, warn};
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    const DEFAULT_BASE_URL: &str = "https://api.mapbox.com/matching/v5/mapbox/driving";
    const REQUEST_TIMEOUT_SECS: u64 = 15;
    // Spaces out request starts so a batch of tracks cannot burst the API.
    const DISPATCH_INTERVAL_MS: u64 = 100;
    const MAX_RETRIES: u32 = 3;

    #[derive(Debug, Deserialize)]
    struct MatchResponse {
        code: String,
        #[serde(default)]
        matchings: Vec<Matching>,
    }

    #[derive(Debug, Deserialize)]
    struct Matching {
        geometry: MatchGeometry,
    }

    #[derive(Debug, Deserialize)]
    struct MatchGeometry {
        coordinates: Vec<[f64; 2]>,
    }

    /// Blocking Mapbox Matching API client.
    ///
    /// Holds its own tokio runtime so the pipeline can stay synchronous;
    /// requests are dispatched with a minimum spacing and retried with
    /// exponential backoff on transport errors and 429 responses.
    pub struct MapboxMatcher {
        client: reqwest::Client,
        runtime: tokio::runtime::Runtime,
        access_token: String,
        base_url: String,
        next_dispatch: Mutex<Instant>,
    }

    impl MapboxMatcher {
        /// Create a matcher with the given access token.
        ///
        /// An empty token is a configuration error: the run must abort
        /// before any state mutation rather than degrade every chunk.
        pub fn new(access_token: impl Into<String>) -> Result<Self, MatchError> {
            Self::with_base_url(access_token, DEFAULT_BASE_URL)
        }

        /// Create a matcher against a non-default endpoint (tests, proxies).
        pub fn with_base_url(
            access_token: impl Into<String>,
            base_url: impl Into<String>,
        ) -> Result<Self, MatchError> {
            let access_token = access_token.into();
            if access_token.is_empty() {
                return Err(MatchError::Config("missing Mapbox access token".to_string()));
            }

            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .map_err(|e| MatchError::Config(format!("failed to build HTTP client: {}", e)))?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| MatchError::Config(format!("failed to build runtime: {}", e)))?;

            Ok(Self {
                client,
                runtime,
                access_token,
                base_url: base_url.into(),
                next_dispatch: Mutex::new(Instant::now()),
            })
        }

        /// Wait for our dispatch slot. Each caller reserves a unique slot
        /// spaced `DISPATCH_INTERVAL_MS` apart, so concurrent tracks queue
        /// instead of bursting.
        fn wait_for_dispatch_slot(&self) {
            let wait = {
                let mut next = self.next_dispatch.lock().unwrap();
                let now = Instant::now();
                let dispatch_at = if *next > now { *next } else { now };
                *next = dispatch_at + Duration::from_millis(DISPATCH_INTERVAL_MS);
                dispatch_at.saturating_duration_since(now)
            };
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }

        async fn request_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            let url = format!("{}/{}", self.base_url, coords_path(chunk));
            let mut retries = 0u32;

            loop {
                let response = self
                    .client
                    .get(&url)
                    .query(&[
                        ("access_token", self.access_token.as_str()),
                        ("geometries", "geojson"),
                        ("tidy", "true"),
                    ])
                    .send()
                    .await;

                match response {
                    Ok(resp) => {
                        let status = resp.status();

                        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                            retries += 1;
                            if retries > MAX_RETRIES {
                                return Err(MatchError::Http(status.as_u16()));
                            }
                            let backoff = Duration::from_millis(500 * (1 << retries.min(3)));
                            warn!("[Mapbox] 429, retry {} after {:?}", retries, backoff);
                            tokio::time::sleep(backoff).await;
                            continue;
                        }

                        if !status.is_success() {
                            return Err(MatchError::Http(status.as_u16()));
                        }

                        let data: MatchResponse = resp
                            .json()
                            .await
                            .map_err(|e| MatchError::Parse(e.to_string()))?;

                        if data.code != "Ok" {
                            debug!("[Mapbox] Response code {:?}", data.code);
                            return Err(MatchError::NoMatch);
                        }
                        let matching = data.matchings.into_iter().next().ok_or(MatchError::NoMatch)?;

                        // Response coordinates are [lon, lat].
                        return Ok(matching
                            .geometry
                            .coordinates
                            .into_iter()
                            .map(|c| GpsPoint::new(c[1], c[0]))
                            .collect());
                    }
                    Err(e) => {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(MatchError::Network(e.to_string()));
                        }
                        let backoff = Duration::from_millis(200 * (1 << retries));
                        warn!("[Mapbox] Request error: {}, retry {} after {:?}", e, retries, backoff);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }

    impl MapMatcher for MapboxMatcher {
        fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            if chunk.len() < 2 {
                return Err(MatchError::NoMatch);
            }
            self.wait_for_dispatch_slot();
            self.runtime.block_on(self.request_chunk(chunk))
        }
    }

    /// Mapbox coordinate path: `lon,lat` pairs at fixed 6-decimal precision,
    /// joined by semicolons.
    pub(super) fn coords_path(chunk: &[GpsPoint]) -> String {
        chunk
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.longitude, p.latitude))
            .collect::<Vec<_>>()
            .join(";")
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns chunks unchanged and records their sizes.
    struct Recording {
        chunk_sizes: Mutex<Vec<usize>>,
    }

    impl Recording {
        fn new() -> Self {
            Self { chunk_sizes: Mutex::new(Vec::new()) }
        }
    }

    impl MapMatcher for Recording {
        fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            self.chunk_sizes.lock().unwrap().push(chunk.len());
            Ok(chunk.to_vec())
        }
    }

    /// Fails every request.
    struct AlwaysFails;

    impl MapMatcher for AlwaysFails {
        fn match_chunk(&self, _chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            Err(MatchError::Network("connection refused".to_string()))
        }
    }

    /// Shifts matched points east, failing on a chosen call index.
    struct ShiftButFailOnce {
        fail_call: usize,
        calls: Mutex<usize>,
    }

    impl MapMatcher for ShiftButFailOnce {
        fn match_chunk(&self, chunk: &[GpsPoint]) -> Result<Vec<GpsPoint>, MatchError> {
            let mut calls = self.calls.lock().unwrap();
            let call = *calls;
            *calls += 1;
            if call == self.fail_call {
                return Err(MatchError::Http(502));
            }
            Ok(chunk
                .iter()
                .map(|p| GpsPoint::new(p.latitude, p.longitude + 0.01))
                .collect())
        }
    }

    fn track(n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(3.14 + i as f64 * 1e-5, 101.6869))
            .collect()
    }

    #[test]
    fn test_snap_track_chunks_with_overlap() {
        let matcher = Recording::new();
        let points = track(200);

        let snapped = snap_track(&matcher, &points, 90);

        // Overlapping chunks: 0..90, 89..179, 178..200.
        assert_eq!(*matcher.chunk_sizes.lock().unwrap(), vec![90, 90, 22]);
        // Identity matching with seam-point dedup reproduces the input.
        assert_eq!(snapped, points);
    }

    #[test]
    fn test_snap_track_single_chunk() {
        let matcher = Recording::new();
        let points = track(50);
        let snapped = snap_track(&matcher, &points, 90);
        assert_eq!(*matcher.chunk_sizes.lock().unwrap(), vec![50]);
        assert_eq!(snapped, points);
    }

    #[test]
    fn test_total_failure_falls_back_to_raw() {
        let points = track(200);
        let snapped = snap_track(&AlwaysFails, &points, 90);
        assert_eq!(snapped, points);
    }

    #[test]
    fn test_partial_failure_degrades_one_chunk_only() {
        let matcher = ShiftButFailOnce { fail_call: 1, calls: Mutex::new(0) };
        let points = track(200);

        let snapped = snap_track(&matcher, &points, 90);
        assert_eq!(snapped.len(), points.len());

        // First chunk (0..90) is shifted.
        assert!((snapped[10].longitude - points[10].longitude - 0.01).abs() < 1e-12);
        // Second chunk (90..179) fell back to raw coordinates.
        assert_eq!(snapped[120], points[120]);
        // Third chunk is shifted again.
        assert!((snapped[190].longitude - points[190].longitude - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_snap_track_too_short() {
        let matcher = Recording::new();
        assert!(snap_track(&matcher, &track(1), 90).is_empty());
        assert!(matcher.chunk_sizes.lock().unwrap().is_empty());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_coords_path_precision() {
        let path = mapbox::coords_path(&[
            GpsPoint::new(3.1390127, 101.6869443),
            GpsPoint::new(3.14, 101.69),
        ]);
        assert_eq!(path, "101.686944,3.139013;101.690000,3.140000");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_mapbox_requires_token() {
        assert!(matches!(
            MapboxMatcher::new("").err(),
            Some(MatchError::Config(_))
        ));
    }
}
