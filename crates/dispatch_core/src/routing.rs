//! Pluggable travel-time oracles.
//!
//! Implementations, selectable via [`OracleKind`]:
//!
//! - **`GridTravelTimeOracle`**: great-circle distance at a fixed average speed. No I/O.
//! - **`OsrmTravelTimeOracle`** (feature `osrm`): calls an OSRM HTTP endpoint with a bounded timeout.
//! - **`FixedTableOracle`**: in-memory (origin, destination) table for fixtures and tests.
//!
//! Remote backends are wrapped in [`CachedTravelTimeOracle`] by [`build_oracle`].
//! Callers must never hold a storage transaction open across an [`TravelTimeOracle::estimate`] call.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OracleConfig;
use crate::model::Coord;

/// Earth radius used by the great-circle estimate.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("routing service answered '{0}'")]
    Api(String),
    #[error("no route between the requested points")]
    NoRoute,
    #[error("routing service returned an unusable duration ({0})")]
    InvalidDuration(f64),
}

/// Which travel-time backend to use.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum OracleKind {
    /// Great-circle estimate, zero external dependencies.
    #[default]
    Grid,
    /// OSRM HTTP endpoint (e.g. `"http://localhost:5000"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

/// Estimates how long a minibus takes to drive between two points.
pub trait TravelTimeOracle: Send + Sync {
    /// Travel time in minutes. Failures are per-call and always retryable.
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError>;
}

impl<T: TravelTimeOracle + ?Sized> TravelTimeOracle for Box<T> {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        (**self).estimate(from, to)
    }
}

impl<T: TravelTimeOracle + ?Sized> TravelTimeOracle for std::sync::Arc<T> {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        (**self).estimate(from, to)
    }
}

/// Reject NaN, infinite and negative durations coming back from a backend.
fn checked_minutes(minutes: f64) -> Result<f64, OracleError> {
    if minutes.is_finite() && minutes >= 0.0 {
        Ok(minutes)
    } else {
        Err(OracleError::InvalidDuration(minutes))
    }
}

/// Haversine distance between two coordinates.
pub fn distance_km(a: Coord, b: Coord) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

// ---------------------------------------------------------------------------
// Great-circle provider (always available)
// ---------------------------------------------------------------------------

/// Straight-line travel time at a fixed average city speed.
#[derive(Debug, Clone, Copy)]
pub struct GridTravelTimeOracle {
    pub speed_kmh: f64,
}

impl Default for GridTravelTimeOracle {
    fn default() -> Self {
        Self { speed_kmh: 40.0 }
    }
}

impl TravelTimeOracle for GridTravelTimeOracle {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        let km = distance_km(from, to);
        checked_minutes(km / self.speed_kmh * 60.0)
    }
}

// ---------------------------------------------------------------------------
// OSRM provider (behind `osrm` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "osrm")]
pub mod osrm {
    use super::*;
    use reqwest::blocking::Client;
    use std::time::Duration;

    /// Travel times from an OSRM `/route` endpoint.
    pub struct OsrmTravelTimeOracle {
        client: Client,
        endpoint: String,
    }

    impl OsrmTravelTimeOracle {
        pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OracleError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| OracleError::Http(err.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            })
        }
    }

    /// Minimal OSRM JSON response structures.
    #[derive(Deserialize)]
    struct OsrmResponse {
        code: String,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        duration: f64, // seconds
    }

    impl TravelTimeOracle for OsrmTravelTimeOracle {
        fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
            let url = format!(
                "{}/route/v1/driving/{},{};{},{}?overview=false",
                self.endpoint, from.lng, from.lat, to.lng, to.lat,
            );

            let resp: OsrmResponse = self
                .client
                .get(&url)
                .send()
                .and_then(|r| r.json())
                .map_err(|err| OracleError::Http(err.to_string()))?;

            if resp.code != "Ok" {
                return Err(OracleError::Api(resp.code));
            }

            let route = resp
                .routes
                .and_then(|routes| routes.into_iter().next())
                .ok_or(OracleError::NoRoute)?;
            checked_minutes(route.duration / 60.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed table provider
// ---------------------------------------------------------------------------

/// Exact bit pattern of a coordinate, usable as a hash key.
type CoordKey = (u64, u64);

fn coord_key(c: Coord) -> CoordKey {
    (c.lat.to_bits(), c.lng.to_bits())
}

/// Directional lookup table; pairs that were never inserted fail with `NoRoute`.
#[derive(Debug, Clone, Default)]
pub struct FixedTableOracle {
    table: HashMap<(CoordKey, CoordKey), f64>,
}

impl FixedTableOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: Coord, to: Coord, minutes: f64) {
        self.table.insert((coord_key(from), coord_key(to)), minutes);
    }

    pub fn with_route(mut self, from: Coord, to: Coord, minutes: f64) -> Self {
        self.insert(from, to, minutes);
        self
    }
}

impl TravelTimeOracle for FixedTableOracle {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        self.table
            .get(&(coord_key(from), coord_key(to)))
            .copied()
            .ok_or(OracleError::NoRoute)
            .and_then(checked_minutes)
    }
}

// ---------------------------------------------------------------------------
// Caching wrapper
// ---------------------------------------------------------------------------

/// LRU-cached wrapper around any [`TravelTimeOracle`].
///
/// Cache key is the directional `(from, to)` pair. Only successful estimates
/// are cached; on inner failure the optional great-circle fallback is tried.
pub struct CachedTravelTimeOracle {
    inner: Box<dyn TravelTimeOracle>,
    cache: Mutex<LruCache<(CoordKey, CoordKey), f64>>,
    fallback: Option<GridTravelTimeOracle>,
}

impl CachedTravelTimeOracle {
    pub fn new(
        inner: Box<dyn TravelTimeOracle>,
        capacity: NonZeroUsize,
        fallback: Option<GridTravelTimeOracle>,
    ) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            fallback,
        }
    }
}

impl TravelTimeOracle for CachedTravelTimeOracle {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        let key = (coord_key(from), coord_key(to));

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(minutes) = cache.get(&key) {
                return Ok(*minutes);
            }
        }

        let result = self.inner.estimate(from, to).or_else(|err| match &self.fallback {
            Some(grid) => {
                tracing::debug!(error = %err, "travel-time backend failed, using great-circle estimate");
                grid.estimate(from, to)
            }
            None => Err(err),
        });

        if let Ok(minutes) = result {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key, minutes);
            }
        }

        result
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Construct a boxed oracle from configuration.
///
/// `Grid` is returned bare (it is already cheap). Remote backends are wrapped
/// in a [`CachedTravelTimeOracle`] unless `cache_capacity` is zero.
pub fn build_oracle(config: &OracleConfig) -> Result<Box<dyn TravelTimeOracle>, OracleError> {
    let grid = GridTravelTimeOracle {
        speed_kmh: config.grid_speed_kmh,
    };
    match &config.kind {
        OracleKind::Grid => Ok(Box::new(grid)),

        #[cfg(feature = "osrm")]
        OracleKind::Osrm { endpoint } => {
            let inner = osrm::OsrmTravelTimeOracle::new(
                endpoint,
                std::time::Duration::from_millis(config.timeout_ms),
            )?;
            Ok(with_cache(Box::new(inner), config, grid))
        }
    }
}

#[cfg(feature = "osrm")]
fn with_cache(
    inner: Box<dyn TravelTimeOracle>,
    config: &OracleConfig,
    grid: GridTravelTimeOracle,
) -> Box<dyn TravelTimeOracle> {
    let fallback = config.fallback_to_grid.then_some(grid);
    match NonZeroUsize::new(config.cache_capacity) {
        Some(capacity) => Box::new(CachedTravelTimeOracle::new(inner, capacity, fallback)),
        None => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn kl_sentral() -> Coord {
        Coord::new(3.134200, 101.687012).expect("coord")
    }

    fn twin_towers() -> Coord {
        Coord::new(3.157874, 101.711578).expect("coord")
    }

    struct CountingOracle {
        calls: Arc<AtomicUsize>,
        answer: Result<f64, OracleError>,
    }

    impl TravelTimeOracle for CountingOracle {
        fn estimate(&self, _from: Coord, _to: Coord) -> Result<f64, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[test]
    fn grid_estimate_scales_with_distance() {
        let oracle = GridTravelTimeOracle::default();
        let minutes = oracle.estimate(kl_sentral(), twin_towers()).expect("estimate");
        let km = distance_km(kl_sentral(), twin_towers());
        assert!(km > 3.0 && km < 5.0, "unexpected distance {km}");
        assert!((minutes - km / 40.0 * 60.0).abs() < 1e-9);
        assert_eq!(oracle.estimate(kl_sentral(), kl_sentral()), Ok(0.0));
    }

    #[test]
    fn fixed_table_is_directional() {
        let oracle = FixedTableOracle::new().with_route(kl_sentral(), twin_towers(), 12.0);
        assert_eq!(oracle.estimate(kl_sentral(), twin_towers()), Ok(12.0));
        assert_eq!(
            oracle.estimate(twin_towers(), kl_sentral()),
            Err(OracleError::NoRoute)
        );
    }

    #[test]
    fn cache_serves_repeat_lookups() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = CountingOracle {
            calls: Arc::clone(&calls),
            answer: Ok(7.5),
        };
        let cached = CachedTravelTimeOracle::new(
            Box::new(inner),
            NonZeroUsize::new(4).expect("capacity"),
            None,
        );
        for _ in 0..3 {
            assert_eq!(cached.estimate(kl_sentral(), twin_towers()), Ok(7.5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_does_not_remember_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = CountingOracle {
            calls: Arc::clone(&calls),
            answer: Err(OracleError::Http("timed out".into())),
        };
        let cached = CachedTravelTimeOracle::new(
            Box::new(inner),
            NonZeroUsize::new(4).expect("capacity"),
            None,
        );
        assert!(cached.estimate(kl_sentral(), twin_towers()).is_err());
        assert!(cached.estimate(kl_sentral(), twin_towers()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fallback_covers_backend_failure() {
        let inner = CountingOracle {
            calls: Arc::new(AtomicUsize::new(0)),
            answer: Err(OracleError::NoRoute),
        };
        let cached = CachedTravelTimeOracle::new(
            Box::new(inner),
            NonZeroUsize::new(4).expect("capacity"),
            Some(GridTravelTimeOracle::default()),
        );
        assert!(cached.estimate(kl_sentral(), twin_towers()).is_ok());
    }

    #[test]
    fn backend_durations_are_sanity_checked() {
        let oracle = FixedTableOracle::new().with_route(kl_sentral(), twin_towers(), -1.0);
        assert_eq!(
            oracle.estimate(kl_sentral(), twin_towers()),
            Err(OracleError::InvalidDuration(-1.0))
        );
    }

    #[test]
    fn grid_kind_builds_without_cache() {
        let oracle = build_oracle(&OracleConfig::default()).expect("oracle");
        assert!(oracle.estimate(kl_sentral(), twin_towers()).is_ok());
    }
}
