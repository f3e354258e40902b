//! Runtime configuration. Every field has a default so a partial JSON file
//! (or none at all) yields a working setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::routing::OracleKind;

/// Fixed fare per passenger per minute of route time used in scoring.
pub const DEFAULT_PROFIT_RATE: f64 = 30.0;
/// Operating cost per minute of driving (approach plus route).
pub const DEFAULT_COST_RATE: f64 = 2.0;
/// Carbon per passenger-minute had they driven alone.
pub const DEFAULT_CARBON_CAR_RATE: f64 = 2.83;
/// Carbon per passenger-minute on the shared bus.
pub const DEFAULT_CARBON_BUS_RATE: f64 = 0.885;
/// Quoted price in cents per minute of estimated route time.
pub const DEFAULT_PRICE_CENTS_PER_MINUTE: f64 = 11.0;
/// Claim attempts before a contended dispatch gives up.
pub const DEFAULT_MAX_CLAIM_ATTEMPTS: u32 = 16;

/// Where the durable store lives and how long a handler waits for the write lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("minibus.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Travel-time lookup backend plus the knobs wrapped around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub kind: OracleKind,
    /// Upper bound for a single remote lookup.
    pub timeout_ms: u64,
    /// Entries kept by the LRU wrapper; 0 disables caching.
    pub cache_capacity: usize,
    /// Fall back to the great-circle estimate when the backend fails.
    pub fallback_to_grid: bool,
    /// Average speed assumed by the great-circle estimate.
    pub grid_speed_kmh: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            timeout_ms: 5_000,
            cache_capacity: 20_000,
            fallback_to_grid: false,
            grid_speed_kmh: 40.0,
        }
    }
}

/// Constants of the route-profit and carbon formulas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub profit_rate: f64,
    pub cost_rate: f64,
    pub carbon_car_rate: f64,
    pub carbon_bus_rate: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            profit_rate: DEFAULT_PROFIT_RATE,
            cost_rate: DEFAULT_COST_RATE,
            carbon_car_rate: DEFAULT_CARBON_CAR_RATE,
            carbon_bus_rate: DEFAULT_CARBON_BUS_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub cents_per_minute: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cents_per_minute: DEFAULT_PRICE_CENTS_PER_MINUTE,
        }
    }
}

/// Top-level configuration for a dispatch deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub store: StoreConfig,
    pub oracle: OracleConfig,
    pub scoring: ScoringConfig,
    pub pricing: PricingConfig,
    /// Claim attempts before a contended dispatch gives up.
    pub max_claim_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            oracle: OracleConfig::default(),
            scoring: ScoringConfig::default(),
            pricing: PricingConfig::default(),
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
        }
    }
}

impl DispatchConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DispatchError::validation(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: DispatchConfig = serde_json::from_str(raw)
            .map_err(|err| DispatchError::validation(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.path = path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("scoring.profit_rate", self.scoring.profit_rate),
            ("scoring.cost_rate", self.scoring.cost_rate),
            ("scoring.carbon_car_rate", self.scoring.carbon_car_rate),
            ("scoring.carbon_bus_rate", self.scoring.carbon_bus_rate),
            ("pricing.cents_per_minute", self.pricing.cents_per_minute),
            ("oracle.grid_speed_kmh", self.oracle.grid_speed_kmh),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value <= 0.0 {
                return Err(DispatchError::validation(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.oracle.timeout_ms == 0 {
            return Err(DispatchError::validation("oracle.timeout_ms must be > 0"));
        }
        if self.store.busy_timeout_ms == 0 {
            return Err(DispatchError::validation("store.busy_timeout_ms must be > 0"));
        }
        if self.max_claim_attempts == 0 {
            return Err(DispatchError::validation("max_claim_attempts must be > 0"));
        }
        Ok(())
    }
}
