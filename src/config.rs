//! Tracking configuration: noise-filter thresholds and the GPS retry tiers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// One acquisition attempt's constraints, handed to the platform as-is.
///
/// Mirrors the options of a browser/mobile "get current position" call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOptions {
    /// Ask the receiver for its best (slower, battery-hungry) fix.
    pub high_accuracy: bool,
    /// How long to wait for this attempt before moving to the next tier.
    pub timeout_ms: u64,
    /// Oldest cached fix the platform may hand back instead of a fresh one. 0 = fresh only.
    pub max_cache_age_ms: u64,
}

impl FixOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age_ms)
    }
}

/// Ordered acquisition tiers, each strictly looser than the one before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub tiers: Vec<FixOptions>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                // High accuracy, fresh fix only
                FixOptions { high_accuracy: true, timeout_ms: 8_000, max_cache_age_ms: 0 },
                // Network-assisted accuracy, more time
                FixOptions { high_accuracy: false, timeout_ms: 10_000, max_cache_age_ms: 0 },
                // Anything from the last minute will do
                FixOptions { high_accuracy: false, timeout_ms: 15_000, max_cache_age_ms: 60_000 },
            ],
        }
    }
}

impl RetryPolicy {
    /// Check that the tiers only ever loosen: strictly longer timeouts, cache tolerance
    /// never shrinking, and no tier asking for high accuracy after one that didn't.
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.tiers.is_empty() {
            return Err(TrackingError::InvalidConfig("retry policy has no tiers".into()));
        }
        if self.tiers[0].timeout_ms == 0 {
            return Err(TrackingError::InvalidConfig("tier 1 has a zero timeout".into()));
        }

        for (i, pair) in self.tiers.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            let tier = i + 2;
            if next.timeout_ms <= prev.timeout_ms {
                return Err(TrackingError::InvalidConfig(format!(
                    "tier {} timeout {}ms is not longer than {}ms",
                    tier, next.timeout_ms, prev.timeout_ms
                )));
            }
            if next.max_cache_age_ms < prev.max_cache_age_ms {
                return Err(TrackingError::InvalidConfig(format!(
                    "tier {} tightens the cache age to {}ms",
                    tier, next.max_cache_age_ms
                )));
            }
            if next.high_accuracy && !prev.high_accuracy {
                return Err(TrackingError::InvalidConfig(format!(
                    "tier {} re-enables high accuracy",
                    tier
                )));
            }
        }

        Ok(())
    }
}

/// Configuration for segment tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    /// Position updates reporting a worse accuracy radius than this are dropped.
    /// Default: 45.0 meters
    pub max_accuracy_m: f64,

    /// Minimum displacement from the last accepted point before an update counts.
    /// Filters stationary jitter. Default: 4.0 meters
    pub min_displacement_m: f64,

    /// Elapsed-time counter resolution.
    /// Default: 1000 ms
    pub tick_interval_ms: u64,

    /// Upper bound on a single reverse-geocoding lookup; it never blocks a commit longer.
    /// Default: 5000 ms
    pub geocode_timeout_ms: u64,

    /// City/state suffix appended to street searches when correcting a street name.
    /// Default: "Belém, PA"
    pub search_region: String,

    /// Acquisition tiers for one-shot fixes.
    pub retry: RetryPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 45.0,
            min_displacement_m: 4.0,
            tick_interval_ms: 1_000,
            geocode_timeout_ms: 5_000,
            search_region: "Belém, PA".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TrackingConfig {
    /// Parse a JSON config (missing fields take their defaults) and validate it.
    pub fn from_json(json: &str) -> Result<Self, TrackingError> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if !(self.max_accuracy_m.is_finite() && self.max_accuracy_m > 0.0) {
            return Err(TrackingError::InvalidConfig(format!(
                "maxAccuracyM must be positive, got {}",
                self.max_accuracy_m
            )));
        }
        if !(self.min_displacement_m.is_finite() && self.min_displacement_m > 0.0) {
            return Err(TrackingError::InvalidConfig(format!(
                "minDisplacementM must be positive, got {}",
                self.min_displacement_m
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(TrackingError::InvalidConfig("tickIntervalMs must be positive".into()));
        }
        self.retry.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocode_timeout_ms)
    }
}
