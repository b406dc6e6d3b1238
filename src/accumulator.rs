//! Noise-filtered odometer over a stream of position updates.
//!
//! ## Algorithm
//! 1. Drop updates whose accuracy radius is worse than `max_accuracy_m`
//! 2. Measure the haversine distance from the last accepted point
//! 3. Accept only if that distance reaches `min_displacement_m`; the delta is added to the
//!    total and the point appended to the path
//! 4. Otherwise drop the update without moving the anchor, so slow movement still
//!    adds up once it clears the threshold
//!
//! The total never decreases and always equals the path's polyline length.

use log::trace;

use crate::config::TrackingConfig;
use crate::geo_utils::haversine_distance;
use crate::{GeoFix, GpsPoint};

/// What happened to one position update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    Accepted { delta_m: f64, total_m: f64 },
    /// Accuracy radius above the ceiling.
    LowAccuracy { accuracy_m: f64 },
    /// Too close to the last accepted point: stationary jitter.
    BelowDisplacement { delta_m: f64 },
    InvalidCoordinates,
}

impl FixOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FixOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub accepted: u32,
    pub low_accuracy: u32,
    pub below_displacement: u32,
    pub invalid: u32,
}

#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    max_accuracy_m: f64,
    min_displacement_m: f64,
    last_accepted: GeoFix,
    total_m: f64,
    path: Vec<GpsPoint>,
    stats: FilterStats,
}

impl DistanceAccumulator {
    /// Start a new odometer anchored at `seed`; the path begins with the seed point.
    pub fn new(seed: GeoFix, config: &TrackingConfig) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m,
            min_displacement_m: config.min_displacement_m,
            path: vec![seed.point()],
            last_accepted: seed,
            total_m: 0.0,
            stats: FilterStats::default(),
        }
    }

    /// Feed one raw update through the filters.
    pub fn offer(&mut self, fix: &GeoFix) -> FixOutcome {
        if !fix.is_valid() {
            self.stats.invalid += 1;
            trace!("[DistanceAccumulator] Dropped invalid fix ({}, {})", fix.latitude, fix.longitude);
            return FixOutcome::InvalidCoordinates;
        }

        if let Some(accuracy) = fix.accuracy {
            // NaN fails this comparison, so it is rejected along with poor fixes
            if !(accuracy <= self.max_accuracy_m) {
                self.stats.low_accuracy += 1;
                trace!(
                    "[DistanceAccumulator] Dropped fix with accuracy {:.1}m (max {:.1}m)",
                    accuracy, self.max_accuracy_m
                );
                return FixOutcome::LowAccuracy { accuracy_m: accuracy };
            }
        }

        let delta_m = haversine_distance(&self.last_accepted.point(), &fix.point());
        if delta_m < self.min_displacement_m {
            self.stats.below_displacement += 1;
            trace!(
                "[DistanceAccumulator] Jitter {:.2}m below {:.2}m floor",
                delta_m, self.min_displacement_m
            );
            return FixOutcome::BelowDisplacement { delta_m };
        }

        self.total_m += delta_m;
        self.path.push(fix.point());
        self.last_accepted = fix.clone();
        self.stats.accepted += 1;

        FixOutcome::Accepted { delta_m, total_m: self.total_m }
    }

    /// Distance accumulated so far, in meters.
    pub fn distance(&self) -> f64 {
        self.total_m
    }

    pub fn path(&self) -> &[GpsPoint] {
        &self.path
    }

    pub fn last_accepted(&self) -> &GeoFix {
        &self.last_accepted
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Consume the odometer, yielding the total, the accepted path and the last accepted fix.
    pub fn finish(self) -> (f64, Vec<GpsPoint>, GeoFix) {
        (self.total_m, self.path, self.last_accepted)
    }
}
