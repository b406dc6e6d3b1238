//! Mobile bindings (UniFFI).
//!
//! The host app owns the platform location service and persistence, so only the
//! pure parts cross the boundary: distance math, width parsing, value derivation,
//! report aggregation and a push-driven odometer.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use log::{debug, info, warn};

use crate::accumulator::{DistanceAccumulator, FixOutcome};
use crate::config::TrackingConfig;
use crate::geo_utils::haversine_distance;
use crate::metrics::{merge_metrics, parse_width, segment_value, sum_by_kind, ManualMetrics, ProductionMetrics};
use crate::{init_logging, GeoFix, GpsPoint, SegmentKind};

/// A fix as delivered by the host's location API.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
}

impl FfiFix {
    fn to_fix(&self) -> GeoFix {
        let timestamp = Utc.timestamp_millis_opt(self.timestamp_ms).single().unwrap_or_else(Utc::now);
        GeoFix::new(self.latitude, self.longitude, self.accuracy, timestamp)
    }
}

/// What the odometer did with an offered fix.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiOfferResult {
    pub accepted: bool,
    /// "accepted", "low_accuracy", "below_displacement" or "invalid"
    pub reason: String,
    pub total_m: f64,
}

/// The minimum a segment needs for its value to be derived.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSegmentValue {
    pub kind: SegmentKind,
    pub distance: f64,
    pub width: Option<f64>,
}

/// Great-circle distance between two points, meters.
#[uniffi::export]
pub fn haversine_distance_m(a: GpsPoint, b: GpsPoint) -> f64 {
    haversine_distance(&a, &b)
}

/// Parse an operator-typed width; `None` when it is not a positive number.
#[uniffi::export]
pub fn parse_segment_width(input: String) -> Option<f64> {
    init_logging();
    match parse_width(&input) {
        Ok(width) => Some(width),
        Err(e) => {
            debug!("[RdTrackerRust] {}", e);
            None
        }
    }
}

/// Segment value in its kind's unit; `None` for an AREA segment without width.
#[uniffi::export]
pub fn derive_segment_value(kind: SegmentKind, distance: f64, width: Option<f64>) -> Option<f64> {
    segment_value(kind, distance, width)
}

/// Recompute the report metrics from its segments and the manual entries.
#[uniffi::export]
pub fn aggregate_report_metrics(segments: Vec<FfiSegmentValue>, manual: ManualMetrics) -> ProductionMetrics {
    init_logging();
    let totals = sum_by_kind(segments.iter().map(|s| (s.kind, s.distance, s.width)));
    let metrics = merge_metrics(&manual, &totals);
    info!(
        "[RdTrackerRust] Aggregated {} segments: capina {:.1}m, rocagem {:.1}m²",
        segments.len(),
        metrics.capina_m,
        metrics.rocagem_m2
    );
    metrics
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Push-driven odometer for hosts that run their own position watch.
#[derive(uniffi::Object)]
pub struct DistanceTracker {
    inner: Mutex<DistanceAccumulator>,
}

#[uniffi::export]
impl DistanceTracker {
    /// Start tracking from `start` with the default filter thresholds.
    #[uniffi::constructor]
    pub fn new(start: FfiFix) -> Arc<Self> {
        init_logging();
        Self::tracking(start, &TrackingConfig::default())
    }

    /// Start tracking with the host's own accuracy gate and displacement floor.
    #[uniffi::constructor]
    pub fn with_thresholds(
        start: FfiFix,
        max_accuracy_m: f64,
        min_displacement_m: f64,
    ) -> Result<Arc<Self>, FfiConfigError> {
        init_logging();
        let config = TrackingConfig { max_accuracy_m, min_displacement_m, ..Default::default() };
        if let Err(e) = config.validate() {
            warn!("[RdTrackerRust] Rejected tracker thresholds: {}", e);
            return Err(FfiConfigError::Invalid { message: e.to_string() });
        }
        Ok(Self::tracking(start, &config))
    }

    pub fn offer(&self, fix: FfiFix) -> FfiOfferResult {
        let mut acc = self.lock();
        let outcome = acc.offer(&fix.to_fix());
        let reason = match outcome {
            FixOutcome::Accepted { .. } => "accepted",
            FixOutcome::LowAccuracy { .. } => "low_accuracy",
            FixOutcome::BelowDisplacement { .. } => "below_displacement",
            FixOutcome::InvalidCoordinates => "invalid",
        };
        FfiOfferResult { accepted: outcome.is_accepted(), reason: reason.to_string(), total_m: acc.distance() }
    }

    pub fn distance_m(&self) -> f64 {
        self.lock().distance()
    }

    pub fn path(&self) -> Vec<GpsPoint> {
        self.lock().path().to_vec()
    }
}

impl DistanceTracker {
    fn tracking(start: FfiFix, config: &TrackingConfig) -> Arc<Self> {
        info!(
            "[RdTrackerRust] DistanceTracker started at ({:.6}, {:.6}), gate {}m, floor {}m",
            start.latitude, start.longitude, config.max_accuracy_m, config.min_displacement_m
        );
        Arc::new(Self { inner: Mutex::new(DistanceAccumulator::new(start.to_fix(), config)) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DistanceAccumulator> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("[RdTrackerRust] DistanceTracker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
