//! # RD Tracker
//!
//! GPS segment tracking and production-metric derivation for daily field reports
//! (Relatório Diário) of street-cleaning and mowing crews.
//!
//! This library provides:
//! - Tiered one-shot GPS acquisition that degrades gracefully on poor hardware
//! - A noise-filtered odometer over live position updates
//! - A segment recording state machine (start, stop, width entry, cancel)
//! - Derivation of linear (m) and area (m²) production totals per report
//!
//! ## Features
//!
//! - **`http`** - Enable the OpenStreetMap reverse geocoder (Nominatim + Overpass)
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use rd_tracker::{recompute_totals, merge_metrics, ManualMetrics, TrackSegment};
//!
//! let stored: Vec<TrackSegment> = vec![];
//! let manual = ManualMetrics { varricao_m: 50.0, ..Default::default() };
//!
//! let metrics = merge_metrics(&manual, &recompute_totals(&stored));
//! assert_eq!(metrics.varricao_m, 50.0);
//! assert_eq!(metrics.capina_m, 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod accumulator;
pub mod config;
pub mod editor;
pub mod error;
pub mod geo_utils;
pub mod geocode;
pub mod metrics;
pub mod recorder;
pub mod report;
pub mod sampler;

// HTTP module for reverse geocoding
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::OsmGeocoder;

#[cfg(feature = "ffi")]
mod ffi;

pub use accumulator::{DistanceAccumulator, FixOutcome};
pub use config::{FixOptions, RetryPolicy, TrackingConfig};
pub use editor::ReportEditor;
pub use error::{PositionError, TrackingError};
pub use geocode::{AddressLabel, NearbyPlaces, NoGeocoder, ReverseGeocoder};
pub use metrics::{
    derive_value, merge_metrics, parse_width, recompute_totals, segment_value, sum_by_kind,
    AutoTotals, ManualMetrics, ProductionMetrics, WidthOption, WIDTH_OPTIONS,
};
pub use recorder::{RecorderEvent, RecorderState, SegmentRecorder, StopOutcome, StopReport};
pub use report::{LocationFields, ReportDraft, ReportRecord};
pub use sampler::{AccuracyGauge, GeoSampler, PositionProvider, PositionStream};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// Serialized as `{"lat": .., "lng": ..}`, the shape of stored path points.
///
/// # Example
/// ```
/// use rd_tracker::GpsPoint;
/// let point = GpsPoint::new(-1.4558, -48.4902); // Belém
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
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

/// A single positioning sample. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    /// Accuracy radius in meters, when the platform reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Capture time (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Human-readable label resolved for this fix
    #[serde(default, rename = "addressFromGPS", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        Self { latitude, longitude, accuracy, timestamp, address: None }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    pub fn is_valid(&self) -> bool {
        self.point().is_valid()
    }
}

/// How a segment's distance turns into production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SegmentKind {
    /// Weed clearing / scraping, measured in linear meters
    #[serde(rename = "CAPINAÇÃO", alias = "CAPINA")]
    Linear,
    /// Mowing, measured in square meters (distance × width)
    #[serde(rename = "ROCAGEM")]
    Area,
}

impl SegmentKind {
    pub fn unit(&self) -> &'static str {
        match self {
            SegmentKind::Linear => "m",
            SegmentKind::Area => "m²",
        }
    }
}

/// One continuous recording interval within a report.
///
/// `value` always equals `distance` for LINEAR and `distance * width` for AREA.
/// An AREA segment without a width is pending and never part of a committed list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSegment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(rename = "startLocation")]
    pub start_fix: GeoFix,
    #[serde(rename = "endLocation")]
    pub end_fix: GeoFix,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub neighborhood: String,
    /// Accumulated distance, meters
    pub distance: f64,
    /// Strip width in meters (AREA only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Derived production value (m or m²)
    #[serde(rename = "calculatedValue")]
    pub value: f64,
    /// Accepted points, starting with the start fix
    #[serde(rename = "pathPoints")]
    pub path: Vec<GpsPoint>,
}

impl TrackSegment {
    pub fn is_pending(&self) -> bool {
        self.kind == SegmentKind::Area && self.width.is_none()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }

    /// Length of the stored path; equals `distance` for segments recorded here.
    pub fn path_length(&self) -> f64 {
        geo_utils::polyline_length(&self.path)
    }

    pub fn line_string(&self) -> geo::LineString<f64> {
        geo_utils::to_line_string(&self.path)
    }
}

// ============================================================================
// FFI logging
// ============================================================================

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RdTrackerRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Tests
// ============================================================================
