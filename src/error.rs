//! Error taxonomy for position acquisition, segment recording and report aggregation.
//!
//! Nothing here is fatal to the host: every error leaves the recorder in a stable
//! state (idle, recording or awaiting width) and is meant to be shown as a
//! non-blocking alert.

use thiserror::Error;

/// Failure reported by the platform positioning service for a single request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    Unavailable(String),

    #[error("position request timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum TrackingError {
    /// Every retry tier failed to produce a fix.
    #[error("no GPS fix after {attempts} attempts: {source}")]
    PositionUnavailable {
        attempts: usize,
        #[source]
        source: PositionError,
    },

    /// Operator-entered width was empty, non-numeric or not strictly positive.
    #[error("invalid width: {0:?}")]
    InvalidWidth(String),

    #[error("recorder is busy ({state})")]
    RecorderBusy { state: &'static str },

    #[error("no segment is being recorded")]
    NotRecording,

    #[error("no segment is waiting for a width")]
    NoPendingSegment,

    #[error("segment {0} not found")]
    SegmentNotFound(String),

    #[error("invalid value {value} for {field}")]
    InvalidManualMetric { field: &'static str, value: f64 },

    #[error("an area segment is still waiting for its width")]
    PendingSegmentUnresolved,

    #[error("a segment is still being recorded")]
    RecordingInProgress,

    #[error("report has no segments and submission was not confirmed")]
    EmptyReportUnconfirmed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
