//! # Geographic Utilities
//!
//! Distance computations used by the odometer.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS path in meters |
//! | [`to_line_string`] | Convert a path into a `geo::LineString` for map layers |
//!
//! ## Example
//!
//! ```rust
//! use rd_tracker::{GpsPoint, geo_utils};
//!
//! let path = vec![
//!     GpsPoint::new(-1.4558, -48.4902), // Belém
//!     GpsPoint::new(-1.4560, -48.4900),
//!     GpsPoint::new(-1.4565, -48.4897),
//! ];
//!
//! let length = geo_utils::polyline_length(&path);
//! println!("Path length: {:.1}m", length);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! Great-circle distance on a sphere of radius [`EARTH_RADIUS_M`]. At the scale of a
//! street segment (meters to a few kilometers) the error against the WGS84 ellipsoid is
//! well below GPS noise.
//!
//! Reference: [Haversine formula (Wikipedia)](https://en.wikipedia.org/wiki/Haversine_formula)

use geo::{Coord, LineString};

use crate::GpsPoint;

/// Earth radius used by [`haversine_distance`], in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Inputs are WGS84 degrees; the result is in meters.
///
/// # Example
///
/// ```rust
/// use rd_tracker::{GpsPoint, geo_utils};
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 0.0001);
///
/// let d = geo_utils::haversine_distance(&a, &b);
/// assert!((d - 11.12).abs() < 0.01);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let phi1 = p1.latitude.to_radians();
    let phi2 = p2.latitude.to_radians();
    let d_phi = (p2.latitude - p1.latitude).to_radians();
    let d_lambda = (p2.longitude - p1.longitude).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Calculate the total length of a polyline (GPS path) in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// paths return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert a path into a `geo::LineString` (x = longitude, y = latitude).
pub fn to_line_string(points: &[GpsPoint]) -> LineString<f64> {
    points
        .iter()
        .map(|p| Coord { x: p.longitude, y: p.latitude })
        .collect::<Vec<_>>()
        .into()
}

// =============================================================================
// Unit Tests
// =============================================================================
