//! Best-effort address lookup for fixes.
//!
//! Geocoding only pre-fills or suggests location fields. Every lookup may fail
//! (network down, rate limited, nothing nearby) and callers treat that as "no answer".

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GpsPoint;

/// Placeholder street stored on a segment when nothing better is known.
pub const UNKNOWN_STREET: &str = "Trecho Registrado";
/// Placeholder neighborhood stored on a segment when nothing better is known.
pub const UNKNOWN_NEIGHBORHOOD: &str = "Bairro Registrado";
/// Search radius for nearby street/neighborhood suggestions.
pub const NEARBY_RADIUS_M: u32 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLabel {
    pub street: String,
    pub neighborhood: String,
}

impl AddressLabel {
    pub fn new(street: impl Into<String>, neighborhood: impl Into<String>) -> Self {
        Self { street: street.into(), neighborhood: neighborhood.into() }
    }

    pub fn placeholder() -> Self {
        Self::new(UNKNOWN_STREET, UNKNOWN_NEIGHBORHOOD)
    }

    pub fn is_empty(&self) -> bool {
        self.street.is_empty() && self.neighborhood.is_empty()
    }

    /// Fill each empty field from `fallback`.
    pub fn or(self, fallback: &AddressLabel) -> AddressLabel {
        AddressLabel {
            street: if self.street.is_empty() { fallback.street.clone() } else { self.street },
            neighborhood: if self.neighborhood.is_empty() {
                fallback.neighborhood.clone()
            } else {
                self.neighborhood
            },
        }
    }
}

/// Named streets and neighborhoods around a point, sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NearbyPlaces {
    pub streets: Vec<String>,
    pub neighborhoods: Vec<String>,
}

pub trait ReverseGeocoder {
    /// Resolve street and neighborhood for a point.
    fn reverse(&self, point: GpsPoint) -> impl Future<Output = Option<AddressLabel>> + Send;

    /// Named streets and neighborhoods in the vicinity, for suggestion lists.
    fn nearby(&self, _point: GpsPoint) -> impl Future<Output = NearbyPlaces> + Send {
        async { NearbyPlaces::default() }
    }

    /// Neighborhood of a street searched by name (within `region`).
    fn neighborhood_of_street(
        &self,
        _street: &str,
        _region: &str,
    ) -> impl Future<Output = Option<String>> + Send {
        async { None }
    }
}

/// Geocoder that never answers. For offline use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeocoder;

impl ReverseGeocoder for NoGeocoder {
    fn reverse(&self, _point: GpsPoint) -> impl Future<Output = Option<AddressLabel>> + Send {
        async { None }
    }
}

/// Run a lookup under a deadline; a timeout counts as no answer.
pub async fn with_deadline<T, F>(deadline: Duration, lookup: F) -> Option<T>
where
    F: Future<Output = Option<T>>,
{
    match tokio::time::timeout(deadline, lookup).await {
        Ok(answer) => answer,
        Err(_) => {
            warn!("[Geocode] Lookup gave up after {:?}", deadline);
            None
        }
    }
}

// =============================================================================
// OpenStreetMap response parsing
// =============================================================================

const STREET_KEYS: [&str; 5] = ["road", "street", "pedestrian", "path", "living_street"];
const NEIGHBORHOOD_KEYS: [&str; 4] = ["suburb", "neighbourhood", "city_district", "district"];

fn first_field(address: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| address.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Extract street/neighborhood from a Nominatim `reverse` response.
pub fn address_from_nominatim(body: &Value) -> Option<AddressLabel> {
    let address = body.get("address")?;
    let label = AddressLabel {
        street: first_field(address, &STREET_KEYS),
        neighborhood: first_field(address, &NEIGHBORHOOD_KEYS),
    };
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

/// Extract the neighborhood of the first hit of a Nominatim `search` response.
pub fn neighborhood_from_search(body: &Value) -> Option<String> {
    let address = body.as_array()?.first()?.get("address")?;
    let hood = first_field(address, &NEIGHBORHOOD_KEYS[..3]);
    if hood.is_empty() {
        None
    } else {
        Some(hood)
    }
}

/// Split an Overpass `out tags` response into named highways and named boundaries.
pub fn nearby_from_overpass(body: &Value) -> NearbyPlaces {
    let mut streets = BTreeSet::new();
    let mut neighborhoods = BTreeSet::new();

    let elements = body.get("elements").and_then(Value::as_array);
    for element in elements.into_iter().flatten() {
        let Some(tags) = element.get("tags") else { continue };
        let Some(name) = tags.get("name").and_then(Value::as_str) else { continue };
        if tags.get("highway").is_some() {
            streets.insert(name.to_string());
        } else {
            neighborhoods.insert(name.to_string());
        }
    }

    NearbyPlaces {
        streets: streets.into_iter().collect(),
        neighborhoods: neighborhoods.into_iter().collect(),
    }
}

/// Overpass QL for named highways and level-10 administrative areas within `radius_m`.
pub fn overpass_query(point: GpsPoint, radius_m: u32) -> String {
    let (lat, lng) = (point.latitude, point.longitude);
    format!(
        "[out:json][timeout:15];(way[\"highway\"][\"name\"](around:{r},{lat},{lng});\
         way[\"boundary\"=\"administrative\"][\"admin_level\"=\"10\"](around:{r},{lat},{lng}););out tags;",
        r = radius_m,
        lat = lat,
        lng = lng
    )
}
