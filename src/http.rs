//! OpenStreetMap reverse geocoder (Nominatim + Overpass) with dispatch rate limiting.
//!
//! Nominatim's public instance allows one request per second per client and requires
//! an identifying User-Agent. Every request start goes through a shared
//! [`DispatchRateLimiter`] so concurrent lookups queue up instead of getting banned.
//! Lookups never fail loudly: any network, status or parse error is logged and
//! reported as "no answer".

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::TrackingError;
use crate::geocode::{
    address_from_nominatim, nearby_from_overpass, neighborhood_from_search, overpass_query,
    AddressLabel, NearbyPlaces, ReverseGeocoder, NEARBY_RADIUS_M,
};
use crate::GpsPoint;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

// Nominatim usage policy: at most 1 request per second
const DISPATCH_INTERVAL_MS: u64 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 15;
const MAX_RETRIES: u32 = 3;

/// Dispatch rate limiter - spaces out when requests START.
struct DispatchRateLimiter {
    interval: Duration,
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    consecutive_429s: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            consecutive_429s: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot. Each caller gets a unique slot
    /// spaced `interval` apart.
    async fn wait_for_dispatch_slot(&self) -> u32 {
        let (wait_duration, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();

            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at - now, num)
        };

        // Wait outside the lock
        if wait_duration > Duration::from_millis(5) {
            debug!("[Dispatch #{}] Waiting {:?} for slot", dispatch_num, wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        dispatch_num
    }

    fn record_success(&self) {
        self.consecutive_429s.store(0, Ordering::Relaxed);
    }

    fn record_429(&self) -> Duration {
        let count = self.consecutive_429s.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 2s, 4s, 8s max
        let backoff = self.interval * (1 << count.min(3));
        warn!("[DispatchRateLimiter] Got 429! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

/// Geocoder backed by the public OpenStreetMap services.
pub struct OsmGeocoder {
    client: Client,
    nominatim_url: String,
    overpass_url: String,
    rate_limiter: Arc<DispatchRateLimiter>,
}

impl OsmGeocoder {
    /// `user_agent` must identify the application, per the Nominatim usage policy.
    pub fn new(user_agent: &str) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            nominatim_url: NOMINATIM_URL.to_string(),
            overpass_url: OVERPASS_URL.to_string(),
            rate_limiter: Arc::new(DispatchRateLimiter::new(Duration::from_millis(DISPATCH_INTERVAL_MS))),
        })
    }

    /// Point at self-hosted instances instead of the public ones.
    pub fn with_endpoints(mut self, nominatim_url: impl Into<String>, overpass_url: impl Into<String>) -> Self {
        self.nominatim_url = nominatim_url.into().trim_end_matches('/').to_string();
        self.overpass_url = overpass_url.into();
        self
    }

    /// Send a request built by `build`, retrying on 429 and transport errors.
    async fn fetch_json<F>(&self, label: &str, build: F) -> Option<Value>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retries = 0;

        loop {
            let dispatch_num = self.rate_limiter.wait_for_dispatch_slot().await;
            let req_start = Instant::now();

            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            warn!("[OsmGeocoder] {}: max retries exceeded (429)", label);
                            return None;
                        }
                        let wait = self.rate_limiter.record_429();
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    self.rate_limiter.record_success();

                    if !status.is_success() {
                        warn!("[OsmGeocoder] {}: HTTP {}", label, status);
                        return None;
                    }

                    return match resp.json::<Value>().await {
                        Ok(body) => {
                            debug!("[OsmGeocoder] {} #{} answered in {:?}", label, dispatch_num, req_start.elapsed());
                            Some(body)
                        }
                        Err(e) => {
                            warn!("[OsmGeocoder] {}: JSON parse error: {}", label, e);
                            None
                        }
                    };
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        warn!("[OsmGeocoder] {}: request error: {}", label, e);
                        return None;
                    }
                    let wait = Duration::from_millis(200 * (1 << retries));
                    warn!("[OsmGeocoder] {}: {}, retry {} after {:?}", label, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl ReverseGeocoder for OsmGeocoder {
    fn reverse(&self, point: GpsPoint) -> impl Future<Output = Option<AddressLabel>> + Send {
        async move {
            let url = format!("{}/reverse", self.nominatim_url);
            let lat = point.latitude.to_string();
            let lon = point.longitude.to_string();

            let body = self
                .fetch_json("Nominatim reverse", |client| {
                    client.get(&url).query(&[
                        ("format", "json"),
                        ("lat", lat.as_str()),
                        ("lon", lon.as_str()),
                        ("zoom", "18"),
                        ("addressdetails", "1"),
                    ])
                })
                .await?;

            let label = address_from_nominatim(&body);
            match &label {
                Some(l) => info!("[Geocode] ({:.6}, {:.6}) -> {} / {}", point.latitude, point.longitude, l.street, l.neighborhood),
                None => debug!("[Geocode] No address for ({:.6}, {:.6})", point.latitude, point.longitude),
            }
            label
        }
    }

    fn nearby(&self, point: GpsPoint) -> impl Future<Output = NearbyPlaces> + Send {
        async move {
            let query = overpass_query(point, NEARBY_RADIUS_M);
            let body = self
                .fetch_json("Overpass", |client| client.post(&self.overpass_url).form(&[("data", query.as_str())]))
                .await;
            body.map(|b| nearby_from_overpass(&b)).unwrap_or_default()
        }
    }

    fn neighborhood_of_street(
        &self,
        street: &str,
        region: &str,
    ) -> impl Future<Output = Option<String>> + Send {
        async move {
            let url = format!("{}/search", self.nominatim_url);
            let q = format!("{}, {}", street, region);

            let body = self
                .fetch_json("Nominatim search", |client| {
                    client.get(&url).query(&[
                        ("format", "json"),
                        ("q", q.as_str()),
                        ("addressdetails", "1"),
                        ("limit", "1"),
                    ])
                })
                .await?;
            neighborhood_from_search(&body)
        }
    }
}
