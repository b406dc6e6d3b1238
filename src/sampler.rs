//! One-shot fix acquisition with progressively relaxed constraints.
//!
//! Consumer GPS hardware regularly fails a strict high-accuracy request near buildings
//! or indoors. [`GeoSampler`] walks the [`RetryPolicy`] tiers in order, bounding each
//! attempt with its own timeout, and returns the first valid fix.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use log::{debug, warn};

use crate::config::{FixOptions, RetryPolicy};
use crate::error::{PositionError, TrackingError};
use crate::GeoFix;

/// Live position updates. Dropping the stream releases the platform watch.
pub type PositionStream = BoxStream<'static, Result<GeoFix, PositionError>>;

/// The device positioning service.
pub trait PositionProvider {
    /// Request a single fix under the given constraints.
    fn current_fix(
        &self,
        options: &FixOptions,
    ) -> impl Future<Output = Result<GeoFix, PositionError>> + Send;

    /// Subscribe to continuous high-accuracy updates.
    fn watch(&self) -> PositionStream;
}

/// Last reported accuracy radius, shared with whoever displays it.
///
/// Advisory only: nothing in the derivation path reads it.
#[derive(Debug, Clone)]
pub struct AccuracyGauge {
    bits: Arc<AtomicU64>,
}

impl AccuracyGauge {
    pub fn new() -> Self {
        Self { bits: Arc::new(AtomicU64::new(f64::NAN.to_bits())) }
    }

    pub fn record(&self, accuracy: Option<f64>) {
        if let Some(acc) = accuracy.filter(|a| a.is_finite()) {
            self.bits.store(acc.to_bits(), Ordering::Relaxed);
        }
    }

    /// Last known accuracy in meters, `None` until a fix with an accuracy arrives.
    pub fn get(&self) -> Option<f64> {
        let value = f64::from_bits(self.bits.load(Ordering::Relaxed));
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }
}

impl Default for AccuracyGauge {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GeoSampler {
    policy: RetryPolicy,
    gauge: AccuracyGauge,
}

impl GeoSampler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, gauge: AccuracyGauge::new() }
    }

    pub fn gauge(&self) -> &AccuracyGauge {
        &self.gauge
    }

    /// Acquire one fix, trying each tier in turn.
    ///
    /// Fails with [`TrackingError::PositionUnavailable`] carrying the last tier's error
    /// once every tier has failed or timed out.
    pub async fn acquire_fix<P: PositionProvider>(&self, provider: &P) -> Result<GeoFix, TrackingError> {
        let attempts = self.policy.tiers.len();
        let mut last_error = PositionError::Unavailable("no acquisition tiers configured".into());

        for (i, tier) in self.policy.tiers.iter().enumerate() {
            let outcome = tokio::time::timeout(tier.timeout(), provider.current_fix(tier)).await;

            match outcome {
                Ok(Ok(fix)) if fix.is_valid() => {
                    self.gauge.record(fix.accuracy);
                    debug!(
                        "[GeoSampler] Fix on tier {}/{}: ({:.6}, {:.6}) accuracy={:?}",
                        i + 1, attempts, fix.latitude, fix.longitude, fix.accuracy
                    );
                    return Ok(fix);
                }
                Ok(Ok(fix)) => {
                    warn!(
                        "[GeoSampler] Tier {}/{} returned invalid coordinates ({}, {})",
                        i + 1, attempts, fix.latitude, fix.longitude
                    );
                    last_error = PositionError::Unavailable("invalid coordinates".into());
                }
                Ok(Err(e)) => {
                    warn!("[GeoSampler] Tier {}/{} failed: {}", i + 1, attempts, e);
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        "[GeoSampler] Tier {}/{} timed out after {:?}",
                        i + 1, attempts, tier.timeout()
                    );
                    last_error = PositionError::Timeout;
                }
            }
        }

        Err(TrackingError::PositionUnavailable { attempts, source: last_error })
    }
}
