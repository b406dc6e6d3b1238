//! Segment recording state machine.
//!
//! ```text
//!            start(kind)            stop()                 [LINEAR]
//!   Idle ─────────────────▶ Recording ───────▶ Closing ─────────────▶ Idle  (segment committed)
//!    ▲                                           │
//!    │  supply_width(w > 0)                      │ [AREA]
//!    │  discard_pending()                        ▼
//!    └──────────────────────────────────── PendingWidth
//!
//!   cancel(): any state ─▶ Idle, nothing committed
//! ```
//!
//! One recorder owns at most one position watch and one elapsed-time ticker, both
//! held in a [`WatchSession`] created by `start()` and released on every way out of
//! `Recording` (stop, cancel, or the recorder being dropped). Because every
//! transition takes `&mut self`, a second `start()` cannot run while a fix is
//! being acquired.
//!
//! `stop()` closes the segment before it waits for the end fix and the address. If
//! that wait is dropped, the segment stays in `Closing`, and calling `stop()` again
//! resumes it.

use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{Instant, Interval};
use uuid::Uuid;

use crate::accumulator::{DistanceAccumulator, FixOutcome};
use crate::config::TrackingConfig;
use crate::error::{PositionError, TrackingError};
use crate::geocode::{with_deadline, AddressLabel, ReverseGeocoder};
use crate::metrics::{derive_value, parse_width};
use crate::sampler::{AccuracyGauge, GeoSampler, PositionProvider, PositionStream};
use crate::{GeoFix, GpsPoint, SegmentKind, TrackSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    /// Watch released; waiting for the end fix and address.
    Closing,
    PendingWidth,
}

impl RecorderState {
    pub fn name(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Closing => "closing",
            RecorderState::PendingWidth => "pending width",
        }
    }
}

/// Something the live recording reacted to.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A streamed update went through the odometer filters.
    Position(FixOutcome),
    /// The platform reported an error on the watch; recording continues.
    SignalLost(PositionError),
    /// The platform closed the watch; only ticks follow.
    StreamEnded,
    Tick { elapsed_seconds: u64 },
}

#[derive(Debug)]
pub enum StopOutcome {
    /// LINEAR segment, ready to append to the report.
    Committed(TrackSegment),
    /// AREA segment held until a width is supplied.
    AwaitingWidth { distance_m: f64 },
}

#[derive(Debug)]
pub struct StopReport {
    pub outcome: StopOutcome,
    /// Address resolved for the end fix, if the geocoder answered.
    pub address: Option<AddressLabel>,
    /// Set when the end fix could not be acquired and the last tracked point was used.
    pub warning: Option<TrackingError>,
}

/// Position watch + ticker acquired by `start()`.
struct WatchSession {
    updates: Option<PositionStream>,
    ticker: Interval,
}

impl WatchSession {
    fn open(updates: PositionStream, tick_every: std::time::Duration) -> Self {
        Self {
            updates: Some(updates),
            ticker: tokio::time::interval_at(Instant::now() + tick_every, tick_every),
        }
    }

    fn release(&mut self) {
        if self.updates.take().is_some() {
            debug!("[SegmentRecorder] Position watch released");
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.release();
    }
}

struct ActiveRecording {
    kind: SegmentKind,
    started_at: chrono::DateTime<Utc>,
    start_fix: GeoFix,
    accumulator: DistanceAccumulator,
    session: WatchSession,
    elapsed_seconds: u64,
}

enum Phase {
    Idle,
    Recording(Box<ActiveRecording>),
    /// Closed at the last accepted fix, end fix and address still pending.
    Closing(TrackSegment),
    PendingWidth(TrackSegment),
}

enum Wake {
    Update(Option<Result<GeoFix, PositionError>>),
    Tick,
}

async fn next_update(updates: &mut Option<PositionStream>) -> Option<Result<GeoFix, PositionError>> {
    match updates {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn new_segment_id() -> String {
    format!("seg-{}", Uuid::new_v4().simple())
}

pub struct SegmentRecorder<P, G> {
    provider: P,
    geocoder: G,
    sampler: GeoSampler,
    config: TrackingConfig,
    address_fallback: AddressLabel,
    phase: Phase,
}

impl<P: PositionProvider, G: ReverseGeocoder> SegmentRecorder<P, G> {
    /// Fails with [`TrackingError::InvalidConfig`] when `config` does not validate.
    pub fn new(provider: P, geocoder: G, config: TrackingConfig) -> Result<Self, TrackingError> {
        config.validate()?;
        Ok(Self {
            sampler: GeoSampler::new(config.retry.clone()),
            provider,
            geocoder,
            config,
            address_fallback: AddressLabel::placeholder(),
            phase: Phase::Idle,
        })
    }

    pub fn state(&self) -> RecorderState {
        match self.phase {
            Phase::Idle => RecorderState::Idle,
            Phase::Recording(_) => RecorderState::Recording,
            Phase::Closing(_) => RecorderState::Closing,
            Phase::PendingWidth(_) => RecorderState::PendingWidth,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn geocoder(&self) -> &G {
        &self.geocoder
    }

    pub fn sampler(&self) -> &GeoSampler {
        &self.sampler
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// Last known accuracy, for the live badge.
    pub fn gauge(&self) -> &AccuracyGauge {
        self.sampler.gauge()
    }

    /// Street/neighborhood to store on a segment when the geocoder has no answer.
    pub fn set_address_fallback(&mut self, fallback: AddressLabel) {
        self.address_fallback = fallback.or(&AddressLabel::placeholder());
    }

    pub fn active_kind(&self) -> Option<SegmentKind> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Recording(active) => Some(active.kind),
            Phase::Closing(segment) | Phase::PendingWidth(segment) => Some(segment.kind),
        }
    }

    pub fn live_distance(&self) -> Option<f64> {
        match &self.phase {
            Phase::Recording(active) => Some(active.accumulator.distance()),
            _ => None,
        }
    }

    pub fn live_path(&self) -> Option<&[GpsPoint]> {
        match &self.phase {
            Phase::Recording(active) => Some(active.accumulator.path()),
            _ => None,
        }
    }

    pub fn elapsed_seconds(&self) -> Option<u64> {
        match &self.phase {
            Phase::Recording(active) => Some(active.elapsed_seconds),
            _ => None,
        }
    }

    /// The segment whose `stop()` was interrupted, if any.
    pub fn closing(&self) -> Option<&TrackSegment> {
        match &self.phase {
            Phase::Closing(segment) => Some(segment),
            _ => None,
        }
    }

    /// The closed AREA segment waiting for its width.
    pub fn pending(&self) -> Option<&TrackSegment> {
        match &self.phase {
            Phase::PendingWidth(segment) => Some(segment),
            _ => None,
        }
    }

    /// Acquire the start fix, then open the position watch and the ticker.
    ///
    /// On failure the recorder stays idle.
    pub async fn start(&mut self, kind: SegmentKind) -> Result<GeoFix, TrackingError> {
        let state = self.state();
        if state != RecorderState::Idle {
            return Err(TrackingError::RecorderBusy { state: state.name() });
        }

        let start_fix = self.sampler.acquire_fix(&self.provider).await?;

        // The watch only opens once the anchor exists
        let accumulator = DistanceAccumulator::new(start_fix.clone(), &self.config);
        let session = WatchSession::open(self.provider.watch(), self.config.tick_interval());

        info!(
            "[SegmentRecorder] Started {:?} segment at ({:.6}, {:.6}) accuracy={:?}",
            kind, start_fix.latitude, start_fix.longitude, start_fix.accuracy
        );

        self.phase = Phase::Recording(Box::new(ActiveRecording {
            kind,
            started_at: Utc::now(),
            start_fix: start_fix.clone(),
            accumulator,
            session,
            elapsed_seconds: 0,
        }));

        Ok(start_fix)
    }

    /// Feed one update pushed by the host (instead of, or besides, the watch stream).
    ///
    /// Returns `None` when nothing is being recorded.
    pub fn apply_update(&mut self, fix: &GeoFix) -> Option<FixOutcome> {
        let Phase::Recording(active) = &mut self.phase else {
            return None;
        };
        self.sampler.gauge().record(fix.accuracy);

        let outcome = active.accumulator.offer(fix);
        if let FixOutcome::Accepted { delta_m, total_m } = outcome {
            debug!("[SegmentRecorder] +{:.1}m (total {:.1}m)", delta_m, total_m);
        }
        Some(outcome)
    }

    /// Wait for the next position update or tick while recording.
    ///
    /// Returns `None` immediately when not recording. Drive this from the host's
    /// event loop; dropping the returned future loses nothing.
    pub async fn next_event(&mut self) -> Option<RecorderEvent> {
        let wake = {
            let Phase::Recording(active) = &mut self.phase else {
                return None;
            };
            let session = &mut active.session;
            tokio::select! {
                biased;
                update = next_update(&mut session.updates) => Wake::Update(update),
                _ = session.ticker.tick() => Wake::Tick,
            }
        };

        match wake {
            Wake::Update(Some(Ok(fix))) => self.apply_update(&fix).map(RecorderEvent::Position),
            Wake::Update(Some(Err(e))) => {
                debug!("[SegmentRecorder] Watch error: {}", e);
                Some(RecorderEvent::SignalLost(e))
            }
            Wake::Update(None) => {
                if let Phase::Recording(active) = &mut self.phase {
                    active.session.release();
                }
                warn!("[SegmentRecorder] Position watch ended while recording");
                Some(RecorderEvent::StreamEnded)
            }
            Wake::Tick => {
                let Phase::Recording(active) = &mut self.phase else {
                    return None;
                };
                active.elapsed_seconds += 1;
                Some(RecorderEvent::Tick { elapsed_seconds: active.elapsed_seconds })
            }
        }
    }

    /// Close the live segment.
    ///
    /// The watch and ticker are released and the segment is closed at the last
    /// accepted point before anything is awaited. Then the end fix and its address
    /// are looked up. A LINEAR segment is returned committed; an AREA segment moves to
    /// `PendingWidth`. If the end fix cannot be acquired the segment still closes,
    /// ending at the last tracked point. If this future is dropped midway the segment
    /// waits in `Closing` and the next `stop()` picks it up.
    pub async fn stop(&mut self) -> Result<StopReport, TrackingError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(active) => {
                let segment = self.close_recording(*active);
                self.phase = Phase::Closing(segment);
            }
            Phase::Closing(segment) => {
                info!("[SegmentRecorder] Resuming close of segment {}", segment.id);
                self.phase = Phase::Closing(segment);
            }
            other => {
                self.phase = other;
                return Err(TrackingError::NotRecording);
            }
        }

        let acquired = self.sampler.acquire_fix(&self.provider).await;
        let end_point = match (&acquired, &self.phase) {
            (Ok(fix), _) => fix.point(),
            (Err(_), Phase::Closing(segment)) => segment.end_fix.point(),
            _ => return Err(TrackingError::NotRecording),
        };

        let address = with_deadline(self.config.geocode_timeout(), self.geocoder.reverse(end_point)).await;

        let mut segment = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Closing(segment) => segment,
            other => {
                self.phase = other;
                return Err(TrackingError::NotRecording);
            }
        };

        let warning = match acquired {
            Ok(fix) => {
                segment.end_fix = fix;
                None
            }
            Err(e) => {
                warn!("[SegmentRecorder] End fix unavailable, closing at last tracked point: {}", e);
                Some(e)
            }
        };

        let label = address.clone().unwrap_or_default().or(&self.address_fallback);
        segment.street = label.street;
        segment.neighborhood = label.neighborhood;

        let outcome = match segment.kind {
            SegmentKind::Linear => {
                info!("[SegmentRecorder] Committed linear segment {}: {:.1}m", segment.id, segment.value);
                StopOutcome::Committed(segment)
            }
            SegmentKind::Area => {
                let distance_m = segment.distance;
                self.phase = Phase::PendingWidth(segment);
                StopOutcome::AwaitingWidth { distance_m }
            }
        };

        Ok(StopReport { outcome, address, warning })
    }

    /// Release the watch and turn the live recording into a segment ending at the
    /// last accepted fix.
    fn close_recording(&self, active: ActiveRecording) -> TrackSegment {
        let ActiveRecording { kind, started_at, start_fix, accumulator, session, elapsed_seconds } = active;

        // Releases the watch and the ticker
        drop(session);
        let stats = accumulator.stats();
        let (distance, path, last_fix) = accumulator.finish();

        let mut segment = TrackSegment {
            id: new_segment_id(),
            kind,
            started_at,
            ended_at: Utc::now().max(started_at),
            start_fix,
            end_fix: last_fix,
            street: self.address_fallback.street.clone(),
            neighborhood: self.address_fallback.neighborhood.clone(),
            distance,
            width: None,
            value: 0.0,
            path,
        };
        segment.value = derive_value(&segment).unwrap_or(0.0);

        info!(
            "[SegmentRecorder] Stopped {:?} segment {}: {:.1}m in {}s ({} accepted, {} low accuracy, {} jitter)",
            kind, segment.id, distance, elapsed_seconds,
            stats.accepted, stats.low_accuracy, stats.below_displacement
        );
        segment
    }

    /// Commit the pending AREA segment with an operator-typed width.
    ///
    /// An invalid width leaves the segment pending so the operator can retry.
    pub fn supply_width(&mut self, input: &str) -> Result<TrackSegment, TrackingError> {
        if self.pending().is_none() {
            return Err(TrackingError::NoPendingSegment);
        }
        let width = parse_width(input)?;
        self.commit_pending(width)
    }

    /// Same as [`supply_width`](Self::supply_width) for an already numeric width.
    pub fn supply_width_m(&mut self, width: f64) -> Result<TrackSegment, TrackingError> {
        if self.pending().is_none() {
            return Err(TrackingError::NoPendingSegment);
        }
        if !(width.is_finite() && width > 0.0) {
            return Err(TrackingError::InvalidWidth(width.to_string()));
        }
        self.commit_pending(width)
    }

    fn commit_pending(&mut self, width: f64) -> Result<TrackSegment, TrackingError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::PendingWidth(mut segment) => {
                segment.width = Some(width);
                segment.value = derive_value(&segment).unwrap_or(0.0);
                info!(
                    "[SegmentRecorder] Committed area segment {}: {:.1}m x {:.2}m = {:.1}m²",
                    segment.id, segment.distance, width, segment.value
                );
                Ok(segment)
            }
            other => {
                self.phase = other;
                Err(TrackingError::NoPendingSegment)
            }
        }
    }

    /// Drop the pending AREA segment without committing it.
    pub fn discard_pending(&mut self) -> Result<TrackSegment, TrackingError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::PendingWidth(segment) => {
                info!("[SegmentRecorder] Discarded pending segment {}", segment.id);
                Ok(segment)
            }
            other => {
                self.phase = other;
                Err(TrackingError::NoPendingSegment)
            }
        }
    }

    /// Abandon whatever is in progress. Returns whether anything was discarded.
    pub fn cancel(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => false,
            Phase::Recording(active) => {
                info!(
                    "[SegmentRecorder] Cancelled {:?} recording after {:.1}m",
                    active.kind,
                    active.accumulator.distance()
                );
                true
            }
            Phase::Closing(segment) | Phase::PendingWidth(segment) => {
                info!("[SegmentRecorder] Cancelled closed segment {}", segment.id);
                true
            }
        }
    }
}
