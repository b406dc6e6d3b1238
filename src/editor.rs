//! Report editing session: a [`SegmentRecorder`] feeding a [`ReportDraft`].
//!
//! Committed segments land in the draft as soon as they close, and the location
//! fields follow what the geocoder resolves along the way.

use log::{debug, info};

use crate::config::TrackingConfig;
use crate::error::TrackingError;
use crate::geocode::{with_deadline, ReverseGeocoder, NEARBY_RADIUS_M};
use crate::metrics::{ManualMetrics, ProductionMetrics};
use crate::recorder::{RecorderEvent, RecorderState, SegmentRecorder, StopOutcome, StopReport};
use crate::report::{LocationFields, ReportDraft, ReportRecord};
use crate::sampler::PositionProvider;
use crate::{GeoFix, GpsPoint, SegmentKind, TrackSegment};

pub struct ReportEditor<P, G> {
    recorder: SegmentRecorder<P, G>,
    draft: ReportDraft,
}

impl<P: PositionProvider, G: ReverseGeocoder> ReportEditor<P, G> {
    /// Editor for a new, empty report.
    pub fn new(provider: P, geocoder: G, config: TrackingConfig) -> Result<Self, TrackingError> {
        Self::with_draft(ReportDraft::new(), provider, geocoder, config)
    }

    /// Editor for a stored report; its totals are recomputed from its segments.
    pub fn open(record: ReportRecord, provider: P, geocoder: G, config: TrackingConfig) -> Result<Self, TrackingError> {
        Self::with_draft(ReportDraft::load(record), provider, geocoder, config)
    }

    fn with_draft(draft: ReportDraft, provider: P, geocoder: G, config: TrackingConfig) -> Result<Self, TrackingError> {
        let mut editor = Self { recorder: SegmentRecorder::new(provider, geocoder, config)?, draft };
        editor.sync_fallback();
        Ok(editor)
    }

    pub fn recorder(&self) -> &SegmentRecorder<P, G> {
        &self.recorder
    }

    pub fn draft(&self) -> &ReportDraft {
        &self.draft
    }

    pub fn location(&self) -> &LocationFields {
        &self.draft.location
    }

    pub fn metrics(&self) -> &ProductionMetrics {
        self.draft.metrics()
    }

    pub fn segments(&self) -> &[TrackSegment] {
        self.draft.segments()
    }

    fn sync_fallback(&mut self) {
        self.recorder.set_address_fallback(self.draft.location.label());
    }

    pub fn set_street(&mut self, street: impl Into<String>) {
        self.draft.location.street = street.into();
        self.sync_fallback();
    }

    pub fn set_neighborhood(&mut self, neighborhood: impl Into<String>) {
        self.draft.location.neighborhood = neighborhood.into();
        self.sync_fallback();
    }

    pub fn toggle_perimeter_street(&mut self, street: &str) -> &str {
        self.draft.location.toggle_perimeter_street(street)
    }

    pub fn set_manual_metrics(&mut self, manual: ManualMetrics) -> Result<&ProductionMetrics, TrackingError> {
        self.draft.set_manual(manual)
    }

    /// Start recording a segment.
    ///
    /// Once the start fix is in, empty location fields are pre-filled from its
    /// address and nearby streets are fetched as suggestions.
    pub async fn start_segment(&mut self, kind: SegmentKind) -> Result<GeoFix, TrackingError> {
        let start_fix = self.recorder.start(kind).await?;

        let deadline = self.recorder.config().geocode_timeout();
        let point = start_fix.point();
        if let Some(address) = with_deadline(deadline, self.recorder.geocoder().reverse(point)).await {
            self.draft.location.fill_if_empty(&address);
            self.sync_fallback();
        }
        self.refresh_suggestions(point).await;

        Ok(start_fix)
    }

    async fn refresh_suggestions(&mut self, point: GpsPoint) {
        let deadline = self.recorder.config().geocode_timeout();
        match tokio::time::timeout(deadline, self.recorder.geocoder().nearby(point)).await {
            Ok(places) => {
                debug!(
                    "[ReportEditor] {} streets, {} neighborhoods within {}m",
                    places.streets.len(),
                    places.neighborhoods.len(),
                    NEARBY_RADIUS_M
                );
                self.draft.location.set_suggestions(places);
            }
            Err(_) => debug!("[ReportEditor] Nearby lookup gave up after {:?}", deadline),
        }
    }

    pub async fn next_event(&mut self) -> Option<RecorderEvent> {
        self.recorder.next_event().await
    }

    /// Stop the live segment. A LINEAR segment is appended to the report right away.
    pub async fn stop_segment(&mut self) -> Result<StopReport, TrackingError> {
        self.sync_fallback();
        let report = self.recorder.stop().await?;

        if let StopOutcome::Committed(segment) = &report.outcome {
            self.draft.add_segment(segment.clone())?;
            if let Some(address) = &report.address {
                self.draft.location.overwrite(address);
                self.sync_fallback();
            }
        }
        Ok(report)
    }

    /// Commit the pending AREA segment with an operator-typed width.
    pub fn supply_width(&mut self, input: &str) -> Result<&ProductionMetrics, TrackingError> {
        let segment = self.recorder.supply_width(input)?;
        self.draft.add_segment(segment)
    }

    pub fn discard_pending(&mut self) -> Result<TrackSegment, TrackingError> {
        self.recorder.discard_pending()
    }

    pub fn cancel_segment(&mut self) -> bool {
        self.recorder.cancel()
    }

    /// Delete a committed segment. The operator has already confirmed.
    pub fn remove_segment(&mut self, id: &str) -> Result<TrackSegment, TrackingError> {
        self.draft.remove_segment(id)
    }

    /// Take a fresh fix, refill street/neighborhood from its address and refresh
    /// the suggestion lists.
    pub async fn refresh_location(&mut self) -> Result<GeoFix, TrackingError> {
        let fix = self.recorder.sampler().acquire_fix(self.recorder.provider()).await?;

        let deadline = self.recorder.config().geocode_timeout();
        match with_deadline(deadline, self.recorder.geocoder().reverse(fix.point())).await {
            Some(address) => {
                info!("[ReportEditor] Location refreshed: {} / {}", address.street, address.neighborhood);
                self.draft.location.overwrite(&address);
                self.sync_fallback();
            }
            None => debug!("[ReportEditor] No address for refreshed fix"),
        }
        self.refresh_suggestions(fix.point()).await;
        Ok(fix)
    }

    /// Set the street by hand and look up which neighborhood it belongs to.
    ///
    /// Returns the neighborhood when the lookup found one.
    pub async fn correct_street(&mut self, street: &str) -> Option<String> {
        self.set_street(street);
        if street.trim().is_empty() {
            return None;
        }

        let deadline = self.recorder.config().geocode_timeout();
        let region = self.recorder.config().search_region.clone();
        let hood = with_deadline(
            deadline,
            self.recorder.geocoder().neighborhood_of_street(street, &region),
        )
        .await?;
        self.set_neighborhood(hood.clone());
        Some(hood)
    }

    /// Build the record to persist.
    ///
    /// Fails while a segment is live or awaiting its width, and on an empty segment
    /// list unless `confirm_empty` is set.
    pub fn submit(&self, confirm_empty: bool) -> Result<ReportRecord, TrackingError> {
        match self.recorder.state() {
            RecorderState::Recording | RecorderState::Closing => return Err(TrackingError::RecordingInProgress),
            RecorderState::PendingWidth => return Err(TrackingError::PendingSegmentUnresolved),
            RecorderState::Idle => {}
        }
        let record = self.draft.to_record(confirm_empty)?;
        info!(
            "[ReportEditor] Report ready: {} segments, capina {:.1}m, rocagem {:.1}m²",
            record.segments.len(),
            record.metrics.capina_m,
            record.metrics.rocagem_m2
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::test_support::FixedGeocoder;
    use crate::geocode::{AddressLabel, NearbyPlaces, NoGeocoder};
    use crate::sampler::test_support::{fix, Reply, ScriptedProvider};

    fn editor(provider: ScriptedProvider, geocoder: FixedGeocoder) -> ReportEditor<ScriptedProvider, FixedGeocoder> {
        ReportEditor::new(provider, geocoder, TrackingConfig::default()).unwrap()
    }

    async fn drain<P: PositionProvider, G: ReverseGeocoder>(ed: &mut ReportEditor<P, G>) {
        while let Some(event) = ed.next_event().await {
            if event == RecorderEvent::StreamEnded {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_linear_segment_lands_in_report() {
        let provider = ScriptedProvider::new(vec![
            Reply::Fix(fix(0.0, 0.0, 5.0)),
            Reply::Fix(fix(0.0, 0.0002, 5.0)),
        ]);
        provider.push_watch(vec![fix(0.0, 0.0001, 10.0), fix(0.0, 0.0002, 10.0)]);
        let mut geocoder = FixedGeocoder::new(Some(AddressLabel::new("Rua Ó de Almeida", "Reduto")));
        geocoder.nearby = NearbyPlaces { streets: vec!["Rua A".into()], neighborhoods: vec!["Reduto".into()] };
        let mut ed = editor(provider, geocoder);

        ed.start_segment(SegmentKind::Linear).await.unwrap();
        assert_eq!(ed.location().street, "Rua Ó de Almeida");
        assert_eq!(ed.location().suggestions.streets, vec!["Rua A"]);

        drain(&mut ed).await;
        ed.stop_segment().await.unwrap();

        assert_eq!(ed.segments().len(), 1);
        assert_eq!(ed.metrics().capina_m, 22.2);
        assert_eq!(ed.segments()[0].street, "Rua Ó de Almeida");
    }

    #[tokio::test]
    async fn test_prefill_keeps_typed_fields() {
        let provider = ScriptedProvider::new(vec![Reply::Fix(fix(0.0, 0.0, 5.0))]);
        let mut ed = editor(provider, FixedGeocoder::new(Some(AddressLabel::new("Rua GPS", "Marco"))));
        ed.set_street("Rua Digitada");

        ed.start_segment(SegmentKind::Linear).await.unwrap();
        assert_eq!(ed.location().street, "Rua Digitada");
        assert_eq!(ed.location().neighborhood, "Marco");
    }

    #[tokio::test]
    async fn test_committed_segment_overwrites_location() {
        let provider = ScriptedProvider::new(vec![
            Reply::Fix(fix(0.0, 0.0, 5.0)),
            Reply::Fix(fix(0.0, 0.0, 5.0)),
        ]);
        let mut ed = editor(provider, FixedGeocoder::new(Some(AddressLabel::new("Rua Nova", "Umarizal"))));
        ed.set_street("Rua Velha");
        ed.start_segment(SegmentKind::Linear).await.unwrap();
        assert_eq!(ed.location().street, "Rua Velha");

        ed.stop_segment().await.unwrap();

        assert_eq!(ed.location().street, "Rua Nova");
        assert_eq!(ed.location().neighborhood, "Umarizal");
    }

    #[tokio::test]
    async fn test_area_segment_after_width() {
        let provider = ScriptedProvider::new(vec![
            Reply::Fix(fix(0.0, 0.0, 5.0)),
            Reply::Fix(fix(0.0, 0.0009, 5.0)),
        ]);
        provider.push_watch(vec![fix(0.0, 0.0003, 8.0), fix(0.0, 0.0006, 8.0), fix(0.0, 0.0009, 8.0)]);
        let mut ed = editor(provider, FixedGeocoder::new(None));

        ed.start_segment(SegmentKind::Area).await.unwrap();
        drain(&mut ed).await;
        ed.stop_segment().await.unwrap();
        assert!(ed.segments().is_empty());
        assert!(matches!(ed.submit(true), Err(TrackingError::PendingSegmentUnresolved)));

        assert!(ed.supply_width("0").is_err());
        let metrics = *ed.supply_width("2").unwrap();
        let distance = ed.segments()[0].distance;
        assert_eq!(metrics.rocagem_m2, ((distance * 2.0) * 10.0).round() / 10.0);
        assert_eq!(metrics.capina_m, 0.0);
        assert!(ed.submit(false).is_ok());
    }

    #[tokio::test]
    async fn test_discarded_area_changes_nothing() {
        let provider = ScriptedProvider::new(vec![
            Reply::Fix(fix(0.0, 0.0, 5.0)),
            Reply::Fix(fix(0.0, 0.0, 5.0)),
        ]);
        let mut ed = editor(provider, FixedGeocoder::new(None));
        ed.start_segment(SegmentKind::Area).await.unwrap();
        ed.stop_segment().await.unwrap();

        ed.discard_pending().unwrap();
        assert!(ed.segments().is_empty());
        assert_eq!(*ed.metrics(), ProductionMetrics::default());
    }

    #[tokio::test]
    async fn test_submit_blocked_while_recording() {
        let provider = ScriptedProvider::new(vec![Reply::Fix(fix(0.0, 0.0, 5.0))]);
        let mut ed = editor(provider, FixedGeocoder::new(None));
        ed.start_segment(SegmentKind::Linear).await.unwrap();

        assert!(matches!(ed.submit(true), Err(TrackingError::RecordingInProgress)));
        assert!(ed.cancel_segment());
        assert!(matches!(ed.submit(false), Err(TrackingError::EmptyReportUnconfirmed)));
        assert!(ed.submit(true).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_stop_blocks_submit_until_resumed() {
        let provider = ScriptedProvider::new(vec![Reply::Fix(fix(0.0, 0.0, 5.0))]);
        provider.push_watch(vec![fix(0.0, 0.0001, 5.0)]);
        let mut ed = editor(provider, FixedGeocoder::new(None));
        ed.start_segment(SegmentKind::Linear).await.unwrap();
        drain(&mut ed).await;

        ed.recorder().provider().push_reply(Reply::Hang);
        let interrupted = tokio::time::timeout(std::time::Duration::from_secs(2), ed.stop_segment()).await;
        assert!(interrupted.is_err());
        assert!(matches!(ed.submit(true), Err(TrackingError::RecordingInProgress)));

        ed.stop_segment().await.unwrap();
        assert_eq!(ed.segments().len(), 1);
        assert!(ed.submit(false).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackingConfig { max_accuracy_m: 0.0, ..Default::default() };
        assert!(ReportEditor::new(ScriptedProvider::default(), NoGeocoder, config).is_err());
    }

    #[tokio::test]
    async fn test_open_and_remove_segment() {
        let json = r#"{
            "id": "rd-7",
            "street": "Rua A",
            "metrics": {"capinaM": 999, "rocagemM2": 0, "varricaoM": 3},
            "segments": [
                {"id": "s1", "type": "CAPINAÇÃO", "startedAt": "2024-05-29T12:00:00Z", "endedAt": "2024-05-29T12:05:00Z",
                 "startLocation": {"lat": 0, "lng": 0, "timestamp": 1716984000000},
                 "endLocation": {"lat": 0, "lng": 0.001, "timestamp": 1716984300000},
                 "distance": 111.2, "calculatedValue": 111.2, "pathPoints": []},
                {"id": "s2", "type": "ROCAGEM", "startedAt": "2024-05-29T13:00:00Z", "endedAt": "2024-05-29T13:05:00Z",
                 "startLocation": {"lat": 0, "lng": 0, "timestamp": 1716987600000},
                 "endLocation": {"lat": 0, "lng": 0.001, "timestamp": 1716987900000},
                 "distance": 100, "width": 2, "calculatedValue": 200, "pathPoints": []}
            ]
        }"#;
        let record = ReportRecord::from_json(json).unwrap();
        let mut ed = ReportEditor::open(record, ScriptedProvider::default(), NoGeocoder, TrackingConfig::default()).unwrap();

        assert_eq!(ed.metrics().capina_m, 111.2);
        assert_eq!(ed.metrics().rocagem_m2, 200.0);
        assert_eq!(ed.metrics().varricao_m, 3.0);

        ed.remove_segment("s1").unwrap();
        assert_eq!(ed.metrics().capina_m, 0.0);
        assert!(matches!(ed.remove_segment("s1"), Err(TrackingError::SegmentNotFound(_))));

        let out = ed.submit(false).unwrap();
        assert_eq!(out.extra["id"], "rd-7");
        assert_eq!(out.street, "Rua A");
    }

    #[tokio::test]
    async fn test_refresh_location() {
        let provider = ScriptedProvider::new(vec![Reply::Fix(fix(-1.45, -48.49, 12.0))]);
        let mut geocoder = FixedGeocoder::new(Some(AddressLabel::new("Av. Nazaré", "Nazaré")));
        geocoder.nearby = NearbyPlaces { streets: vec!["Tv. Benjamin Constant".into()], neighborhoods: vec![] };
        let mut ed = editor(provider, geocoder);

        let fix = ed.refresh_location().await.unwrap();
        assert_eq!(fix.accuracy, Some(12.0));
        assert_eq!(ed.location().street, "Av. Nazaré");
        assert_eq!(ed.location().neighborhood, "Nazaré");
        assert_eq!(ed.location().suggestions.streets, vec!["Tv. Benjamin Constant"]);

        // Exhausted script: every tier fails, fields untouched
        assert!(matches!(ed.refresh_location().await, Err(TrackingError::PositionUnavailable { .. })));
        assert_eq!(ed.location().street, "Av. Nazaré");
    }

    #[tokio::test]
    async fn test_correct_street_looks_up_neighborhood() {
        let mut geocoder = FixedGeocoder::new(None);
        geocoder.street_neighborhood = Some("Batista Campos".into());
        let mut ed = editor(ScriptedProvider::default(), geocoder);
        ed.set_neighborhood("Errado");

        assert_eq!(ed.correct_street("Rua dos Tamoios").await, Some("Batista Campos".to_string()));
        assert_eq!(ed.location().street, "Rua dos Tamoios");
        assert_eq!(ed.location().neighborhood, "Batista Campos");

        let mut ed = editor(ScriptedProvider::default(), FixedGeocoder::new(None));
        ed.set_neighborhood("Reduto");
        assert_eq!(ed.correct_street("Rua Sem Nome").await, None);
        assert_eq!(ed.location().street, "Rua Sem Nome");
        assert_eq!(ed.location().neighborhood, "Reduto");
    }

    #[tokio::test]
    async fn test_perimeter_and_manual_metrics() {
        let mut ed = editor(ScriptedProvider::default(), FixedGeocoder::new(None));
        ed.toggle_perimeter_street("Rua A");
        assert_eq!(ed.toggle_perimeter_street("Rua B"), "Entre Rua A e Rua B");

        ed.set_manual_metrics(ManualMetrics { pintura_postes_und: 4.0, ..Default::default() }).unwrap();
        let record = ed.submit(true).unwrap();
        assert_eq!(record.perimeter, "Entre Rua A e Rua B");
        assert_eq!(record.metrics.pintura_postes_und, 4.0);
    }
}
