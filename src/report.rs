//! Report-level aggregation: the segment list, the metrics derived from it, and the
//! location fields the geocoder helps fill.
//!
//! The persistence layer owns the full report. [`ReportRecord`] reads only what this
//! crate needs and carries every other field through untouched.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrackingError;
use crate::geocode::{AddressLabel, NearbyPlaces};
use crate::metrics::{derive_value, merge_metrics, recompute_totals, AutoTotals, ManualMetrics, ProductionMetrics};
use crate::{GeoFix, TrackSegment};

/// The slice of a stored report this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(default)]
    pub segments: Vec<TrackSegment>,
    #[serde(default)]
    pub metrics: ProductionMetrics,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub perimeter: String,
    /// Start of the first segment ("point A")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoFix>,
    /// Every other report field, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReportRecord {
    pub fn from_json(json: &str) -> Result<Self, TrackingError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, TrackingError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Street, neighborhood and perimeter being edited, plus lookup suggestions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationFields {
    pub street: String,
    pub neighborhood: String,
    pub perimeter: String,
    pub suggestions: NearbyPlaces,
    perimeter_streets: Vec<String>,
}

impl LocationFields {
    pub fn label(&self) -> AddressLabel {
        AddressLabel::new(self.street.clone(), self.neighborhood.clone())
    }

    /// Fill only the fields the operator left empty.
    pub fn fill_if_empty(&mut self, address: &AddressLabel) {
        if self.street.is_empty() {
            self.street = address.street.clone();
        }
        if self.neighborhood.is_empty() {
            self.neighborhood = address.neighborhood.clone();
        }
    }

    /// Replace fields with whatever the address resolved.
    pub fn overwrite(&mut self, address: &AddressLabel) {
        if !address.street.is_empty() {
            self.street = address.street.clone();
        }
        if !address.neighborhood.is_empty() {
            self.neighborhood = address.neighborhood.clone();
        }
    }

    pub fn set_suggestions(&mut self, nearby: NearbyPlaces) {
        // An empty neighborhood list keeps the previous suggestions
        let neighborhoods = if nearby.neighborhoods.is_empty() {
            std::mem::take(&mut self.suggestions.neighborhoods)
        } else {
            nearby.neighborhoods
        };
        self.suggestions = NearbyPlaces { streets: nearby.streets, neighborhoods };
    }

    /// Toggle a cross street and rebuild the perimeter description.
    ///
    /// Two selected streets give "Entre A e B", one gives "Esquina com A". Picking a
    /// third starts over with just that street.
    pub fn toggle_perimeter_street(&mut self, street: &str) -> &str {
        if let Some(pos) = self.perimeter_streets.iter().position(|s| s == street) {
            self.perimeter_streets.remove(pos);
        } else {
            self.perimeter_streets.push(street.to_string());
        }
        if self.perimeter_streets.len() > 2 {
            self.perimeter_streets = vec![street.to_string()];
        }

        self.perimeter = match self.perimeter_streets.as_slice() {
            [a, b] => format!("Entre {} e {}", a, b),
            [a] => format!("Esquina com {}", a),
            _ => String::new(),
        };
        &self.perimeter
    }

    pub fn perimeter_streets(&self) -> &[String] {
        &self.perimeter_streets
    }
}

/// A report being composed or corrected.
///
/// Auto totals are recomputed on every segment change and on load, so the displayed
/// metrics always match the segment list.
#[derive(Debug, Clone, Default)]
pub struct ReportDraft {
    segments: Vec<TrackSegment>,
    manual: ManualMetrics,
    metrics: ProductionMetrics,
    pub location: LocationFields,
    extra: Map<String, Value>,
}

impl ReportDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stored report, re-deriving every segment value and the totals.
    pub fn load(record: ReportRecord) -> Self {
        let ReportRecord { mut segments, metrics, street, neighborhood, perimeter, location: _, extra } = record;

        for segment in &mut segments {
            match derive_value(segment) {
                Some(value) => segment.value = value,
                None => warn!("[ReportDraft] Stored segment {} has no width; it counts as 0", segment.id),
            }
            let drift = (segment.path_length() - segment.distance).abs();
            if drift > 1.0 {
                debug!(
                    "[ReportDraft] Segment {} distance {:.1}m differs from its path length by {:.1}m",
                    segment.id, segment.distance, drift
                );
            }
        }

        let mut draft = Self {
            segments,
            manual: metrics.manual(),
            metrics,
            location: LocationFields { street, neighborhood, perimeter, ..Default::default() },
            extra,
        };
        let stored = draft.metrics.auto();
        draft.recompute();
        if draft.metrics.auto() != stored {
            info!(
                "[ReportDraft] Stored totals {:?} replaced by {:?} recomputed from {} segments",
                stored,
                draft.metrics.auto(),
                draft.segments.len()
            );
        }
        draft
    }

    pub fn segments(&self) -> &[TrackSegment] {
        &self.segments
    }

    pub fn metrics(&self) -> &ProductionMetrics {
        &self.metrics
    }

    pub fn manual(&self) -> &ManualMetrics {
        &self.manual
    }

    /// Exact (unrounded) auto totals.
    pub fn totals(&self) -> AutoTotals {
        recompute_totals(&self.segments)
    }

    fn recompute(&mut self) {
        self.metrics = merge_metrics(&self.manual, &self.totals());
    }

    /// Append a committed segment. Pending AREA segments are refused.
    pub fn add_segment(&mut self, segment: TrackSegment) -> Result<&ProductionMetrics, TrackingError> {
        if segment.is_pending() {
            return Err(TrackingError::PendingSegmentUnresolved);
        }
        debug!("[ReportDraft] Added segment {} ({:.1}{})", segment.id, segment.value, segment.kind.unit());
        self.segments.push(segment);
        self.recompute();
        Ok(&self.metrics)
    }

    /// Remove a committed segment by id. The caller has already confirmed with the operator.
    pub fn remove_segment(&mut self, id: &str) -> Result<TrackSegment, TrackingError> {
        let pos = self
            .segments
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| TrackingError::SegmentNotFound(id.to_string()))?;
        let removed = self.segments.remove(pos);
        self.recompute();
        debug!("[ReportDraft] Removed segment {}", id);
        Ok(removed)
    }

    pub fn set_manual(&mut self, manual: ManualMetrics) -> Result<&ProductionMetrics, TrackingError> {
        manual.validate()?;
        self.manual = manual;
        self.recompute();
        Ok(&self.metrics)
    }

    /// Build the record to hand back to persistence.
    ///
    /// Refuses a list still holding a pending segment, and an empty list unless
    /// `confirm_empty` is set.
    pub fn to_record(&self, confirm_empty: bool) -> Result<ReportRecord, TrackingError> {
        if self.segments.iter().any(TrackSegment::is_pending) {
            return Err(TrackingError::PendingSegmentUnresolved);
        }
        if self.segments.is_empty() && !confirm_empty {
            return Err(TrackingError::EmptyReportUnconfirmed);
        }

        Ok(ReportRecord {
            segments: self.segments.clone(),
            metrics: self.metrics,
            street: self.location.street.clone(),
            neighborhood: self.location.neighborhood.clone(),
            perimeter: self.location.perimeter.clone(),
            location: self.segments.first().map(|s| s.start_fix.clone()),
            extra: self.extra.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::test_support::fix;
    use crate::SegmentKind;

    fn segment(id: &str, kind: SegmentKind, distance: f64, width: Option<f64>) -> TrackSegment {
        let start = fix(-1.45, -48.49, 5.0);
        let mut seg = TrackSegment {
            id: id.to_string(),
            kind,
            started_at: start.timestamp,
            ended_at: start.timestamp,
            start_fix: start.clone(),
            end_fix: start.clone(),
            street: "Rua A".to_string(),
            neighborhood: "Reduto".to_string(),
            distance,
            width,
            value: 0.0,
            path: vec![start.point()],
        };
        seg.value = derive_value(&seg).unwrap_or(0.0);
        seg
    }

    #[test]
    fn test_aggregated_metrics_scenario() {
        let mut draft = ReportDraft::new();
        draft.add_segment(segment("a", SegmentKind::Linear, 500.0, None)).unwrap();
        draft.add_segment(segment("b", SegmentKind::Area, 400.0, Some(2.5))).unwrap();
        draft.set_manual(ManualMetrics { varricao_m: 50.0, ..Default::default() }).unwrap();

        assert_eq!(
            *draft.metrics(),
            ProductionMetrics {
                capina_m: 500.0,
                rocagem_m2: 1000.0,
                varricao_m: 50.0,
                pintura_vias_m: 0.0,
                pintura_postes_und: 0.0,
            }
        );
    }

    #[test]
    fn test_remove_and_readd() {
        let mut draft = ReportDraft::new();
        draft.add_segment(segment("a", SegmentKind::Linear, 120.3, None)).unwrap();
        draft.add_segment(segment("b", SegmentKind::Linear, 80.2, None)).unwrap();
        let before = *draft.metrics();

        let removed = draft.remove_segment("b").unwrap();
        assert_eq!(draft.metrics().capina_m, 120.3);
        draft.add_segment(removed).unwrap();
        assert_eq!(*draft.metrics(), before);

        assert!(matches!(draft.remove_segment("zzz"), Err(TrackingError::SegmentNotFound(_))));
    }

    #[test]
    fn test_pending_segment_refused() {
        let mut draft = ReportDraft::new();
        let err = draft.add_segment(segment("p", SegmentKind::Area, 10.0, None)).unwrap_err();
        assert!(matches!(err, TrackingError::PendingSegmentUnresolved));
        assert!(draft.segments().is_empty());
    }

    #[test]
    fn test_manual_edit_keeps_auto_totals() {
        let mut draft = ReportDraft::new();
        draft.add_segment(segment("a", SegmentKind::Linear, 42.0, None)).unwrap();

        draft
            .set_manual(ManualMetrics { varricao_m: 1.0, pintura_vias_m: 2.0, pintura_postes_und: 3.0 })
            .unwrap();
        assert_eq!(draft.metrics().capina_m, 42.0);
        assert_eq!(draft.metrics().pintura_postes_und, 3.0);

        let err = draft.set_manual(ManualMetrics { varricao_m: -5.0, ..Default::default() }).unwrap_err();
        assert!(matches!(err, TrackingError::InvalidManualMetric { .. }));
        assert_eq!(draft.manual().varricao_m, 1.0);
    }

    #[test]
    fn test_load_recomputes_stale_totals() {
        let mut stale = segment("a", SegmentKind::Area, 100.0, Some(3.0));
        stale.value = 999.0;
        let record = ReportRecord {
            segments: vec![segment("l", SegmentKind::Linear, 250.0, None), stale],
            metrics: ProductionMetrics { capina_m: 1.0, rocagem_m2: 2.0, varricao_m: 7.0, ..Default::default() },
            ..Default::default()
        };

        let draft = ReportDraft::load(record);
        assert_eq!(draft.segments()[1].value, 300.0);
        assert_eq!(draft.metrics().capina_m, 250.0);
        assert_eq!(draft.metrics().rocagem_m2, 300.0);
        assert_eq!(draft.metrics().varricao_m, 7.0);
    }

    #[test]
    fn test_load_tolerates_pending_but_blocks_submission() {
        let record = ReportRecord {
            segments: vec![segment("p", SegmentKind::Area, 100.0, None)],
            ..Default::default()
        };
        let mut draft = ReportDraft::load(record);
        assert_eq!(draft.metrics().rocagem_m2, 0.0);
        assert!(matches!(draft.to_record(true), Err(TrackingError::PendingSegmentUnresolved)));

        draft.remove_segment("p").unwrap();
        assert!(draft.to_record(true).is_ok());
    }

    #[test]
    fn test_empty_report_needs_confirmation() {
        let draft = ReportDraft::new();
        assert!(matches!(draft.to_record(false), Err(TrackingError::EmptyReportUnconfirmed)));
        let record = draft.to_record(true).unwrap();
        assert!(record.segments.is_empty());
        assert_eq!(record.location, None);
    }

    #[test]
    fn test_record_round_trip_preserves_other_fields() {
        let json = r#"{
            "id": "rd-42",
            "status": "Pendente",
            "teamAttendance": [{"employeeId": "e1", "present": true}],
            "street": "Rua A",
            "neighborhood": "Reduto",
            "perimeter": "",
            "metrics": {"capinaM": 0, "pinturaViasM": 0, "pinturaPostesUnd": 0, "rocagemM2": 0, "varricaoM": 12.5},
            "segments": []
        }"#;
        let record = ReportRecord::from_json(json).unwrap();
        assert_eq!(record.extra["id"], "rd-42");

        let mut draft = ReportDraft::load(record);
        assert_eq!(draft.manual().varricao_m, 12.5);
        draft.add_segment(segment("a", SegmentKind::Linear, 10.0, None)).unwrap();

        let out = draft.to_record(false).unwrap();
        assert_eq!(out.location, Some(fix(-1.45, -48.49, 5.0)));

        let value: Value = serde_json::from_str(&out.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "Pendente");
        assert_eq!(value["teamAttendance"][0]["employeeId"], "e1");
        assert_eq!(value["metrics"]["capinaM"], 10.0);
        assert_eq!(value["metrics"]["varricaoM"], 12.5);
        assert_eq!(value["segments"][0]["type"], "CAPINAÇÃO");
        assert_eq!(value["location"]["lat"], -1.45);
    }

    #[test]
    fn test_perimeter_builder() {
        let mut loc = LocationFields::default();
        assert_eq!(loc.toggle_perimeter_street("Rua A"), "Esquina com Rua A");
        assert_eq!(loc.toggle_perimeter_street("Rua B"), "Entre Rua A e Rua B");
        assert_eq!(loc.toggle_perimeter_street("Rua C"), "Esquina com Rua C");
        assert_eq!(loc.perimeter_streets(), ["Rua C".to_string()]);
        assert_eq!(loc.toggle_perimeter_street("Rua C"), "");
    }

    #[test]
    fn test_location_fill_and_overwrite() {
        let mut loc = LocationFields { street: "Rua Typed".into(), ..Default::default() };
        loc.fill_if_empty(&AddressLabel::new("Rua GPS", "Marco"));
        assert_eq!(loc.label(), AddressLabel::new("Rua Typed", "Marco"));

        loc.overwrite(&AddressLabel::new("Rua GPS", ""));
        assert_eq!(loc.label(), AddressLabel::new("Rua GPS", "Marco"));
    }

    #[test]
    fn test_suggestions_keep_previous_neighborhoods() {
        let mut loc = LocationFields::default();
        loc.set_suggestions(NearbyPlaces { streets: vec!["Rua A".into()], neighborhoods: vec!["Reduto".into()] });
        loc.set_suggestions(NearbyPlaces { streets: vec!["Rua B".into()], neighborhoods: vec![] });
        assert_eq!(loc.suggestions.streets, vec!["Rua B"]);
        assert_eq!(loc.suggestions.neighborhoods, vec!["Reduto"]);
    }
}
