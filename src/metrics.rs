//! Production metrics: per-segment values and per-report totals.
//!
//! A LINEAR segment is worth its distance in meters; an AREA segment is worth
//! distance × operator-supplied width in square meters. Report totals are always
//! recomputed from the segment list, never edited directly.

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::{SegmentKind, TrackSegment};

/// Value of a segment in its kind's unit.
///
/// Returns `None` for an AREA segment that has no width yet (pending).
pub fn derive_value(segment: &TrackSegment) -> Option<f64> {
    segment_value(segment.kind, segment.distance, segment.width)
}

/// `distance` for LINEAR, `distance * width` for AREA (`None` without a width).
pub fn segment_value(kind: SegmentKind, distance: f64, width: Option<f64>) -> Option<f64> {
    match kind {
        SegmentKind::Linear => Some(distance),
        SegmentKind::Area => width.map(|w| distance * w),
    }
}

/// Totals computed from GPS segments.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct AutoTotals {
    /// Sum of LINEAR segment values, meters
    pub linear_m: f64,
    /// Sum of AREA segment values, square meters
    pub area_m2: f64,
}

/// Sum segment values by kind. Pending AREA segments contribute nothing.
pub fn recompute_totals(segments: &[TrackSegment]) -> AutoTotals {
    sum_by_kind(segments.iter().map(|s| (s.kind, s.distance, s.width)))
}

/// Sum `(kind, distance, width)` triples by kind; a missing AREA width counts as 0.
pub fn sum_by_kind<I>(segments: I) -> AutoTotals
where
    I: IntoIterator<Item = (SegmentKind, f64, Option<f64>)>,
{
    segments.into_iter().fold(AutoTotals::default(), |mut totals, (kind, distance, width)| {
        let value = segment_value(kind, distance, width).unwrap_or(0.0);
        match kind {
            SegmentKind::Linear => totals.linear_m += value,
            SegmentKind::Area => totals.area_m2 += value,
        }
        totals
    })
}

/// Operator-entered metrics with no GPS source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct ManualMetrics {
    /// Sweeping, linear meters
    pub varricao_m: f64,
    /// Road-line painting, linear meters
    pub pintura_vias_m: f64,
    /// Painted poles, units
    pub pintura_postes_und: f64,
}

impl ManualMetrics {
    /// Reject negative or non-finite entries.
    pub fn validate(&self) -> Result<(), TrackingError> {
        let fields = [
            ("varricaoM", self.varricao_m),
            ("pinturaViasM", self.pintura_vias_m),
            ("pinturaPostesUnd", self.pintura_postes_und),
        ];
        for (field, value) in fields {
            if !(value.is_finite() && value >= 0.0) {
                return Err(TrackingError::InvalidManualMetric { field, value });
            }
        }
        Ok(())
    }
}

/// The full metrics record attached to a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct ProductionMetrics {
    /// Weed clearing, linear meters (auto)
    #[serde(default)]
    pub capina_m: f64,
    /// Road-line painting, linear meters (manual)
    #[serde(default)]
    pub pintura_vias_m: f64,
    /// Painted poles, units (manual)
    #[serde(default)]
    pub pintura_postes_und: f64,
    /// Mowing, square meters (auto)
    #[serde(default)]
    pub rocagem_m2: f64,
    /// Sweeping, linear meters (manual)
    #[serde(default)]
    pub varricao_m: f64,
}

impl ProductionMetrics {
    pub fn manual(&self) -> ManualMetrics {
        ManualMetrics {
            varricao_m: self.varricao_m,
            pintura_vias_m: self.pintura_vias_m,
            pintura_postes_und: self.pintura_postes_und,
        }
    }

    pub fn auto(&self) -> AutoTotals {
        AutoTotals { linear_m: self.capina_m, area_m2: self.rocagem_m2 }
    }
}

/// Overwrite the auto fields with `totals` (rounded to 0.1) and pass the manual ones through.
pub fn merge_metrics(manual: &ManualMetrics, totals: &AutoTotals) -> ProductionMetrics {
    ProductionMetrics {
        capina_m: round_tenth(totals.linear_m),
        rocagem_m2: round_tenth(totals.area_m2),
        varricao_m: manual.varricao_m,
        pintura_vias_m: manual.pintura_vias_m,
        pintura_postes_und: manual.pintura_postes_und,
    }
}

#[inline]
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A preset strip width offered next to free-form entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidthOption {
    pub width_m: f64,
    pub label: &'static str,
}

/// Common mowing strip widths.
pub const WIDTH_OPTIONS: [WidthOption; 4] = [
    WidthOption { width_m: 1.0, label: "Beira de Calçada" },
    WidthOption { width_m: 1.5, label: "Canteiro Central" },
    WidthOption { width_m: 2.0, label: "Lateral de Pista" },
    WidthOption { width_m: 3.0, label: "Terreno Aberto" },
];

/// Parse an operator-typed width in meters. Accepts `,` as the decimal separator.
pub fn parse_width(input: &str) -> Result<f64, TrackingError> {
    let normalized = input.trim().replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(w) if w.is_finite() && w > 0.0 => Ok(w),
        _ => Err(TrackingError::InvalidWidth(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::test_support::fix;

    fn segment(id: &str, kind: SegmentKind, distance: f64, width: Option<f64>) -> TrackSegment {
        let start = fix(0.0, 0.0, 5.0);
        let mut seg = TrackSegment {
            id: id.to_string(),
            kind,
            started_at: start.timestamp,
            ended_at: start.timestamp,
            start_fix: start.clone(),
            end_fix: start.clone(),
            street: String::new(),
            neighborhood: String::new(),
            distance,
            width,
            value: 0.0,
            path: vec![start.point()],
        };
        seg.value = derive_value(&seg).unwrap_or(0.0);
        seg
    }

    #[test]
    fn test_linear_value_is_distance() {
        for d in [0.0, 3.7, 500.0, 12_345.6] {
            let seg = segment("a", SegmentKind::Linear, d, None);
            assert_eq!(derive_value(&seg), Some(d));
        }
    }

    #[test]
    fn test_area_value_is_distance_times_width() {
        for w in [0.1, 1.0, 2.5, 7.25] {
            let seg = segment("a", SegmentKind::Area, 100.0, Some(w));
            assert_eq!(derive_value(&seg), Some(100.0 * w));
        }
        let seg = segment("a", SegmentKind::Area, 100.0, Some(2.5));
        assert_eq!(derive_value(&seg), Some(250.0));
    }

    #[test]
    fn test_pending_area_has_no_value() {
        let seg = segment("a", SegmentKind::Area, 100.0, None);
        assert_eq!(derive_value(&seg), None);
        assert_eq!(recompute_totals(&[seg]), AutoTotals::default());
    }

    #[test]
    fn test_recompute_groups_by_kind() {
        let segments = vec![
            segment("a", SegmentKind::Linear, 300.0, None),
            segment("b", SegmentKind::Area, 200.0, Some(3.0)),
            segment("c", SegmentKind::Linear, 200.0, None),
            segment("d", SegmentKind::Area, 50.0, None),
        ];
        let totals = recompute_totals(&segments);
        assert_eq!(totals.linear_m, 500.0);
        assert_eq!(totals.area_m2, 600.0);

        // Idempotent on an unchanged list
        assert_eq!(recompute_totals(&segments), totals);
    }

    #[test]
    fn test_remove_then_readd_restores_totals() {
        let mut segments = vec![
            segment("a", SegmentKind::Linear, 123.456, None),
            segment("b", SegmentKind::Area, 77.7, Some(1.3)),
            segment("c", SegmentKind::Linear, 0.1, None),
        ];
        let before = recompute_totals(&segments);

        let removed = segments.remove(1);
        assert_ne!(recompute_totals(&segments), before);
        segments.insert(1, removed);

        assert_eq!(recompute_totals(&segments), before);
    }

    #[test]
    fn test_merge_keeps_manual_fields() {
        let segments = vec![
            segment("a", SegmentKind::Linear, 500.0, None),
            segment("b", SegmentKind::Area, 400.0, Some(2.5)),
        ];
        let manual = ManualMetrics { varricao_m: 50.0, ..Default::default() };

        let metrics = merge_metrics(&manual, &recompute_totals(&segments));
        assert_eq!(
            metrics,
            ProductionMetrics {
                capina_m: 500.0,
                rocagem_m2: 1000.0,
                varricao_m: 50.0,
                pintura_vias_m: 0.0,
                pintura_postes_und: 0.0,
            }
        );
        assert_eq!(metrics.manual(), manual);
    }

    #[test]
    fn test_merge_rounds_auto_fields() {
        let totals = AutoTotals { linear_m: 22.239, area_m2: 10.04 };
        let metrics = merge_metrics(&ManualMetrics::default(), &totals);
        assert_eq!(metrics.capina_m, 22.2);
        assert_eq!(metrics.rocagem_m2, 10.0);
    }

    #[test]
    fn test_parse_width() {
        assert_eq!(parse_width("2.5").unwrap(), 2.5);
        assert_eq!(parse_width(" 2,5 ").unwrap(), 2.5);
        assert!(matches!(parse_width("0"), Err(TrackingError::InvalidWidth(_))));
        assert!(parse_width("-1").is_err());
        assert!(parse_width("").is_err());
        assert!(parse_width("abc").is_err());
        assert!(parse_width("inf").is_err());
        assert!(parse_width("NaN").is_err());
    }

    #[test]
    fn test_sum_by_kind_matches_segment_totals() {
        let segments = vec![
            segment("a", SegmentKind::Linear, 120.5, None),
            segment("b", SegmentKind::Area, 80.0, Some(1.5)),
            segment("c", SegmentKind::Area, 30.0, None),
        ];
        let triples: Vec<_> = segments.iter().map(|s| (s.kind, s.distance, s.width)).collect();
        assert_eq!(sum_by_kind(triples), recompute_totals(&segments));
        assert_eq!(segment_value(SegmentKind::Area, 80.0, Some(1.5)), derive_value(&segments[1]));
        assert_eq!(segment_value(SegmentKind::Area, 30.0, None), None);
    }

    #[test]
    fn test_width_presets_parse_back() {
        assert_eq!(WIDTH_OPTIONS.len(), 4);
        assert_eq!(WIDTH_OPTIONS[1].label, "Canteiro Central");
        for option in WIDTH_OPTIONS {
            assert_eq!(parse_width(&option.width_m.to_string()).unwrap(), option.width_m);
        }
    }

    #[test]
    fn test_manual_validation() {
        assert!(ManualMetrics { varricao_m: 10.0, pintura_vias_m: 0.0, pintura_postes_und: 3.0 }
            .validate()
            .is_ok());

        let err = ManualMetrics { pintura_vias_m: -1.0, ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, TrackingError::InvalidManualMetric { field: "pinturaViasM", .. }));
    }

    #[test]
    fn test_metrics_json_field_names() {
        let json = r#"{"capinaM":1.5,"pinturaViasM":2,"pinturaPostesUnd":3,"rocagemM2":4,"varricaoM":5}"#;
        let metrics: ProductionMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(metrics.capina_m, 1.5);
        assert_eq!(metrics.pintura_postes_und, 3.0);
        assert_eq!(metrics.auto(), AutoTotals { linear_m: 1.5, area_m2: 4.0 });
    }
}
