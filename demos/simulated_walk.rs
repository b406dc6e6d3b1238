//! Record two segments along a simulated walk and print the report metrics.
//!
//! Run with: cargo run --example simulated_walk

use std::future::Future;

use chrono::{Duration, Utc};
use futures::stream;
use rd_tracker::{
    FixOptions, GeoFix, ManualMetrics, NoGeocoder, PositionError, PositionProvider, PositionStream,
    RecorderEvent, ReportEditor, SegmentKind, StopOutcome, TrackingConfig,
};

/// Walks east from Av. Nazaré in Belém, ~11 m per update.
struct SimulatedWalk {
    origin: (f64, f64),
    steps: usize,
}

impl SimulatedWalk {
    fn fix_at(&self, step: usize, accuracy: f64) -> GeoFix {
        let (lat, lng) = self.origin;
        GeoFix::new(
            lat,
            lng + step as f64 * 0.0001,
            Some(accuracy),
            Utc::now() + Duration::seconds(step as i64),
        )
    }
}

impl PositionProvider for SimulatedWalk {
    fn current_fix(&self, options: &FixOptions) -> impl Future<Output = Result<GeoFix, PositionError>> + Send {
        let fix = self.fix_at(0, if options.high_accuracy { 6.0 } else { 25.0 });
        async move { Ok(fix) }
    }

    fn watch(&self) -> PositionStream {
        let updates: Vec<_> = (1..=self.steps)
            .map(|i| {
                // Every fifth update is a poor fix and gets filtered out
                let accuracy = if i % 5 == 0 { 80.0 } else { 8.0 };
                Ok(self.fix_at(i, accuracy))
            })
            .collect();
        Box::pin(stream::iter(updates))
    }
}

async fn record<P: PositionProvider>(
    editor: &mut ReportEditor<P, NoGeocoder>,
    kind: SegmentKind,
) -> Result<(), rd_tracker::TrackingError> {
    editor.start_segment(kind).await?;
    while let Some(event) = editor.next_event().await {
        match event {
            RecorderEvent::Position(outcome) => println!("   {:?}", outcome),
            RecorderEvent::StreamEnded => break,
            _ => {}
        }
    }

    let report = editor.stop_segment().await?;
    match report.outcome {
        StopOutcome::Committed(segment) => println!("   committed {:.1} m", segment.value),
        StopOutcome::AwaitingWidth { distance_m } => {
            println!("   {:.1} m walked, entering width 2,5", distance_m);
            editor.supply_width("2,5")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), rd_tracker::TrackingError> {
    let provider = SimulatedWalk { origin: (-1.4558, -48.4902), steps: 10 };
    let mut editor = ReportEditor::new(provider, NoGeocoder, TrackingConfig::default())?;
    editor.set_street("Av. Nazaré");
    editor.set_neighborhood("Nazaré");

    println!("1. Capina (linear):");
    record(&mut editor, SegmentKind::Linear).await?;

    println!("\n2. Roçagem (area):");
    record(&mut editor, SegmentKind::Area).await?;

    editor.set_manual_metrics(ManualMetrics { varricao_m: 50.0, ..Default::default() })?;

    let report = editor.submit(false)?;
    println!("\nReport metrics:");
    println!("   capina:   {:.1} m", report.metrics.capina_m);
    println!("   roçagem:  {:.1} m²", report.metrics.rocagem_m2);
    println!("   varrição: {:.1} m", report.metrics.varricao_m);
    println!("\n{}", report.to_json()?);

    Ok(())
}
