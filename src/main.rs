// src/main.rs
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use mea_activation::analysis::{JsonFileSource, RecordingSource};
use mea_activation::{ActivationPipeline, AnalysisConfig, SimulatedMea, SimulationConfig};

#[derive(Parser, Debug)]
#[command(
    name = "mea-activation",
    version,
    about = "Discharge timing and activation heat maps for MEA recordings"
)]
struct Cli {
    /// JSON analysis config; missing fields keep their defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Timing row to render as a heat map.
    #[arg(long, default_value_t = 0)]
    event: usize,
    /// Analyse a simulated planar wave instead of a file.
    #[arg(long, conflicts_with = "recording")]
    simulate: bool,
    /// JSON-encoded recording.
    #[arg(value_name = "RECORDING", required_unless_present = "simulate")]
    recording: Option<PathBuf>,
}

fn run<S: RecordingSource>(source: S, config: AnalysisConfig, event: usize) -> Result<()> {
    let mut pipeline = ActivationPipeline::new(source, config);
    let analysis = pipeline
        .pump_once()
        .context("analysis failed")?
        .context("source produced no recording")?;
    let heat_map = analysis
        .heat_map(event)
        .with_context(|| format!("no heat map for event {event}"))?;
    let outliers: Vec<usize> = analysis
        .consensus
        .outliers
        .iter()
        .enumerate()
        .filter(|&(_, &o)| o)
        .map(|(ch, _)| ch)
        .collect();
    let excluded: Vec<Vec<bool>> = heat_map
        .grid
        .excluded()
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect();
    let summary = json!({
        "channels": analysis.peaks.len(),
        "sample_rate_hz": analysis.sample_rate_hz,
        "peak_counts": analysis.peaks.iter().map(|p| p.len()).collect::<Vec<_>>(),
        "modal_count": analysis.consensus.modal_count,
        "active_channels": analysis.consensus.active_channels(),
        "outlier_channels": outliers,
        "reference_event": analysis.consensus.reference_event,
        "timing_rows": analysis.timings.num_events(),
        "heat_map": {
            "instant": heat_map.instant,
            "event": heat_map.event,
            "report": heat_map.report,
            "grid": heat_map.grid.to_rows(),
            "excluded": excluded,
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    match cli.recording {
        Some(path) => run(JsonFileSource::new([path]), config, cli.event),
        None => run(SimulatedMea::new(SimulationConfig::default(), 1), config, cli.event),
    }
}
