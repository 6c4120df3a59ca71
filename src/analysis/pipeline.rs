use log::info;
use serde::{Deserialize, Serialize};

use crate::analysis::consensus::ConsensusResult;
use crate::analysis::error::MeaError;
use crate::analysis::grid::{ElectrodeLayout, Grid, GridMapper};
use crate::analysis::inpaint::{InpaintReport, Inpainted, InpaintingSolver};
use crate::analysis::peaks::PeakSet;
use crate::analysis::source::{Recording, RecordingSource};
use crate::analysis::stats::finite_min;
use crate::analysis::timing::{EventMatrix, TimingMatrix, TimingNormalizer};
use crate::config::AnalysisConfig;

/// Display preparation applied to a grid before it is inpainted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatMapOptions {
    /// Put electrode row 1 at the bottom.
    pub flip_vertical: bool,
    /// Add one NaN row and column so cell-edged renderers show every electrode.
    pub pad_border: bool,
}

impl HeatMapOptions {
    fn prepare(&self, mut grid: Grid) -> Grid {
        if self.flip_vertical {
            grid = grid.flipped_vertically();
        }
        if self.pad_border {
            grid = grid.padded();
        }
        grid
    }
}

/// Dense activation map for one timing row.
#[derive(Clone, Debug, PartialEq)]
pub struct HeatMap {
    /// Row of the timing matrix.
    pub instant: usize,
    /// Event index that row came from.
    pub event: Option<usize>,
    pub grid: Grid,
    pub report: InpaintReport,
}

/// Everything derived from one recording.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub peaks: Vec<PeakSet>,
    pub consensus: ConsensusResult,
    pub events: EventMatrix,
    pub timings: TimingMatrix,
    pub sample_rate_hz: f64,
    pub layout: ElectrodeLayout,
    heat_map: HeatMapOptions,
    solver: InpaintingSolver,
}

impl Analysis {
    /// Earliest electrode at zero, mapped, prepared and inpainted.
    pub fn heat_map(&self, instant: usize) -> Result<HeatMap, MeaError> {
        let grid = self.raw_grid(instant)?;
        let Inpainted { grid, report } = self.solver.inpaint(&grid);
        Ok(HeatMap {
            instant,
            event: self.timings.source_event(instant),
            grid,
            report,
        })
    }

    /// Heat maps for every timing row, solved in parallel.
    pub fn heat_maps(&self) -> Result<Vec<HeatMap>, MeaError> {
        let grids = (0..self.timings.num_events())
            .map(|instant| self.raw_grid(instant))
            .collect::<Result<Vec<_>, _>>()?;
        let maps = self
            .solver
            .inpaint_many(&grids)
            .into_iter()
            .enumerate()
            .map(|(instant, Inpainted { grid, report })| HeatMap {
                instant,
                event: self.timings.source_event(instant),
                grid,
                report,
            })
            .collect();
        Ok(maps)
    }

    fn raw_grid(&self, instant: usize) -> Result<Grid, MeaError> {
        let row = self.timings.row(instant)?;
        let origin = finite_min(row.iter()).unwrap_or(0.0);
        let shifted: Vec<f64> = row.iter().map(|v| v - origin).collect();
        let grid = GridMapper::default().map_row(&shifted, &self.layout);
        Ok(self.heat_map.prepare(grid))
    }
}

/// Runs detection, consensus and timing normalization on one recording.
pub fn analyze(recording: &Recording, config: &AnalysisConfig) -> Result<Analysis, MeaError> {
    recording.validate()?;
    let layout = recording.layout()?;
    let channels = recording.scaled_channels();
    let peaks = config.detector.detect_all(&channels)?;
    let (consensus, events) = config.consensus.compute(&peaks)?;
    let timings = TimingNormalizer::new(config.baseline).normalize(
        &events,
        recording.sample_rate_hz,
        &consensus.active,
    )?;
    info!(
        "{} channels: modal count {:?}, {} active, {} timing rows",
        recording.num_channels(),
        consensus.modal_count,
        consensus.active_count(),
        timings.num_events()
    );
    Ok(Analysis {
        peaks,
        consensus,
        events,
        timings,
        sample_rate_hz: recording.sample_rate_hz,
        layout,
        heat_map: config.heat_map,
        solver: config.solver,
    })
}

/// Pulls recordings from a source and keeps the latest analysis.
pub struct ActivationPipeline<S: RecordingSource> {
    source: S,
    config: AnalysisConfig,
    latest: Option<Analysis>,
}

impl<S: RecordingSource> ActivationPipeline<S> {
    pub fn new(source: S, config: AnalysisConfig) -> Self {
        Self {
            source,
            config,
            latest: None,
        }
    }

    pub fn pump_once(&mut self) -> Result<Option<&Analysis>, MeaError> {
        let Some(recording) = self.source.next_recording()? else {
            return Ok(None);
        };
        let analysis = analyze(&recording, &self.config)?;
        Ok(Some(&*self.latest.insert(analysis)))
    }

    pub fn latest(&self) -> Option<&Analysis> {
        self.latest.as_ref()
    }
}

/// Builds a recording whose channels follow the standard 8x8 label order.
pub fn make_recording(sample_rate_hz: f64, channels: Vec<Vec<f64>>) -> Recording {
    let layout = ElectrodeLayout::standard_8x8()
        .labels()
        .iter()
        .copied()
        .chain(std::iter::repeat(0))
        .take(channels.len())
        .collect();
    Recording::new(sample_rate_hz, channels, layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::grid::{label_at, REFERENCE_CELL};
    use crate::analysis::source::ManualSource;
    use approx::assert_abs_diff_eq;

    // Column `c` of the frame fires `c * lag` samples after column 0.
    fn sweep(events: usize, lag: usize) -> Recording {
        let layout = ElectrodeLayout::standard_8x8();
        let channels = layout
            .labels()
            .iter()
            .map(|&label| {
                let column = (label / 10 - 1) as usize;
                let mut samples = vec![0.0; 4_000];
                for k in 0..events {
                    samples[300 + k * 600 + column * lag] = 80.0;
                }
                samples
            })
            .collect();
        make_recording(10_000.0, channels)
    }

    #[test]
    fn pipeline_analyzes_each_recording() {
        let source = ManualSource::new(vec![sweep(5, 10), sweep(3, 10)]);
        let mut pipeline = ActivationPipeline::new(source, AnalysisConfig::default());
        let first = pipeline.pump_once().unwrap().unwrap();
        assert_eq!(first.consensus.modal_count, Some(5));
        assert_eq!(first.consensus.active_count(), 60);
        assert_eq!(first.timings.num_events(), 5);
        let second = pipeline.pump_once().unwrap().unwrap();
        assert_eq!(second.timings.num_events(), 3);
        assert!(pipeline.pump_once().unwrap().is_none());
        assert_eq!(pipeline.latest().unwrap().timings.num_events(), 3);
    }

    #[test]
    fn heat_map_follows_the_sweep() {
        let analysis = analyze(&sweep(4, 10), &AnalysisConfig::default()).unwrap();
        let map = analysis.heat_map(0).unwrap();
        assert_eq!(map.event, Some(0));
        assert_eq!(map.grid.missing_count(), 0);
        // 10 samples at 10 kHz per column
        assert_abs_diff_eq!(map.grid.get(3, 3).unwrap(), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(map.grid.get(5, 0).unwrap(), 0.0, epsilon = 1e-9);
        assert!(map.grid.get(REFERENCE_CELL.0, REFERENCE_CELL.1).unwrap().is_nan());
        assert!(matches!(
            analysis.heat_map(4),
            Err(MeaError::EventOutOfRange { event: 4, available: 4 })
        ));
    }

    #[test]
    fn missing_electrode_is_filled_from_its_neighbours() {
        let mut recording = sweep(2, 10);
        let channel = recording
            .layout
            .iter()
            .position(|&l| l == label_at(3, 3))
            .unwrap();
        recording.channels[channel] = vec![0.0; 4_000];
        let analysis = analyze(&recording, &AnalysisConfig::default()).unwrap();
        assert!(!analysis.consensus.active[channel]);
        let map = analysis.heat_map(1).unwrap();
        assert!(map.report.unknowns > 5);
        assert_abs_diff_eq!(map.grid.get(3, 3).unwrap(), 3.0, epsilon = 1e-6);
    }

    #[test]
    fn display_options_flip_and_pad() {
        let config = AnalysisConfig {
            heat_map: HeatMapOptions {
                flip_vertical: true,
                pad_border: true,
            },
            ..AnalysisConfig::default()
        };
        let analysis = analyze(&sweep(2, 10), &config).unwrap();
        let maps = analysis.heat_maps().unwrap();
        assert_eq!(maps.len(), 2);
        let grid = &maps[0].grid;
        assert_eq!((grid.rows(), grid.cols()), (9, 9));
        // reference electrode (row 5, col 1) lands on row 3 after the flip
        assert!(grid.is_excluded(3, 0));
        assert!(grid.get(8, 8).unwrap().is_nan());
        assert_eq!(grid.missing_count(), 0);
        let single = analysis.heat_map(1).unwrap();
        assert_eq!(maps[1].report, single.report);
        assert_eq!(maps[1].grid.to_rows(), single.grid.to_rows());
    }
}
