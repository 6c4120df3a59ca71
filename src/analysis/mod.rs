// src/analysis/mod.rs
pub mod consensus;
pub mod error;
pub mod grid;
pub mod inpaint;
pub mod peaks;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod timing;

pub use consensus::{compute_consensus, modal_count, ConsensusEngine, ConsensusResult, OutlierRule};
pub use error::MeaError;
pub use grid::{label_at, map_to_grid, ElectrodeLayout, Grid, GridMapper};
pub use inpaint::{inpaint, InpaintReport, Inpainted, InpaintingSolver, SparseRow, SparseSystem};
pub use peaks::{detect_peaks, PeakDetector, PeakSet};
pub use pipeline::{analyze, ActivationPipeline, Analysis, HeatMap, HeatMapOptions};
pub use source::{AcquisitionInfo, JsonFileSource, ManualSource, Recording, RecordingSource};
pub use stats::ChannelStatistics;
pub use timing::{normalize_timings, Baseline, EventMatrix, TimingMatrix, TimingNormalizer};
