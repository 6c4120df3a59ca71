pub mod analysis;
pub mod config;
pub mod simulation;

pub use analysis::{
    analyze, compute_consensus, detect_peaks, inpaint, map_to_grid, normalize_timings,
    ActivationPipeline, Analysis, MeaError, Recording, RecordingSource,
};
pub use config::AnalysisConfig;
pub use simulation::{SimulatedMea, SimulationConfig};
