use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::{
    Baseline, ConsensusEngine, HeatMapOptions, InpaintingSolver, MeaError, PeakDetector,
};

/// Every tunable of one analysis pass. Missing JSON fields keep their defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detector: PeakDetector,
    pub consensus: ConsensusEngine,
    pub baseline: Baseline,
    pub heat_map: HeatMapOptions,
    pub solver: InpaintingSolver,
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MeaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MeaError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
