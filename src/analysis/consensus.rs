//! Active-electrode consensus.
//!
//! An electrode is active when its discharge count equals the most common
//! nonzero count across the array. Electrodes whose discharge position on the
//! reference event sits far from the rest are then dropped as outliers.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::analysis::error::MeaError;
use crate::analysis::peaks::PeakSet;
use crate::analysis::stats::{median, quantile_floor, sorted_finite};
use crate::analysis::timing::EventMatrix;

/// Floor applied to the median absolute deviation.
pub const MAD_EPSILON: f64 = 1e-10;
/// The second discharge is used as the reference event unless there is none.
pub const DEFAULT_REFERENCE_EVENT: usize = 1;

/// Outlier test applied to the reference-event positions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum OutlierRule {
    /// No rejection; the count match alone decides.
    None,
    /// Flags `|v - median| / MAD > threshold`.
    Mad { threshold: f64 },
    /// Flags values outside `[Q1 - factor * IQR, Q3 + factor * IQR]`.
    Iqr { factor: f64 },
}

impl Default for OutlierRule {
    fn default() -> Self {
        OutlierRule::Mad { threshold: 3.0 }
    }
}

impl OutlierRule {
    /// Outlier mask over `values`. Non-finite entries are never flagged.
    pub fn outliers(&self, values: &[f64]) -> Vec<bool> {
        match *self {
            OutlierRule::None => vec![false; values.len()],
            OutlierRule::Mad { threshold } => {
                let center = median(values);
                let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
                let mad = median(&deviations);
                let mad = if mad.is_finite() { mad.max(MAD_EPSILON) } else { MAD_EPSILON };
                deviations
                    .iter()
                    .map(|d| d.is_finite() && d / mad > threshold)
                    .collect()
            }
            OutlierRule::Iqr { factor } => {
                let sorted = sorted_finite(values);
                if sorted.is_empty() {
                    return vec![false; values.len()];
                }
                let q1 = quantile_floor(&sorted, 0.25);
                let q3 = quantile_floor(&sorted, 0.75);
                let iqr = q3 - q1;
                let (low, high) = (q1 - factor * iqr, q3 + factor * iqr);
                values
                    .iter()
                    .map(|&v| v.is_finite() && (v < low || v > high))
                    .collect()
            }
        }
    }
}

/// Most frequent nonzero count. Ties go to the smallest count; `None` if all counts are zero.
pub fn modal_count(counts: &[usize]) -> Option<usize> {
    let mut frequency: BTreeMap<usize, usize> = BTreeMap::new();
    for &count in counts.iter().filter(|&&c| c != 0) {
        *frequency.entry(count).or_insert(0) += 1;
    }
    let mut best: Option<(usize, usize)> = None;
    for (&count, &seen) in &frequency {
        match best {
            Some((_, best_seen)) if best_seen >= seen => {}
            _ => best = Some((count, seen)),
        }
    }
    best.map(|(count, _)| count)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub active: Vec<bool>,
    pub modal_count: Option<usize>,
    pub outliers: Vec<bool>,
    /// Event row the outlier rule actually ran on.
    pub reference_event: Option<usize>,
}

impl ConsensusResult {
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    pub fn active_channels(&self) -> Vec<usize> {
        self.active
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusEngine {
    pub outlier_rule: OutlierRule,
    pub reference_event: usize,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self {
            outlier_rule: OutlierRule::default(),
            reference_event: DEFAULT_REFERENCE_EVENT,
        }
    }
}

impl ConsensusEngine {
    pub fn new(outlier_rule: OutlierRule, reference_event: usize) -> Self {
        Self {
            outlier_rule,
            reference_event,
        }
    }

    /// Counts, builds the event matrix and runs [`compute_consensus`](Self::compute_consensus).
    pub fn compute(&self, peaks: &[PeakSet]) -> Result<(ConsensusResult, EventMatrix), MeaError> {
        let counts: Vec<usize> = peaks.iter().map(PeakSet::len).collect();
        let events = EventMatrix::from_peak_sets(peaks, modal_count(&counts).unwrap_or(0));
        let consensus = self.compute_consensus(&counts, &events)?;
        Ok((consensus, events))
    }

    pub fn compute_consensus(
        &self,
        peak_counts: &[usize],
        events: &EventMatrix,
    ) -> Result<ConsensusResult, MeaError> {
        if peak_counts.is_empty() {
            return Err(MeaError::NoChannels);
        }
        if events.num_channels() != peak_counts.len() {
            return Err(MeaError::ChannelMismatch {
                expected: peak_counts.len(),
                actual: events.num_channels(),
            });
        }
        let channels = peak_counts.len();
        let Some(modal) = modal_count(peak_counts) else {
            info!("no channel reported a discharge; consensus is empty");
            return Ok(ConsensusResult {
                active: vec![false; channels],
                modal_count: None,
                outliers: vec![false; channels],
                reference_event: None,
            });
        };
        let mut active: Vec<bool> = peak_counts.iter().map(|&c| c == modal).collect();
        let mut outliers = vec![false; channels];
        let reference_event = self.pick_reference_event(events, &active);
        if let Some(event) = reference_event {
            let positions: Vec<f64> = events
                .row(event)
                .iter()
                .zip(&active)
                .map(|(&v, &a)| if a { v } else { f64::NAN })
                .collect();
            outliers = self.outlier_rule.outliers(&positions);
            for (a, &o) in active.iter_mut().zip(&outliers) {
                *a &= !o;
            }
        }
        let result = ConsensusResult {
            active,
            modal_count: Some(modal),
            outliers,
            reference_event,
        };
        debug!(
            "modal count {modal}: {} of {channels} channels active, {} outliers on event {:?}",
            result.active_count(),
            result.outliers.iter().filter(|&&o| o).count(),
            reference_event
        );
        Ok(result)
    }

    // Falls back to the first event when the configured one is absent or the
    // first active channel has no discharge there.
    fn pick_reference_event(&self, events: &EventMatrix, active: &[bool]) -> Option<usize> {
        if events.num_events() == 0 {
            return None;
        }
        let first_active = active.iter().position(|&a| a)?;
        let preferred = self.reference_event;
        if preferred < events.num_events() && events.get(preferred, first_active).is_some() {
            Some(preferred)
        } else {
            Some(0)
        }
    }
}

pub fn compute_consensus(
    peak_counts: &[usize],
    events: &EventMatrix,
) -> Result<ConsensusResult, MeaError> {
    ConsensusEngine::default().compute_consensus(peak_counts, events)
}
