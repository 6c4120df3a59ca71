use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::error::MeaError;
use crate::analysis::stats::{first_non_finite, ChannelStatistics};

pub const DEFAULT_THRESHOLD_FACTOR: f64 = 4.0;
pub const DEFAULT_MIN_PEAK_DISTANCE: usize = 170;
/// Upper bound on peaks kept per channel. Detection stops once it is reached.
pub const DEFAULT_MAX_PEAKS: usize = 1000;

/// Ascending sample indices of the discharges found on one channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakSet {
    indices: Vec<usize>,
    saturated: bool,
}

impl PeakSet {
    pub fn new(indices: Vec<usize>) -> Self {
        Self {
            indices,
            saturated: false,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sample index of the `event`-th discharge, if the channel has one.
    pub fn get(&self, event: usize) -> Option<usize> {
        self.indices.get(event).copied()
    }

    /// True when the slot cap cut detection short; later discharges were not scanned.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}

/// Thresholded local-maximum detector with a refractory distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetector {
    pub threshold_factor: f64,
    pub min_peak_distance: usize,
    pub max_peaks: usize,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
            min_peak_distance: DEFAULT_MIN_PEAK_DISTANCE,
            max_peaks: DEFAULT_MAX_PEAKS,
        }
    }
}

impl PeakDetector {
    pub fn new(threshold_factor: f64, min_peak_distance: usize) -> Self {
        Self {
            threshold_factor,
            min_peak_distance,
            ..Self::default()
        }
    }

    pub fn with_max_peaks(mut self, max_peaks: usize) -> Self {
        self.max_peaks = max_peaks;
        self
    }

    /// Scans one channel. A sample counts as a discharge when it is above
    /// `mean + k * std`, strictly above both neighbours, and at least
    /// `min_peak_distance` samples after the previously accepted discharge.
    pub fn detect(&self, samples: &[f64]) -> PeakSet {
        let mut peaks = PeakSet::default();
        if samples.len() < 3 || self.max_peaks == 0 {
            return peaks;
        }
        let threshold = ChannelStatistics::from_samples(samples).threshold(self.threshold_factor);
        let mut last_peak: Option<usize> = None;
        for i in 1..samples.len() - 1 {
            let value = samples[i];
            if value <= threshold || value <= samples[i - 1] || value <= samples[i + 1] {
                continue;
            }
            if let Some(last) = last_peak {
                if i - last < self.min_peak_distance {
                    continue;
                }
            }
            peaks.indices.push(i);
            last_peak = Some(i);
            if peaks.indices.len() >= self.max_peaks {
                peaks.saturated = true;
                break;
            }
        }
        peaks
    }

    /// Runs [`detect`](Self::detect) on every channel in parallel.
    ///
    /// Results come back in channel order. Empty channels and channels holding
    /// NaN or infinite samples are rejected.
    pub fn detect_all<C>(&self, channels: &[C]) -> Result<Vec<PeakSet>, MeaError>
    where
        C: AsRef<[f64]> + Sync,
    {
        if channels.is_empty() {
            return Err(MeaError::NoChannels);
        }
        for (channel, samples) in channels.iter().enumerate() {
            let samples = samples.as_ref();
            if samples.is_empty() {
                return Err(MeaError::EmptyChannel { channel });
            }
            if let Some(index) = first_non_finite(samples) {
                return Err(MeaError::NonFiniteSample { channel, index });
            }
        }
        let peaks: Vec<PeakSet> = channels
            .par_iter()
            .map(|channel| self.detect(channel.as_ref()))
            .collect();
        for (channel, set) in peaks.iter().enumerate() {
            if set.is_saturated() {
                warn!(
                    "channel {channel} reached the {} peak cap; later discharges were not scanned",
                    self.max_peaks
                );
            }
        }
        debug!(
            "detected peaks on {} channels (k = {}, min distance = {})",
            peaks.len(),
            self.threshold_factor,
            self.min_peak_distance
        );
        Ok(peaks)
    }
}

/// Convenience wrapper around [`PeakDetector::detect_all`] using the default slot cap.
pub fn detect_peaks<C>(
    channels: &[C],
    threshold_factor: f64,
    min_peak_distance: usize,
) -> Result<Vec<PeakSet>, MeaError>
where
    C: AsRef<[f64]> + Sync,
{
    PeakDetector::new(threshold_factor, min_peak_distance).detect_all(channels)
}
