use std::borrow::Cow;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::error::MeaError;
use crate::analysis::grid::ElectrodeLayout;
use crate::analysis::stats::first_non_finite;

/// One multi-electrode recording held in memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub sample_rate_hz: f64,
    pub channels: Vec<Vec<f64>>, // channels x samples
    /// Per-channel multiplier applied before detection. Empty means unscaled.
    #[serde(default)]
    pub scale_factors: Vec<f64>,
    /// Electrode label of each channel; 0 marks a channel with no position.
    pub layout: Vec<u32>,
}

impl Recording {
    pub fn new(sample_rate_hz: f64, channels: Vec<Vec<f64>>, layout: Vec<u32>) -> Self {
        Self {
            sample_rate_hz,
            channels,
            scale_factors: Vec::new(),
            layout,
        }
    }

    pub fn with_scale_factors(mut self, scale_factors: Vec<f64>) -> Self {
        self.scale_factors = scale_factors;
        self
    }

    /// Splits a flat channel-major buffer into `num_channels` equal channels.
    ///
    /// Trailing samples that do not fill a whole row are dropped.
    pub fn from_channel_major(
        samples: &[f64],
        num_channels: usize,
        sample_rate_hz: f64,
        layout: Vec<u32>,
    ) -> Result<Self, MeaError> {
        if num_channels == 0 {
            return Err(MeaError::NoChannels);
        }
        let per_channel = samples.len() / num_channels;
        if per_channel == 0 {
            return Err(MeaError::EmptyChannel { channel: 0 });
        }
        let remainder = samples.len() % num_channels;
        if remainder != 0 {
            warn!(
                "{} samples do not split into {num_channels} channels; dropping the last {remainder}",
                samples.len()
            );
        }
        let channels = samples
            .chunks_exact(per_channel)
            .take(num_channels)
            .map(<[f64]>::to_vec)
            .collect();
        Ok(Self::new(sample_rate_hz, channels, layout))
    }

    pub fn validate(&self) -> Result<(), MeaError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(MeaError::InvalidSampleRate);
        }
        if self.channels.is_empty() {
            return Err(MeaError::NoChannels);
        }
        for (channel, samples) in self.channels.iter().enumerate() {
            if samples.is_empty() {
                return Err(MeaError::EmptyChannel { channel });
            }
            if let Some(index) = first_non_finite(samples) {
                return Err(MeaError::NonFiniteSample { channel, index });
            }
        }
        let channel_count = self.channels.len();
        if channel_count != self.layout.len() {
            return Err(MeaError::ChannelMismatch {
                expected: self.layout.len(),
                actual: channel_count,
            });
        }
        if !self.scale_factors.is_empty() && self.scale_factors.len() != channel_count {
            return Err(MeaError::ChannelMismatch {
                expected: channel_count,
                actual: self.scale_factors.len(),
            });
        }
        Ok(())
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> Option<usize> {
        self.channels.first().map(|c| c.len())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.samples_per_channel()
            .map(|len| Duration::from_secs_f64(len as f64 / self.sample_rate_hz))
    }

    /// Channels with their scale factor applied; borrowed when there is nothing to scale.
    pub fn scaled_channels(&self) -> Cow<'_, [Vec<f64>]> {
        if self.scale_factors.is_empty() {
            return Cow::Borrowed(&self.channels);
        }
        Cow::Owned(
            self.channels
                .iter()
                .zip(&self.scale_factors)
                .map(|(channel, &scale)| channel.iter().map(|v| v * scale).collect())
                .collect(),
        )
    }

    pub fn layout(&self) -> Result<ElectrodeLayout, MeaError> {
        ElectrodeLayout::new(self.layout.clone())
    }
}

/// Acquisition metadata as stored by the recording hardware.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionInfo {
    /// Sampling period in microseconds.
    pub tick_us: f64,
    /// Power of ten shared by all channels' conversion factors.
    pub exponent: i32,
    pub conversion_factors: Vec<f64>,
}

impl AcquisitionInfo {
    pub fn sample_rate_hz(&self) -> Result<f64, MeaError> {
        if !(self.tick_us.is_finite() && self.tick_us > 0.0) {
            return Err(MeaError::InvalidSampleRate);
        }
        Ok(1e6 / self.tick_us)
    }

    /// `conversion_factor * 10^exponent` per channel.
    pub fn scale_factors(&self) -> Vec<f64> {
        let unit = 10f64.powi(self.exponent);
        self.conversion_factors.iter().map(|f| f * unit).collect()
    }

    /// Raw ADC counts plus this metadata as a scaled [`Recording`].
    pub fn recording(
        &self,
        channels: Vec<Vec<f64>>,
        layout: Vec<u32>,
    ) -> Result<Recording, MeaError> {
        let recording = Recording::new(self.sample_rate_hz()?, channels, layout)
            .with_scale_factors(self.scale_factors());
        recording.validate()?;
        Ok(recording)
    }
}

/// Anything that can hand out recordings one at a time.
pub trait RecordingSource {
    fn next_recording(&mut self) -> Result<Option<Recording>, MeaError>;
}

/// In-memory source for tests and replay.
pub struct ManualSource {
    queue: VecDeque<Recording>,
}

impl ManualSource {
    pub fn new(recordings: impl IntoIterator<Item = Recording>) -> Self {
        Self {
            queue: recordings.into_iter().collect(),
        }
    }
}

impl RecordingSource for ManualSource {
    fn next_recording(&mut self) -> Result<Option<Recording>, MeaError> {
        Ok(self.queue.pop_front())
    }
}

/// Reads one JSON-encoded [`Recording`] per file, in the order given.
pub struct JsonFileSource {
    paths: VecDeque<PathBuf>,
}

impl JsonFileSource {
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecordingSource for JsonFileSource {
    fn next_recording(&mut self) -> Result<Option<Recording>, MeaError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let reader = BufReader::new(File::open(&path)?);
        let recording: Recording = serde_json::from_reader(reader)?;
        recording.validate()?;
        debug!(
            "loaded {} channels from {}",
            recording.num_channels(),
            path.display()
        );
        Ok(Some(recording))
    }
}
