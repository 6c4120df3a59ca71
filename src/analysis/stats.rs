//! Population statistics used by the discharge detector and the outlier rules.
//!
//! - Mean and standard deviation divide by `N` (population form), matching the
//!   threshold math of the acquisition software.
//! - Empty input yields NaN; callers reject zero-length channels before calling.
//! - Order statistics skip non-finite entries so partially-filled event rows can be fed
//!   in directly.

/// Mean and spread of one channel's samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelStatistics {
    pub mean: f64,
    pub std_dev: f64,
}

impl ChannelStatistics {
    pub fn from_samples(samples: &[f64]) -> Self {
        let mean = mean(samples);
        Self {
            mean,
            std_dev: std_dev_around(samples, mean),
        }
    }

    /// Adaptive detection level `mean + k * std`.
    ///
    /// A flat channel has `std == 0`, so the level collapses onto the mean and
    /// nothing strictly exceeds it.
    pub fn threshold(&self, factor: f64) -> f64 {
        self.mean + factor * self.std_dev
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation (divides by `N`, not `N - 1`).
pub fn std_dev(samples: &[f64]) -> f64 {
    std_dev_around(samples, mean(samples))
}

fn std_dev_around(samples: &[f64], mean: f64) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    let variance = samples
        .iter()
        .map(|v| {
            let delta = v - mean;
            delta * delta
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

/// Index of the first NaN or infinite sample.
pub fn first_non_finite(samples: &[f64]) -> Option<usize> {
    samples.iter().position(|v| !v.is_finite())
}

/// Smallest finite value, if any.
pub fn finite_min<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<f64> {
    values
        .into_iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
}

/// Finite values of `values`, sorted ascending.
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Median of the finite entries; even lengths average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Quantile taken at index `floor((n - 1) * q)` of an already sorted slice.
pub fn quantile_floor(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let idx = ((sorted.len() - 1) as f64 * q).floor() as usize;
    sorted[idx]
}
