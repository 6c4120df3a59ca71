use log::debug;
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::analysis::error::MeaError;
use crate::analysis::peaks::PeakSet;
use crate::analysis::stats::finite_min;

/// Peak sample index per (event, channel); NaN where the channel has no peak for that event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMatrix {
    data: Array2<f64>, // events x channels
}

impl EventMatrix {
    /// Lays the first `events` peaks of every channel out row by row.
    pub fn from_peak_sets(peaks: &[PeakSet], events: usize) -> Self {
        let data = Array2::from_shape_fn((events, peaks.len()), |(event, channel)| {
            peaks[channel]
                .get(event)
                .map(|idx| idx as f64)
                .unwrap_or(f64::NAN)
        });
        Self { data }
    }

    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data }
    }

    pub fn num_events(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, event: usize) -> ArrayView1<'_, f64> {
        self.data.row(event)
    }

    pub fn get(&self, event: usize, channel: usize) -> Option<f64> {
        self.data
            .get((event, channel))
            .copied()
            .filter(|v| !v.is_nan())
    }

    /// Copy with every column outside `active` blanked to NaN.
    pub fn restricted_to(&self, active: &[bool]) -> Self {
        let mut data = self.data.clone();
        for (mut column, &keep) in data.axis_iter_mut(Axis(1)).zip(active) {
            if !keep {
                column.fill(f64::NAN);
            }
        }
        Self { data }
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }
}

/// Reference subtracted from each event's millisecond offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    /// Earliest finite value of each event becomes zero.
    #[default]
    RowMinimum,
    /// Earliest finite value across all events becomes zero.
    GlobalMinimum,
    /// Each event is measured from the lowest-indexed channel that holds a value
    /// in the first non-empty event. Events missing that channel become empty.
    FirstActiveChannel,
}

/// Inter-channel discharge timing in milliseconds, one row per retained event.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingMatrix {
    data: Array2<f64>,
    events: Vec<usize>,
}

impl TimingMatrix {
    pub fn num_events(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    pub fn row(&self, row: usize) -> Result<ArrayView1<'_, f64>, MeaError> {
        if row >= self.num_events() {
            return Err(MeaError::EventOutOfRange {
                event: row,
                available: self.num_events(),
            });
        }
        Ok(self.data.row(row))
    }

    /// Index into the source event matrix that row `row` was derived from.
    pub fn source_event(&self, row: usize) -> Option<usize> {
        self.events.get(row).copied()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Re-applies `baseline` to the millisecond values and drops rows left empty.
    ///
    /// A matrix already normalized with the same baseline comes back unchanged.
    pub fn rebaseline(&self, baseline: Baseline) -> Self {
        let mut data = self.data.clone();
        apply_baseline(&mut data, baseline);
        drop_empty_rows(data, &self.events)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TimingNormalizer {
    pub baseline: Baseline,
}

impl TimingNormalizer {
    pub fn new(baseline: Baseline) -> Self {
        Self { baseline }
    }

    pub fn normalize(
        &self,
        events: &EventMatrix,
        sample_rate_hz: f64,
        active: &[bool],
    ) -> Result<TimingMatrix, MeaError> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(MeaError::InvalidSampleRate);
        }
        if active.len() != events.num_channels() {
            return Err(MeaError::ChannelMismatch {
                expected: events.num_channels(),
                actual: active.len(),
            });
        }
        let mut data = events.restricted_to(active).data;
        data.mapv_inplace(|idx| idx / sample_rate_hz * 1e3);
        apply_baseline(&mut data, self.baseline);
        let all_events: Vec<usize> = (0..data.nrows()).collect();
        let timings = drop_empty_rows(data, &all_events);
        debug!(
            "normalized {} of {} events ({:?} baseline)",
            timings.num_events(),
            events.num_events(),
            self.baseline
        );
        Ok(timings)
    }
}

pub fn normalize_timings(
    events: &EventMatrix,
    sample_rate_hz: f64,
    active: &[bool],
) -> Result<TimingMatrix, MeaError> {
    TimingNormalizer::default().normalize(events, sample_rate_hz, active)
}

fn apply_baseline(data: &mut Array2<f64>, baseline: Baseline) {
    match baseline {
        Baseline::RowMinimum => {
            for mut row in data.rows_mut() {
                if let Some(min) = finite_min(row.iter()) {
                    row.mapv_inplace(|v| v - min);
                }
            }
        }
        Baseline::GlobalMinimum => {
            if let Some(min) = finite_min(data.iter()) {
                data.mapv_inplace(|v| v - min);
            }
        }
        Baseline::FirstActiveChannel => {
            let reference = data
                .rows()
                .into_iter()
                .find_map(|row| row.iter().position(|v| v.is_finite()));
            let Some(reference) = reference else {
                return;
            };
            for mut row in data.rows_mut() {
                let origin = row[reference];
                row.mapv_inplace(|v| v - origin);
            }
        }
    }
}

fn drop_empty_rows(data: Array2<f64>, events: &[usize]) -> TimingMatrix {
    let keep: Vec<usize> = data
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().any(|v| v.is_finite()))
        .map(|(idx, _)| idx)
        .collect();
    TimingMatrix {
        data: data.select(Axis(0), &keep),
        events: keep.iter().map(|&idx| events[idx]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn events() -> EventMatrix {
        EventMatrix::from_peak_sets(
            &[
                PeakSet::new(vec![100, 1100]),
                PeakSet::new(vec![120, 1090]),
                PeakSet::new(vec![140]),
            ],
            2,
        )
    }

    #[test]
    fn event_matrix_marks_missing_slots() {
        let events = events();
        assert_eq!(events.num_events(), 2);
        assert_eq!(events.num_channels(), 3);
        assert_eq!(events.get(1, 1), Some(1090.0));
        assert_eq!(events.get(1, 2), None);
    }

    #[test]
    fn converts_to_ms_from_row_minimum() {
        let timings = normalize_timings(&events(), 10_000.0, &[true, true, false]).unwrap();
        assert_eq!(timings.num_events(), 2);
        let first = timings.row(0).unwrap();
        assert_abs_diff_eq!(first[0], 0.0);
        assert_abs_diff_eq!(first[1], 2.0, epsilon = 1e-9);
        assert!(first[2].is_nan());
        let second = timings.row(1).unwrap();
        assert_abs_diff_eq!(second[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(second[1], 0.0);
    }

    #[test]
    fn global_minimum_keeps_inter_event_offsets() {
        let timings = TimingNormalizer::new(Baseline::GlobalMinimum)
            .normalize(&events(), 1_000.0, &[true, true, false])
            .unwrap();
        assert_abs_diff_eq!(timings.row(1).unwrap()[1], 990.0, epsilon = 1e-9);
    }

    #[test]
    fn first_active_channel_baseline() {
        let timings = TimingNormalizer::new(Baseline::FirstActiveChannel)
            .normalize(&events(), 1_000.0, &[false, true, true])
            .unwrap();
        // channel 1 is the reference; channel 2 has no second discharge
        assert_eq!(timings.num_events(), 2);
        assert_abs_diff_eq!(timings.row(0).unwrap()[2], 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(timings.row(1).unwrap()[1], 0.0);
    }

    #[test]
    fn empty_events_are_dropped() {
        let events = EventMatrix::from_array(array![[10.0, f64::NAN], [f64::NAN, f64::NAN], [30.0, 40.0]]);
        let timings = normalize_timings(&events, 1_000.0, &[true, true]).unwrap();
        assert_eq!(timings.num_events(), 2);
        assert_eq!(timings.source_event(0), Some(0));
        assert_eq!(timings.source_event(1), Some(2));
        assert!(matches!(
            timings.row(2),
            Err(MeaError::EventOutOfRange { event: 2, available: 2 })
        ));
    }

    #[test]
    fn rebaseline_is_idempotent() {
        for baseline in [
            Baseline::RowMinimum,
            Baseline::GlobalMinimum,
            Baseline::FirstActiveChannel,
        ] {
            let timings = TimingNormalizer::new(baseline)
                .normalize(&events(), 10_000.0, &[true, true, true])
                .unwrap();
            let again = timings.rebaseline(baseline);
            assert_eq!(again.source_event(0), timings.source_event(0));
            for (a, b) in again.as_array().iter().zip(timings.as_array().iter()) {
                assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(
            normalize_timings(&events(), 0.0, &[true, true, true]),
            Err(MeaError::InvalidSampleRate)
        ));
        assert!(matches!(
            normalize_timings(&events(), 1_000.0, &[true]),
            Err(MeaError::ChannelMismatch { expected: 3, actual: 1 })
        ));
    }
}
