use std::collections::HashMap;

use log::debug;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::analysis::error::MeaError;

/// Side length of the electrode frame.
pub const FRAME_SIZE: usize = 8;
/// Reference electrode position (row, col); it never carries a timing value.
pub const REFERENCE_CELL: (usize, usize) = (4, 0);

/// Rectangular map of timing values; NaN marks a missing cell.
///
/// Excluded cells (array corners, the reference electrode) are never filled and
/// always read back as NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    values: Array2<f64>,
    excluded: Array2<bool>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            values: Array2::from_elem((rows, cols), f64::NAN),
            excluded: Array2::from_elem((rows, cols), false),
        }
    }

    pub fn from_array(values: Array2<f64>) -> Self {
        let excluded = Array2::from_elem(values.dim(), false);
        Self { values, excluded }
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get((row, col)).copied()
    }

    /// Stores `value` unless the cell is excluded or out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if self.is_excluded(row, col) {
            return;
        }
        if let Some(cell) = self.values.get_mut((row, col)) {
            *cell = value;
        }
    }

    pub fn exclude(&mut self, row: usize, col: usize) {
        if let Some(flag) = self.excluded.get_mut((row, col)) {
            *flag = true;
            self.values[(row, col)] = f64::NAN;
        }
    }

    pub fn exclude_corners(&mut self) {
        let (last_row, last_col) = (self.rows().saturating_sub(1), self.cols().saturating_sub(1));
        for (row, col) in [(0, 0), (0, last_col), (last_row, 0), (last_row, last_col)] {
            self.exclude(row, col);
        }
    }

    pub fn is_excluded(&self, row: usize, col: usize) -> bool {
        self.excluded.get((row, col)).copied().unwrap_or(false)
    }

    /// True when the cell must be solved for: either NaN or excluded.
    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.is_excluded(row, col) || self.get(row, col).map_or(false, |v| !v.is_finite())
    }

    /// Missing cells outside the exclusion mask.
    pub fn missing_count(&self) -> usize {
        self.values
            .indexed_iter()
            .filter(|&((r, c), v)| !v.is_finite() && !self.excluded[(r, c)])
            .count()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn excluded(&self) -> &Array2<bool> {
        &self.excluded
    }

    /// Row-major copy with NaN turned into `None`.
    pub fn to_rows(&self) -> Vec<Vec<Option<f64>>> {
        self.values
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|&v| v.is_finite().then_some(v)).collect())
            .collect()
    }

    /// Upside-down copy; row 0 becomes the last row.
    pub fn flipped_vertically(&self) -> Self {
        Self {
            values: self.values.slice(s![..;-1, ..]).to_owned(),
            excluded: self.excluded.slice(s![..;-1, ..]).to_owned(),
        }
    }

    /// Copy with one extra NaN row at the bottom and one NaN column at the right.
    ///
    /// The corners of the enlarged grid are excluded; existing exclusions are kept.
    pub fn padded(&self) -> Self {
        let (rows, cols) = (self.rows(), self.cols());
        let mut grid = Grid::new(rows + 1, cols + 1);
        grid.values.slice_mut(s![..rows, ..cols]).assign(&self.values);
        grid.excluded.slice_mut(s![..rows, ..cols]).assign(&self.excluded);
        grid.exclude_corners();
        grid
    }

    pub(crate) fn mask_excluded(&mut self) {
        for ((r, c), value) in self.values.indexed_iter_mut() {
            if self.excluded[(r, c)] {
                *value = f64::NAN;
            }
        }
    }
}

/// Electrode label of each recorded channel (`col * 10 + row`, both 1-based).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct ElectrodeLayout {
    labels: Vec<u32>,
    by_label: HashMap<u32, usize>,
}

impl ElectrodeLayout {
    /// Label 0 marks a channel without a usable electrode position.
    pub fn new(labels: Vec<u32>) -> Result<Self, MeaError> {
        let mut by_label = HashMap::new();
        for (channel, &label) in labels.iter().enumerate() {
            if label != 0 {
                by_label.entry(label).or_insert(channel);
            }
        }
        if by_label.is_empty() {
            return Err(MeaError::EmptyLayout);
        }
        Ok(Self { labels, by_label })
    }

    /// Parses textual labels; anything that is not an integer becomes 0.
    pub fn from_label_strings<I, S>(labels: I) -> Result<Self, MeaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = labels
            .into_iter()
            .map(|l| l.as_ref().trim().parse::<u32>().unwrap_or(0))
            .collect();
        Self::new(parsed)
    }

    /// The 60 positions of an 8x8 array minus its corners, column by column.
    pub fn standard_8x8() -> Self {
        let mut labels = Vec::with_capacity(FRAME_SIZE * FRAME_SIZE - 4);
        for col in 0..FRAME_SIZE {
            for row in 0..FRAME_SIZE {
                if is_frame_corner(row, col) {
                    continue;
                }
                labels.push(label_at(row, col));
            }
        }
        let by_label = labels.iter().enumerate().map(|(ch, &l)| (l, ch)).collect();
        Self { labels, by_label }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// First channel carrying `label`.
    pub fn channel_for(&self, label: u32) -> Option<usize> {
        self.by_label.get(&label).copied()
    }
}

impl TryFrom<Vec<u32>> for ElectrodeLayout {
    type Error = MeaError;

    fn try_from(labels: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(labels)
    }
}

impl From<ElectrodeLayout> for Vec<u32> {
    fn from(layout: ElectrodeLayout) -> Self {
        layout.labels
    }
}

pub fn label_at(row: usize, col: usize) -> u32 {
    ((col + 1) * 10 + (row + 1)) as u32
}

fn is_frame_corner(row: usize, col: usize) -> bool {
    let last = FRAME_SIZE - 1;
    (row == 0 || row == last) && (col == 0 || col == last)
}

/// Places one event's timing values on the 8x8 electrode frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridMapper {
    pub reference: (usize, usize),
}

impl Default for GridMapper {
    fn default() -> Self {
        Self {
            reference: REFERENCE_CELL,
        }
    }
}

impl GridMapper {
    pub fn map_row(&self, timing_row: &[f64], layout: &ElectrodeLayout) -> Grid {
        let mut grid = Grid::new(FRAME_SIZE, FRAME_SIZE);
        grid.exclude_corners();
        grid.exclude(self.reference.0, self.reference.1);
        let mut placed = 0;
        for row in 0..FRAME_SIZE {
            for col in 0..FRAME_SIZE {
                if grid.is_excluded(row, col) {
                    continue;
                }
                let value = layout
                    .channel_for(label_at(row, col))
                    .and_then(|channel| timing_row.get(channel).copied());
                if let Some(value) = value.filter(|v| v.is_finite()) {
                    grid.set(row, col, value);
                    placed += 1;
                }
            }
        }
        debug!("placed {placed} electrode values on the grid");
        grid
    }
}

pub fn map_to_grid(timing_row: &[f64], layout: &ElectrodeLayout) -> Grid {
    GridMapper::default().map_row(timing_row, layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_formula_places_electrode_44() {
        let layout = ElectrodeLayout::standard_8x8();
        let channel = layout.channel_for(44).unwrap();
        let mut row = vec![f64::NAN; layout.len()];
        row[channel] = 1.5;
        let grid = map_to_grid(&row, &layout);
        assert_eq!(grid.get(3, 3), Some(1.5));
        assert_eq!(label_at(3, 3), 44);
    }

    #[test]
    fn corners_and_reference_stay_empty() {
        let layout = ElectrodeLayout::standard_8x8();
        assert_eq!(layout.len(), 60);
        let grid = map_to_grid(&vec![2.0; layout.len()], &layout);
        for (r, c) in [(0, 0), (0, 7), (7, 0), (7, 7), REFERENCE_CELL] {
            assert!(grid.get(r, c).unwrap().is_nan());
            assert!(grid.is_excluded(r, c));
        }
        assert_eq!(grid.values().iter().filter(|v| v.is_finite()).count(), 59);
        assert_eq!(grid.missing_count(), 0);
        // label 41 is the top of column 4, not the reference electrode
        assert_eq!(grid.get(0, 3), Some(2.0));
    }

    #[test]
    fn unknown_labels_and_inactive_channels_stay_nan() {
        let layout = ElectrodeLayout::new(vec![12, 0, 44]).unwrap();
        let grid = map_to_grid(&[0.5, 9.0, f64::NAN], &layout);
        assert_eq!(grid.get(1, 0), Some(0.5));
        assert!(grid.get(3, 3).unwrap().is_nan());
        assert_eq!(grid.missing_count(), 8 * 8 - 5 - 1);
    }

    #[test]
    fn layout_without_labels_is_rejected() {
        assert!(matches!(
            ElectrodeLayout::new(vec![0, 0]),
            Err(MeaError::EmptyLayout)
        ));
        assert!(matches!(
            ElectrodeLayout::from_label_strings(["Ref", ""]),
            Err(MeaError::EmptyLayout)
        ));
        let parsed = ElectrodeLayout::from_label_strings(["21", "x", " 31"]).unwrap();
        assert_eq!(parsed.labels(), &[21, 0, 31]);
        assert_eq!(parsed.channel_for(31), Some(2));
    }

    #[test]
    fn duplicate_labels_resolve_to_first_channel() {
        let layout = ElectrodeLayout::new(vec![23, 23]).unwrap();
        assert_eq!(layout.channel_for(23), Some(0));
    }

    #[test]
    fn flip_and_pad() {
        let mut grid = Grid::new(2, 3);
        grid.set(0, 1, 1.0);
        grid.set(1, 2, 2.0);
        let flipped = grid.flipped_vertically();
        assert_eq!(flipped.get(1, 1), Some(1.0));
        assert_eq!(flipped.get(0, 2), Some(2.0));

        let padded = flipped.padded();
        assert_eq!((padded.rows(), padded.cols()), (3, 4));
        assert_eq!(padded.get(0, 2), Some(2.0));
        assert!(padded.is_excluded(2, 3));
        assert!(padded.is_excluded(0, 0));
        assert!(!padded.is_excluded(1, 3));
    }

    #[test]
    fn layout_round_trips_through_json() {
        let layout: ElectrodeLayout = serde_json::from_str("[12, 13, 0]").unwrap();
        assert_eq!(layout.channel_for(13), Some(1));
        assert_eq!(serde_json::to_string(&layout).unwrap(), "[12,13,0]");
        assert!(serde_json::from_str::<ElectrodeLayout>("[0]").is_err());
    }
}
