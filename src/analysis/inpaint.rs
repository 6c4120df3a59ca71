//! Missing-value inpainting over the electrode grid.
//!
//! Every missing cell, and every known cell touching one, contributes a
//! second-difference (discrete Laplacian) equation along each axis where it has
//! two neighbours. Known values move to the right-hand side and the remaining
//! system is solved in the least-squares sense through its normal equations.
//!
//! Cells are addressed by row-major linear index `row * cols + col`.
//! Near-singular pivots do not fail the solve: the affected unknown is set to
//! zero and counted in the [`InpaintReport`].

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::grid::Grid;

pub const DEFAULT_PIVOT_EPSILON: f64 = 1e-12;

/// One sparse equation: `(linear index, coefficient)` pairs sorted by index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseRow {
    entries: Vec<(usize, f64)>,
}

impl SparseRow {
    /// Adds `coefficient` to the entry at `index`, creating it if needed.
    pub fn add(&mut self, index: usize, coefficient: f64) {
        match self.entries.binary_search_by_key(&index, |&(i, _)| i) {
            Ok(pos) => self.entries[pos].1 += coefficient,
            Err(pos) => self.entries.insert(pos, (index, coefficient)),
        }
    }

    /// `[+1, -2, +1]` centred on `center`, neighbours `stride` apart.
    fn add_stencil(&mut self, center: usize, stride: usize) {
        self.add(center - stride, 1.0);
        self.add(center, -2.0);
        self.add(center + stride, 1.0);
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduced least-squares system: one column per unknown cell, known terms folded into `rhs`.
#[derive(Clone, Debug, Default)]
pub struct SparseSystem {
    unknowns: Vec<usize>,
    // column indices refer to positions in `unknowns`
    rows: Vec<SparseRow>,
    rhs: Vec<f64>,
}

impl SparseSystem {
    pub fn assemble(grid: &Grid) -> Self {
        let (rows, cols) = (grid.rows(), grid.cols());
        if rows == 0 || cols == 0 {
            return Self::default();
        }
        let missing: Vec<usize> = (0..rows * cols)
            .filter(|&idx| grid.is_missing(idx / cols, idx % cols))
            .collect();
        if missing.is_empty() {
            return Self::default();
        }
        let node_rows = if rows == 1 || cols == 1 {
            line_equations(&missing, rows * cols)
        } else {
            plane_equations(grid, &missing)
        };
        Self::eliminate_known(grid, missing, node_rows)
    }

    fn eliminate_known(grid: &Grid, unknowns: Vec<usize>, node_rows: Vec<SparseRow>) -> Self {
        let values = grid.values();
        let cols = grid.cols();
        let column_of: HashMap<usize, usize> = unknowns
            .iter()
            .enumerate()
            .map(|(col, &idx)| (idx, col))
            .collect();
        let mut rows = Vec::with_capacity(node_rows.len());
        let mut rhs = Vec::with_capacity(node_rows.len());
        for node_row in node_rows {
            let mut reduced = SparseRow::default();
            let mut known_sum = 0.0;
            for &(idx, coefficient) in node_row.entries() {
                match column_of.get(&idx) {
                    Some(&col) => reduced.add(col, coefficient),
                    None => known_sum += coefficient * values[(idx / cols, idx % cols)],
                }
            }
            // rows touching no unknown constrain nothing
            if reduced.entries().iter().all(|&(_, c)| c == 0.0) {
                continue;
            }
            rows.push(reduced);
            rhs.push(-known_sum);
        }
        Self {
            unknowns,
            rows,
            rhs,
        }
    }

    pub fn num_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    pub fn num_equations(&self) -> usize {
        self.rows.len()
    }

    /// Linear grid indices of the unknowns, in column order.
    pub fn unknowns(&self) -> &[usize] {
        &self.unknowns
    }

    pub fn rows(&self) -> &[SparseRow] {
        &self.rows
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    /// `(MᵀM, Mᵀb)` for the reduced system.
    pub fn normal_equations(&self) -> (Array2<f64>, Array1<f64>) {
        let n = self.unknowns.len();
        let mut gram = Array2::<f64>::zeros((n, n));
        let mut projected = Array1::<f64>::zeros(n);
        for (row, &b) in self.rows.iter().zip(&self.rhs) {
            for &(a, va) in row.entries() {
                projected[a] += va * b;
                for &(c, vc) in row.entries() {
                    gram[(a, c)] += va * vc;
                }
            }
        }
        (gram, projected)
    }
}

fn plane_equations(grid: &Grid, missing: &[usize]) -> Vec<SparseRow> {
    let (rows, cols) = (grid.rows(), grid.cols());
    let mut neighbours = BTreeSet::new();
    for &idx in missing {
        let (r, c) = (idx / cols, idx % cols);
        let mut candidates = Vec::with_capacity(4);
        if r > 0 {
            candidates.push(idx - cols);
        }
        if r + 1 < rows {
            candidates.push(idx + cols);
        }
        if c > 0 {
            candidates.push(idx - 1);
        }
        if c + 1 < cols {
            candidates.push(idx + 1);
        }
        for n in candidates {
            if !grid.is_missing(n / cols, n % cols) {
                neighbours.insert(n);
            }
        }
    }
    missing
        .iter()
        .chain(neighbours.iter())
        .filter_map(|&node| {
            let (r, c) = (node / cols, node % cols);
            let mut row = SparseRow::default();
            if r > 0 && r + 1 < rows {
                row.add_stencil(node, cols);
            }
            if c > 0 && c + 1 < cols {
                row.add_stencil(node, 1);
            }
            (!row.is_empty()).then_some(row)
        })
        .collect()
}

// Single row or column: every missing index plus its interior ±1 neighbours,
// each with a stencil clipped at the ends.
fn line_equations(missing: &[usize], len: usize) -> Vec<SparseRow> {
    let mut work: BTreeSet<usize> = missing.iter().copied().collect();
    for &idx in missing {
        for n in [idx.checked_sub(1), Some(idx + 1)].into_iter().flatten() {
            if n > 0 && n + 1 < len {
                work.insert(n);
            }
        }
    }
    work.into_iter()
        .map(|node| {
            let mut row = SparseRow::default();
            if node > 0 {
                row.add(node - 1, 1.0);
            }
            row.add(node, -2.0);
            if node + 1 < len {
                row.add(node + 1, 1.0);
            }
            row
        })
        .collect()
}

/// Outcome counters of one solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InpaintReport {
    pub unknowns: usize,
    pub equations: usize,
    /// Unknowns forced to zero because their pivot fell below the epsilon.
    pub degenerate_pivots: usize,
}

impl InpaintReport {
    /// The reconstruction used the zero fallback somewhere and should be treated as low confidence.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate_pivots > 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inpainted {
    pub grid: Grid,
    pub report: InpaintReport,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InpaintingSolver {
    pub pivot_epsilon: f64,
}

impl Default for InpaintingSolver {
    fn default() -> Self {
        Self {
            pivot_epsilon: DEFAULT_PIVOT_EPSILON,
        }
    }
}

impl InpaintingSolver {
    pub fn inpaint(&self, grid: &Grid) -> Inpainted {
        let system = SparseSystem::assemble(grid);
        let mut filled = grid.clone();
        let mut report = InpaintReport {
            unknowns: system.num_unknowns(),
            equations: system.num_equations(),
            degenerate_pivots: 0,
        };
        if system.num_unknowns() == 0 {
            return Inpainted {
                grid: filled,
                report,
            };
        }
        let (gram, projected) = system.normal_equations();
        let (solution, degenerate) = solve_gaussian(gram, projected, self.pivot_epsilon);
        report.degenerate_pivots = degenerate;

        let cols = grid.cols();
        for (&idx, &value) in system.unknowns().iter().zip(solution.iter()) {
            filled.set(idx / cols, idx % cols, value);
        }
        filled.mask_excluded();

        if report.is_degenerate() {
            warn!(
                "inpainting fell back to zero for {} of {} unknowns",
                degenerate, report.unknowns
            );
        }
        debug!(
            "inpainted {} cells from {} equations",
            report.unknowns, report.equations
        );
        Inpainted {
            grid: filled,
            report,
        }
    }

    /// Solves independent grids in parallel; output order follows input order.
    pub fn inpaint_many(&self, grids: &[Grid]) -> Vec<Inpainted> {
        grids.par_iter().map(|grid| self.inpaint(grid)).collect()
    }
}

pub fn inpaint(grid: &Grid) -> Grid {
    InpaintingSolver::default().inpaint(grid).grid
}

/// Gaussian elimination with partial pivoting.
///
/// Returns the solution and the number of unknowns set to zero because their
/// pivot magnitude was below `epsilon`.
fn solve_gaussian(
    mut a: Array2<f64>,
    mut b: Array1<f64>,
    epsilon: f64,
) -> (Array1<f64>, usize) {
    let n = b.len();
    for k in 0..n {
        let pivot = (k..n)
            .max_by(|&i, &j| a[(i, k)].abs().total_cmp(&a[(j, k)].abs()))
            .unwrap_or(k);
        if a[(pivot, k)].abs() < epsilon {
            continue;
        }
        if pivot != k {
            for j in 0..n {
                a.swap((k, j), (pivot, j));
            }
            b.swap(k, pivot);
        }
        let diag = a[(k, k)];
        for i in k + 1..n {
            let factor = a[(i, k)] / diag;
            if factor == 0.0 {
                continue;
            }
            for j in k..n {
                a[(i, j)] -= factor * a[(k, j)];
            }
            b[i] -= factor * b[k];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    let mut degenerate = 0;
    for i in (0..n).rev() {
        let diag = a[(i, i)];
        if diag.abs() < epsilon {
            degenerate += 1;
            continue;
        }
        let tail: f64 = (i + 1..n).map(|j| a[(i, j)] * x[j]).sum();
        x[i] = (b[i] - tail) / diag;
    }
    (x, degenerate)
}
