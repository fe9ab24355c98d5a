//! Multi-resolution (V-cycle) relaxation solver for the projection stage.
//!
//! Approximates `phi` satisfying `c*phi - a*sum6(phi) = phi0` on a chunk
//! grid: Gauss-Seidel smoothing on the fine grid, residual restriction by
//! direct injection into a coarser grid, recursive solve, prolongation of
//! the correction back up, and a final smoothing sweep.
//!
//! The workspace is an explicit caller-owned value, sized once from the
//! fixed resolution ladder. Each grid holds only one chunk's working set at
//! a time, so callers running chunks concurrently need one workspace per
//! thread.

use tracing::trace;

use tephra_common::ix;

use crate::chunk::DIM;

/// Gauss-Seidel sweeps before descending a level.
const PRE_SMOOTH_SWEEPS: usize = 4;

/// Gauss-Seidel sweeps after prolongating a correction.
const POST_SMOOTH_SWEEPS: usize = 1;

/// Hard ceiling on V-cycles per solve, regardless of the configured budget.
pub const HARD_CYCLE_CEILING: u32 = 64;

/// Sentinel residual reported when the cycle ceiling is exceeded or the
/// residual stops being finite.
pub const DIVERGED: f32 = -1.0;

/// Next-coarser grid dimension: interior halves, ghost border stays.
#[must_use]
pub const fn coarse_dim(dim: usize) -> usize {
    (dim - 2) / 2 + 2
}

/// The fixed resolution ladder for a chunk-sized grid.
#[must_use]
pub fn resolution_ladder() -> Vec<usize> {
    let mut dims = vec![DIM];
    loop {
        let next = coarse_dim(*dims.last().unwrap_or(&DIM));
        if next >= *dims.last().unwrap_or(&DIM) || next < 4 {
            break;
        }
        dims.push(next);
        if next == 4 {
            break;
        }
    }
    dims
}

/// Scratch grids for one V-cycle solver instance.
///
/// Level 0 is the caller's own `phi`/`phi0` pair; the workspace carries the
/// residual buffer for every level plus potential/source buffers for the
/// coarser levels.
#[derive(Debug, Clone)]
pub struct MultigridWorkspace {
    dims: Vec<usize>,
    /// Residual scratch per level (coarsest entry unused).
    residual: Vec<Vec<f32>>,
    /// Coarse potential per level below the finest.
    phi: Vec<Vec<f32>>,
    /// Coarse source per level below the finest.
    phi0: Vec<Vec<f32>>,
}

impl Default for MultigridWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MultigridWorkspace {
    /// Allocates scratch for the fixed resolution ladder.
    #[must_use]
    pub fn new() -> Self {
        let dims = resolution_ladder();
        let residual = dims.iter().map(|&d| vec![0.0; d * d * d]).collect();
        let phi = dims.iter().map(|&d| vec![0.0; d * d * d]).collect();
        let phi0 = dims.iter().map(|&d| vec![0.0; d * d * d]).collect();
        Self {
            dims,
            residual,
            phi,
            phi0,
        }
    }

    /// Number of nested resolutions.
    #[must_use]
    pub fn levels(&self) -> usize {
        self.dims.len()
    }

    /// Runs one V-cycle on `phi` for source `phi0` and returns the finest
    /// grid's residual norm afterwards.
    pub fn iterate(&mut self, phi: &mut [f32], phi0: &[f32], a: f32, c: f32) -> f32 {
        self.v_cycle(phi, phi0, a, c, 0);
        let mut residual = std::mem::take(&mut self.residual[0]);
        residual_into(&mut residual, phi, phi0, DIM, a, c);
        let norm = residual_norm(&residual, DIM);
        self.residual[0] = residual;
        norm
    }

    /// Repeats V-cycles until the residual norm drops to `tol` or the cycle
    /// budget runs out. Returns `(residual, cycles)`; the residual is
    /// [`DIVERGED`] if the hard ceiling was exhausted without convergence or
    /// the residual stopped being finite.
    pub fn solve(
        &mut self,
        phi: &mut [f32],
        phi0: &[f32],
        a: f32,
        c: f32,
        tol: f32,
        max_cycles: u32,
    ) -> (f32, u32) {
        let budget = max_cycles.min(HARD_CYCLE_CEILING);
        let mut residual = f32::INFINITY;
        let mut cycles = 0;
        while cycles < budget {
            cycles += 1;
            residual = self.iterate(phi, phi0, a, c);
            trace!("V-cycle {cycles}: residual {residual:.3e}");
            if !residual.is_finite() {
                return (DIVERGED, cycles);
            }
            if residual <= tol {
                return (residual, cycles);
            }
        }
        if budget >= HARD_CYCLE_CEILING && residual > tol {
            return (DIVERGED, cycles);
        }
        (residual, cycles)
    }

    fn v_cycle(&mut self, phi: &mut [f32], phi0: &[f32], a: f32, c: f32, level: usize) {
        let dim = self.dims[level];
        if level + 1 == self.dims.len() {
            // Coarsest grid: a degenerate one-shot solve, not a general
            // direct solver. Average the 8 innermost source cells and add
            // that scalar uniformly.
            direct_solve(phi, phi0, dim);
            return;
        }

        smooth(phi, phi0, dim, a, c, PRE_SMOOTH_SWEEPS);

        let next = level + 1;
        let next_dim = self.dims[next];
        let mut residual = std::mem::take(&mut self.residual[level]);
        let mut coarse_phi = std::mem::take(&mut self.phi[next]);
        let mut coarse_phi0 = std::mem::take(&mut self.phi0[next]);

        residual_into(&mut residual, phi, phi0, dim, a, c);
        coarse_phi.fill(0.0);
        restrict(&residual, &mut coarse_phi0, dim, next_dim);
        self.v_cycle(&mut coarse_phi, &coarse_phi0, a, c, next);
        prolongate(phi, &coarse_phi, dim, next_dim);

        self.residual[level] = residual;
        self.phi[next] = coarse_phi;
        self.phi0[next] = coarse_phi0;

        smooth(phi, phi0, dim, a, c, POST_SMOOTH_SWEEPS);
    }
}

/// In-place Gauss-Seidel sweeps of `phi = (phi0 + a*sum6(phi)) / c` over the
/// interior. The inner x loop runs in 8-wide blocks with a scalar remainder;
/// the scalar formula is authoritative.
fn smooth(phi: &mut [f32], phi0: &[f32], dim: usize, a: f32, c: f32, sweeps: usize) {
    let stride_y = dim;
    let stride_z = dim * dim;
    let inv_c = 1.0 / c;
    for _ in 0..sweeps {
        for z in 1..dim - 1 {
            for y in 1..dim - 1 {
                let row = ix(0, y, z, dim);
                let mut x = 1;
                while x + 8 <= dim - 1 {
                    for lane in 0..8 {
                        let i = row + x + lane;
                        phi[i] = (phi0[i]
                            + a * (phi[i - 1]
                                + phi[i + 1]
                                + phi[i - stride_y]
                                + phi[i + stride_y]
                                + phi[i - stride_z]
                                + phi[i + stride_z]))
                            * inv_c;
                    }
                    x += 8;
                }
                while x < dim - 1 {
                    let i = row + x;
                    phi[i] = (phi0[i]
                        + a * (phi[i - 1]
                            + phi[i + 1]
                            + phi[i - stride_y]
                            + phi[i + stride_y]
                            + phi[i - stride_z]
                            + phi[i + stride_z]))
                        * inv_c;
                    x += 1;
                }
            }
        }
    }
}

/// Writes `r = phi0 - (c*phi - a*sum6(phi))` over the interior; ghost cells
/// stay untouched (they are never restricted).
fn residual_into(out: &mut [f32], phi: &[f32], phi0: &[f32], dim: usize, a: f32, c: f32) {
    let stride_y = dim;
    let stride_z = dim * dim;
    for z in 1..dim - 1 {
        for y in 1..dim - 1 {
            for x in 1..dim - 1 {
                let i = ix(x, y, z, dim);
                let applied = c * phi[i]
                    - a * (phi[i - 1]
                        + phi[i + 1]
                        + phi[i - stride_y]
                        + phi[i + stride_y]
                        + phi[i - stride_z]
                        + phi[i + stride_z]);
                out[i] = phi0[i] - applied;
            }
        }
    }
}

/// Residual norm: root of the summed squared interior residuals.
fn residual_norm(residual: &[f32], dim: usize) -> f32 {
    let mut sum = 0.0;
    for z in 1..dim - 1 {
        for y in 1..dim - 1 {
            for x in 1..dim - 1 {
                let r = residual[ix(x, y, z, dim)];
                sum += r * r;
            }
        }
    }
    sum.sqrt()
}

/// Restriction by direct injection: `coarse[x,y,z] = fine[2x,2y,2z]`.
fn restrict(fine: &[f32], coarse: &mut [f32], fine_dim: usize, coarse_dim: usize) {
    coarse.fill(0.0);
    for z in 1..coarse_dim - 1 {
        for y in 1..coarse_dim - 1 {
            for x in 1..coarse_dim - 1 {
                coarse[ix(x, y, z, coarse_dim)] = fine[ix(2 * x, 2 * y, 2 * z, fine_dim)];
            }
        }
    }
}

/// Prolongation by direct injection: `fine[x,y,z] += coarse[x/2,y/2,z/2]`.
fn prolongate(fine: &mut [f32], coarse: &[f32], fine_dim: usize, coarse_dim: usize) {
    for z in 1..fine_dim - 1 {
        for y in 1..fine_dim - 1 {
            for x in 1..fine_dim - 1 {
                fine[ix(x, y, z, fine_dim)] += coarse[ix(x / 2, y / 2, z / 2, coarse_dim)];
            }
        }
    }
}

/// Coarsest-level solve: mean of the 8 innermost source cells, added
/// uniformly across the interior.
fn direct_solve(phi: &mut [f32], phi0: &[f32], dim: usize) {
    let lo = dim / 2 - 1;
    let mut sum = 0.0;
    for z in lo..lo + 2 {
        for y in lo..lo + 2 {
            for x in lo..lo + 2 {
                sum += phi0[ix(x, y, z, dim)];
            }
        }
    }
    let avg = sum / 8.0;
    for z in 1..dim - 1 {
        for y in 1..dim - 1 {
            for x in 1..dim - 1 {
                phi[ix(x, y, z, dim)] += avg;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CELLS;

    #[test]
    fn test_resolution_ladder() {
        assert_eq!(resolution_ladder(), vec![18, 10, 6, 4]);
    }

    #[test]
    fn test_zero_source_is_converged() {
        let mut ws = MultigridWorkspace::new();
        let mut phi = vec![0.0; CELLS];
        let phi0 = vec![0.0; CELLS];
        let residual = ws.iterate(&mut phi, &phi0, 1.0, 6.0);
        assert_eq!(residual, 0.0);
    }

    #[test]
    fn test_point_source_residual_shrinks() {
        let mut ws = MultigridWorkspace::new();
        let mut phi = vec![0.0; CELLS];
        let mut phi0 = vec![0.0; CELLS];
        phi0[crate::chunk::cell(9, 9, 9)] = 1.0;

        let first = ws.iterate(&mut phi, &phi0, 1.0, 6.0);
        let mut last = first;
        for _ in 0..3 {
            last = ws.iterate(&mut phi, &phi0, 1.0, 6.0);
        }
        assert!(first > 0.0);
        assert!(last < first);
    }

    #[test]
    fn test_solve_converges_within_budget() {
        let mut ws = MultigridWorkspace::new();
        let mut phi = vec![0.0; CELLS];
        let mut phi0 = vec![0.0; CELLS];
        phi0[crate::chunk::cell(5, 9, 12)] = 0.5;
        phi0[crate::chunk::cell(12, 9, 5)] = -0.5;

        let (residual, cycles) = ws.solve(&mut phi, &phi0, 1.0, 6.0, 1.0e-3, 20);
        assert!(residual >= 0.0, "unexpected sentinel: {residual}");
        assert!(residual <= 0.1);
        assert!(cycles <= 20);
    }

    #[test]
    fn test_unreachable_tolerance_reports_sentinel() {
        let mut ws = MultigridWorkspace::new();
        let mut phi = vec![0.0; CELLS];
        let mut phi0 = vec![0.0; CELLS];
        phi0[crate::chunk::cell(9, 9, 9)] = 1.0;

        let (residual, cycles) = ws.solve(&mut phi, &phi0, 1.0, 6.0, -1.0, HARD_CYCLE_CEILING);
        assert_eq!(residual, DIVERGED);
        assert_eq!(cycles, HARD_CYCLE_CEILING);
    }
}
