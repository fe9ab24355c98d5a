//! Per-frame simulation pipeline over a set of active chunks.
//!
//! One `simulate` call runs each stage across every chunk before the next
//! stage begins anywhere. That ordering is required, not incidental: later
//! stages read ghost values the earlier stage finalized in every chunk.
//! Within a stage, chunk work depends only on data finalized by the previous
//! stage, so stages are embarrassingly parallel per chunk; the one serial
//! prerequisite is the ghost-flux refresh, which reads every neighbor's
//! previous-frame caches.
//!
//! Numeric policy: density is clamped to `[0, DENSITY_MAX]` after every
//! additive step; velocity magnitude is not hard-clamped. Mass drift from
//! the lossy interpolation in advection is corrected by the global
//! renormalization pass instead.

use tracing::{debug, warn};

use tephra_common::neighbor_index;

use crate::bounds::solve_bounds;
use crate::chunk::{cell, Chunk, DENSITY_MAX, DIM, N, PRESSURE_CLAMP};
use crate::config::Environment;
use crate::mask;
use crate::multigrid::MultigridWorkspace;
use crate::stats::{FrameStats, StageTimer, StageTimings};

/// Fixed relaxation iteration count for the diffusion stages.
const DIFFUSE_ITERATIONS: usize = 10;

/// The six face offsets, for the ghost-flux refresh.
const FACES: [(i32, i32, i32); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Runs one simulation frame over all active chunks.
///
/// Chunks must have been linked (see [`crate::chunk::link_neighbors`]) since
/// the last topology change. The multigrid workspace holds one chunk's
/// working set at a time; callers running chunks concurrently need one per
/// thread.
pub fn simulate(
    chunks: &mut [Chunk],
    env: &Environment,
    workspace: &mut MultigridWorkspace,
    dt: f32,
) -> FrameStats {
    let mut timer = StageTimer::start();
    let mut timings = StageTimings::default();
    let mut max_residual = 0.0_f32;

    // 1. Serial prerequisite: refresh pressure/divergence ghosts from the
    //    previous frame's caches.
    ghost_flux_refresh(chunks);
    timings.ghost_refresh = timer.lap();

    // 2. Masked snapshot of the tracked fields into the working buffers.
    for chunk in chunks.iter_mut() {
        boundary_snapshot(chunk);
    }
    timings.snapshot = timer.lap();

    // 3. Force injection and buffer flip.
    for chunk in chunks.iter_mut() {
        add_forces(chunk, env, dt);
    }
    solve_bounds(chunks, env);
    timings.forces = timer.lap();

    // 4. Velocity diffusion.
    let visc_a = dt * env.viscosity * (N * N * N) as f32;
    for chunk in chunks.iter_mut() {
        relax_into(&mut chunk.u, &chunk.u0, visc_a);
        relax_into(&mut chunk.v, &chunk.v0, visc_a);
        relax_into(&mut chunk.w, &chunk.w0, visc_a);
    }
    timings.diffusion = timer.lap();

    // 5. First projection, then flip so the delta buffers hold the
    //    divergence-free field for the advection trace.
    for chunk in chunks.iter_mut() {
        project(chunk, env, workspace, &mut max_residual);
        std::mem::swap(&mut chunk.u, &mut chunk.u0);
        std::mem::swap(&mut chunk.v, &mut chunk.v0);
        std::mem::swap(&mut chunk.w, &mut chunk.w0);
    }
    solve_bounds(chunks, env);
    timings.projection_a = timer.lap();

    // 6. Semi-Lagrangian velocity advection with cross-chunk redirection.
    for index in 0..chunks.len() {
        let new_u = advect_component(chunks, index, env, dt, |c: &Chunk| c.u0.as_slice());
        let new_v = advect_component(chunks, index, env, dt, |c: &Chunk| c.v0.as_slice());
        let new_w = advect_component(chunks, index, env, dt, |c: &Chunk| c.w0.as_slice());
        let chunk = &mut chunks[index];
        chunk.u = new_u;
        chunk.v = new_v;
        chunk.w = new_w;
    }
    timings.advection = timer.lap();

    // 7. Second projection: advection reintroduces divergence.
    for chunk in chunks.iter_mut() {
        project(chunk, env, workspace, &mut max_residual);
    }
    timings.projection_b = timer.lap();

    // 8. Density step: source, diffuse, advect, mirror.
    let (existing, injected) = density_step(chunks, env, dt);
    timings.density = timer.lap();

    // 9. Global mass renormalization.
    let ratio = renormalize(chunks, existing, injected);
    timings.renormalize = timer.lap();

    // 10. Clear the delta buffers for next frame's injections.
    for chunk in chunks.iter_mut() {
        chunk.d0.fill(0.0);
        chunk.u0.fill(0.0);
        chunk.v0.fill(0.0);
        chunk.w0.fill(0.0);
    }
    timings.clear = timer.lap();

    debug!(
        "Frame: {} chunks, existing {existing:.4}, injected {injected:.4}, ratio {ratio:.6}, max residual {max_residual:.3e}",
        chunks.len()
    );

    FrameStats {
        existing_density: existing,
        new_density: injected,
        normalization_ratio: ratio,
        max_projection_residual: max_residual,
        timings,
    }
}

/// Refreshes each chunk's cached pressure/divergence ghost cells: average
/// with the neighbor's adjacent interior when resident, else mirror the
/// chunk's own interior outward.
fn ghost_flux_refresh(chunks: &mut [Chunk]) {
    let mut pressure_updates = Vec::with_capacity(DIM * DIM * 6);
    let mut divergence_updates = Vec::with_capacity(DIM * DIM * 6);

    for index in 0..chunks.len() {
        pressure_updates.clear();
        divergence_updates.clear();
        {
            let chunk = &chunks[index];
            for (dx, dy, dz) in FACES {
                let neighbor = chunk
                    .neighbor(neighbor_index(dx, dy, dz))
                    .map(|n| &chunks[n]);
                for b in 1..DIM - 1 {
                    for a in 1..DIM - 1 {
                        let (ghost, inner, remote) = face_cells(dx, dy, dz, a, b);
                        let own_p = chunk.pressure_cache[inner];
                        let own_div = chunk.divergence_cache[inner];
                        let (p, div) = match neighbor {
                            Some(other) => (
                                0.5 * (own_p + other.pressure_cache[remote]),
                                0.5 * (own_div + other.divergence_cache[remote]),
                            ),
                            None => (own_p, own_div),
                        };
                        pressure_updates.push((ghost, p));
                        divergence_updates.push((ghost, div));
                    }
                }
            }
        }
        let chunk = &mut chunks[index];
        for &(at, value) in &pressure_updates {
            chunk.pressure_cache[at] = value;
        }
        for &(at, value) in &divergence_updates {
            chunk.divergence_cache[at] = value;
        }
    }
}

/// Cell triple for a face position: the ghost cell, the chunk's own adjacent
/// interior cell, and the neighbor's adjacent interior cell. `a`/`b` walk
/// the two in-plane axes.
fn face_cells(dx: i32, dy: i32, dz: i32, a: usize, b: usize) -> (usize, usize, usize) {
    let pick = |offset: i32| -> (usize, usize, usize) {
        match offset {
            -1 => (0, 1, DIM - 2),
            1 => (DIM - 1, DIM - 2, 1),
            _ => unreachable!("face offset must be -1 or 1"),
        }
    };
    if dx != 0 {
        let (g, i, r) = pick(dx);
        (cell(g, a, b), cell(i, a, b), cell(r, a, b))
    } else if dy != 0 {
        let (g, i, r) = pick(dy);
        (cell(a, g, b), cell(a, i, b), cell(a, r, b))
    } else {
        let (g, i, r) = pick(dz);
        (cell(a, b, g), cell(a, b, i), cell(a, b, r))
    }
}

/// Gathers the tracked fields into the per-chunk working buffers, zeroing
/// solid cells, so later stages never branch on cell validity.
fn boundary_snapshot(chunk: &mut Chunk) {
    let bounds = &chunk.bounds;
    masked_copy(&mut chunk.d_temp, &chunk.d, bounds);
    masked_copy(&mut chunk.u_temp, &chunk.u, bounds);
    masked_copy(&mut chunk.v_temp, &chunk.v, bounds);
    masked_copy(&mut chunk.w_temp, &chunk.w, bounds);
    masked_copy(&mut chunk.pressure_temp, &chunk.pressure_cache, bounds);
}

/// `dst[i] = src[i]` where the cell is open, `0` where it is solid.
/// 8-wide blocks with a scalar remainder along the flat index.
fn masked_copy(dst: &mut [f32], src: &[f32], bounds: &[f32]) {
    let len = dst.len();
    let mut i = 0;
    while i + 8 <= len {
        for lane in 0..8 {
            let at = i + lane;
            dst[at] = if bounds[at] > 0.0 { 0.0 } else { src[at] };
        }
        i += 8;
    }
    while i < len {
        dst[i] = if bounds[i] > 0.0 { 0.0 } else { src[i] };
        i += 1;
    }
}

/// Adds gravity to the y-velocity delta, integrates all velocity deltas into
/// the working buffers, then flips so the delta buffers become the new
/// previous-frame source.
fn add_forces(chunk: &mut Chunk, env: &Environment, dt: f32) {
    for z in 1..DIM - 1 {
        for y in 1..DIM - 1 {
            for x in 1..DIM - 1 {
                let i = cell(x, y, z);
                chunk.v0[i] += env.gravity.y;
                chunk.u_temp[i] += dt * chunk.u0[i];
                chunk.v_temp[i] += dt * chunk.v0[i];
                chunk.w_temp[i] += dt * chunk.w0[i];
            }
        }
    }
    std::mem::swap(&mut chunk.u0, &mut chunk.u_temp);
    std::mem::swap(&mut chunk.v0, &mut chunk.v_temp);
    std::mem::swap(&mut chunk.w0, &mut chunk.w_temp);
}

/// Relaxation solve of `x = (x0 + a*sum6(x)) / (1 + 6a)` over the interior,
/// [`DIFFUSE_ITERATIONS`] fixed sweeps. `x` starts as a copy of `x0`, so the
/// stitched ghost values ride along.
fn relax_into(x: &mut [f32], x0: &[f32], a: f32) {
    x.copy_from_slice(x0);
    if a == 0.0 {
        return;
    }
    let c = 1.0 + 6.0 * a;
    let inv_c = 1.0 / c;
    let stride_y = DIM;
    let stride_z = DIM * DIM;
    for _ in 0..DIFFUSE_ITERATIONS {
        for z in 1..DIM - 1 {
            for y in 1..DIM - 1 {
                let row = cell(0, y, z);
                let mut ix = 1;
                while ix + 8 <= DIM - 1 {
                    for lane in 0..8 {
                        let i = row + ix + lane;
                        x[i] = (x0[i]
                            + a * (x[i - 1]
                                + x[i + 1]
                                + x[i - stride_y]
                                + x[i + stride_y]
                                + x[i - stride_z]
                                + x[i + stride_z]))
                            * inv_c;
                    }
                    ix += 8;
                }
                while ix < DIM - 1 {
                    let i = row + ix;
                    x[i] = (x0[i]
                        + a * (x[i - 1]
                            + x[i + 1]
                            + x[i - stride_y]
                            + x[i + stride_y]
                            + x[i - stride_z]
                            + x[i + stride_z]))
                        * inv_c;
                    ix += 1;
                }
            }
        }
    }
}

/// Pressure projection: computes the velocity divergence, solves the Poisson
/// equation for the scalar potential with the multigrid solver, and
/// subtracts the potential's gradient, leaving the velocity approximately
/// divergence-free.
///
/// The divergence and potential land in the chunk's caches, where next
/// frame's ghost-flux refresh shares them with neighbors.
fn project(
    chunk: &mut Chunk,
    env: &Environment,
    workspace: &mut MultigridWorkspace,
    max_residual: &mut f32,
) {
    let h = 1.0 / N as f32;
    let stride_y = DIM;
    let stride_z = DIM * DIM;

    // Setup: divergence into the cache; the interior potential warm-starts
    // from the masked snapshot of the previous solve's potential. Ghost
    // values from the flux refresh stay put and act as boundary conditions.
    for z in 1..DIM - 1 {
        for y in 1..DIM - 1 {
            for x in 1..DIM - 1 {
                let i = cell(x, y, z);
                chunk.divergence_cache[i] = -0.5
                    * h
                    * (chunk.u[i + 1] - chunk.u[i - 1]
                        + chunk.v[i + stride_y]
                        - chunk.v[i - stride_y]
                        + chunk.w[i + stride_z]
                        - chunk.w[i - stride_z]);
                chunk.pressure_cache[i] = chunk.pressure_temp[i];
            }
        }
    }

    // Solve.
    let (residual, cycles) = workspace.solve(
        &mut chunk.pressure_cache,
        &chunk.divergence_cache,
        1.0,
        6.0,
        env.projection_tolerance,
        env.projection_max_cycles,
    );
    chunk.projection_residual = residual;
    chunk.projection_iterations = cycles;
    if residual < 0.0 {
        warn!(
            "Projection solve hit the cycle ceiling for chunk {}",
            chunk.coord()
        );
    } else if residual > *max_residual {
        *max_residual = residual;
    }
    for p in chunk.pressure_cache.iter_mut() {
        *p = p.clamp(-PRESSURE_CLAMP, PRESSURE_CLAMP);
    }

    // Finalize: subtract the central-difference gradient.
    let scale = 0.5 * N as f32;
    for z in 1..DIM - 1 {
        for y in 1..DIM - 1 {
            for x in 1..DIM - 1 {
                let i = cell(x, y, z);
                let p = &chunk.pressure_cache;
                chunk.u[i] -= scale * (p[i + 1] - p[i - 1]);
                chunk.v[i] -= scale * (p[i + stride_y] - p[i - stride_y]);
                chunk.w[i] -= scale * (p[i + stride_z] - p[i - stride_z]);
            }
        }
    }
}

/// Back-traces one field component for one chunk and returns the advected
/// array. Reads only; the caller installs the result after the gather.
fn advect_component(
    chunks: &[Chunk],
    index: usize,
    env: &Environment,
    dt: f32,
    source: fn(&Chunk) -> &[f32],
) -> Vec<f32> {
    let chunk = &chunks[index];
    let mut out = source(chunk).to_vec();
    let step = dt * N as f32;
    for z in 1..DIM - 1 {
        for y in 1..DIM - 1 {
            for x in 1..DIM - 1 {
                let i = cell(x, y, z);
                let px = x as f32 - step * chunk.u0[i];
                let py = y as f32 - step * chunk.v0[i];
                let pz = z as f32 - step * chunk.w0[i];
                out[i] = sample_redirected(chunks, chunk, px, py, pz, env, source);
            }
        }
    }
    out
}

/// Samples a traced position, redirecting into a resident neighbor's
/// interior when the trace leaves the chunk, else clamping to the chunk
/// edge with the configured margin.
fn sample_redirected(
    chunks: &[Chunk],
    chunk: &Chunk,
    px: f32,
    py: f32,
    pz: f32,
    env: &Environment,
    source: fn(&Chunk) -> &[f32],
) -> f32 {
    let sx = trace_sign(px);
    let sy = trace_sign(py);
    let sz = trace_sign(pz);

    if (sx, sy, sz) != (0, 0, 0) && mask::has_neighbor(chunk.chunk_mask, sx, sy, sz) {
        if let Some(n) = chunk.neighbor(neighbor_index(sx, sy, sz)) {
            // Remap the trace into the neighbor's own index space: each
            // crossed axis shifts by one interior span.
            let qx = px + normalize_shift(sx);
            let qy = py + normalize_shift(sy);
            let qz = pz + normalize_shift(sz);
            return trilerp_clamped(source(&chunks[n]), qx, qy, qz, env.advection_margin);
        }
    }
    trilerp_clamped(source(chunk), px, py, pz, env.advection_margin)
}

/// Which side a traced coordinate leaves the interior on, if any.
fn trace_sign(p: f32) -> i32 {
    if p < 1.0 {
        -1
    } else if p > (DIM - 2) as f32 {
        1
    } else {
        0
    }
}

/// Coordinate shift into a neighbor's index space for one crossed axis.
/// Assumes every neighbor interior spans exactly `N` cells.
fn normalize_shift(sign: i32) -> f32 {
    -(sign as f32) * N as f32
}

/// Trilinear interpolation of the 8 cells around a position, clamped into
/// the valid sampling range with a near-edge margin so the interpolation
/// weights never degenerate.
fn trilerp_clamped(field: &[f32], px: f32, py: f32, pz: f32, margin: f32) -> f32 {
    let lo = 0.5 + margin;
    let hi = (DIM - 1) as f32 - 0.5 - margin;
    let px = px.clamp(lo, hi);
    let py = py.clamp(lo, hi);
    let pz = pz.clamp(lo, hi);

    let x0 = px.floor() as usize;
    let y0 = py.floor() as usize;
    let z0 = pz.floor() as usize;
    let x1 = (x0 + 1).min(DIM - 1);
    let y1 = (y0 + 1).min(DIM - 1);
    let z1 = (z0 + 1).min(DIM - 1);

    let tx = px - x0 as f32;
    let ty = py - y0 as f32;
    let tz = pz - z0 as f32;

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let c00 = lerp(field[cell(x0, y0, z0)], field[cell(x1, y0, z0)], tx);
    let c10 = lerp(field[cell(x0, y1, z0)], field[cell(x1, y1, z0)], tx);
    let c01 = lerp(field[cell(x0, y0, z1)], field[cell(x1, y0, z1)], tx);
    let c11 = lerp(field[cell(x0, y1, z1)], field[cell(x1, y1, z1)], tx);
    lerp(lerp(c00, c10, ty), lerp(c01, c11, ty), tz)
}

/// Density step: integrate queued sources into the masked density snapshot
/// (tracking existing vs. injected totals for renormalization), diffuse,
/// advect along the projected velocity, and mirror borders so neighbors see
/// the updated interior.
///
/// Working from the snapshot means solid cells enter the step holding zero
/// density: whatever the host wrote into a solid cell is shed here, not
/// branch-checked in every stencil.
fn density_step(chunks: &mut [Chunk], env: &Environment, dt: f32) -> (f32, f32) {
    let mut existing = 0.0;
    let mut injected = 0.0;
    for chunk in chunks.iter_mut() {
        for z in 1..DIM - 1 {
            for y in 1..DIM - 1 {
                for x in 1..DIM - 1 {
                    let i = cell(x, y, z);
                    let before = chunk.d_temp[i];
                    existing += before;
                    chunk.d_temp[i] = (before + dt * chunk.d0[i]).clamp(0.0, DENSITY_MAX);
                    injected += chunk.d_temp[i] - before;
                }
            }
        }
        std::mem::swap(&mut chunk.d, &mut chunk.d_temp);
    }

    let diff_a = dt * env.diffusion * (N * N * N) as f32;
    for chunk in chunks.iter_mut() {
        // Diffuse into the delta buffer; it becomes the advection source.
        let (d0, d) = (&mut chunk.d0, &chunk.d);
        relax_into(d0, d, diff_a);
    }
    solve_bounds(chunks, env);

    for index in 0..chunks.len() {
        let mut advected = advect_scalar(chunks, index, env, dt);
        for value in advected.iter_mut() {
            *value = value.clamp(0.0, DENSITY_MAX);
        }
        chunks[index].d = advected;
    }
    solve_bounds(chunks, env);

    (existing, injected)
}

/// Scalar advection of density: same scheme as velocity, traced along the
/// current (projected) velocity field.
fn advect_scalar(chunks: &[Chunk], index: usize, env: &Environment, dt: f32) -> Vec<f32> {
    let chunk = &chunks[index];
    let mut out = chunk.d0.to_vec();
    let step = dt * N as f32;
    let source: fn(&Chunk) -> &[f32] = |c: &Chunk| c.d0.as_slice();
    for z in 1..DIM - 1 {
        for y in 1..DIM - 1 {
            for x in 1..DIM - 1 {
                let i = cell(x, y, z);
                let px = x as f32 - step * chunk.u[i];
                let py = y as f32 - step * chunk.v[i];
                let pz = z as f32 - step * chunk.w[i];
                out[i] = sample_redirected(chunks, chunk, px, py, pz, env, source);
            }
        }
    }
    out
}

/// Scales every chunk's density so the global total matches the tracked
/// existing + injected mass, correcting interpolation loss or gain. Returns
/// the applied ratio.
fn renormalize(chunks: &mut [Chunk], existing: f32, injected: f32) -> f32 {
    let mut total = 0.0;
    for chunk in chunks.iter() {
        total += chunk.interior_density();
    }
    let expected = existing + injected;
    if total <= f32::EPSILON || !total.is_finite() {
        return 1.0;
    }
    let ratio = expected / total;
    if !ratio.is_finite() {
        warn!("Skipping renormalization: non-finite ratio (total {total}, expected {expected})");
        return 1.0;
    }
    // Ghost cells scale too: they mirror neighbor interiors, and the ratio
    // is global, so scaling both sides keeps the mirror exact.
    for chunk in chunks.iter_mut() {
        for value in chunk.d.iter_mut() {
            *value = (*value * ratio).clamp(0.0, DENSITY_MAX);
        }
    }
    ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::link_neighbors;
    use glam::Vec3;
    use tephra_common::ChunkCoord;

    fn grid_3x3x3() -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    chunks.push(Chunk::new(ChunkCoord::new(x, y, z)));
                }
            }
        }
        link_neighbors(&mut chunks);
        chunks
    }

    fn quiet_env() -> Environment {
        let mut env = Environment::default();
        env.gravity = Vec3::ZERO;
        env
    }

    fn total_density(chunks: &[Chunk]) -> f32 {
        chunks.iter().map(Chunk::interior_density).sum()
    }

    fn center_index(chunks: &[Chunk]) -> usize {
        chunks
            .iter()
            .position(|c| c.coord() == ChunkCoord::new(1, 1, 1))
            .expect("center chunk")
    }

    #[test]
    fn test_mass_conserved_without_sources() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        // Seed well below the clamp ceiling so renormalization is lossless.
        chunks[center].d[cell(8, 8, 8)] = 0.5;
        chunks[center].add_velocity(8, 8, 8, 1.0, 0.0, 0.0);

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        let before = total_density(&chunks);
        for _ in 0..3 {
            simulate(&mut chunks, &env, &mut ws, env.timestep);
        }
        let after = total_density(&chunks);
        assert!(
            (after - before).abs() <= 1e-5,
            "mass drifted: {before} -> {after}"
        );
    }

    #[test]
    fn test_mass_conserved_advection_only() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        for z in 7..11 {
            for y in 7..11 {
                for x in 7..11 {
                    chunks[center].d[cell(x, y, z)] = 0.4;
                }
            }
        }
        chunks[center].add_velocity(9, 9, 9, 3.0, 1.0, -2.0);

        // Pure transport: no viscosity, no diffusion, no forcing.
        let mut env = quiet_env();
        env.viscosity = 0.0;
        env.diffusion = 0.0;

        let mut ws = MultigridWorkspace::new();
        let before = total_density(&chunks);
        for _ in 0..3 {
            simulate(&mut chunks, &env, &mut ws, env.timestep);
        }
        let after = total_density(&chunks);
        assert!(
            (after - before).abs() <= 1e-5,
            "mass drifted under advection alone: {before} -> {after}"
        );
    }

    #[test]
    fn test_renormalized_total_matches_tracked_mass() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        chunks[center].d[cell(4, 4, 4)] = 0.8;
        // Queue a source; the density step integrates and tracks it.
        chunks[center].add_density(10, 10, 10, 30.0);

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        let stats = simulate(&mut chunks, &env, &mut ws, env.timestep);

        let expected = stats.existing_density + stats.new_density;
        let after = total_density(&chunks);
        assert!(stats.new_density > 0.0);
        assert!(
            (after - expected).abs() <= 1e-5,
            "renormalized total {after} != tracked {expected}"
        );
    }

    #[test]
    fn test_projection_diagnostics_within_bounds() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        chunks[center].d[cell(8, 8, 8)] = DENSITY_MAX;
        chunks[center].add_velocity(8, 8, 8, 0.0, 1.0, 0.0);

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        // Two frames: the second solve warm-starts from the snapshot of the
        // first frame's potential and must converge just the same.
        for _ in 0..2 {
            simulate(&mut chunks, &env, &mut ws, env.timestep);
            for chunk in &chunks {
                assert!(chunk.projection_iterations <= 20);
                assert!(
                    chunk.projection_residual >= 0.0 && chunk.projection_residual <= 0.1,
                    "residual {} out of bounds for {}",
                    chunk.projection_residual,
                    chunk.coord()
                );
            }
        }
    }

    #[test]
    fn test_snapshot_masks_solid_cells() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        chunk.bounds[cell(3, 3, 3)] = 1.0;
        chunk.d[cell(3, 3, 3)] = 0.9;
        chunk.u[cell(3, 3, 3)] = 1.5;
        chunk.pressure_cache[cell(3, 3, 3)] = 5.0;
        chunk.d[cell(4, 4, 4)] = 0.2;

        boundary_snapshot(&mut chunk);

        assert_eq!(chunk.d_temp[cell(3, 3, 3)], 0.0);
        assert_eq!(chunk.u_temp[cell(3, 3, 3)], 0.0);
        assert_eq!(chunk.pressure_temp[cell(3, 3, 3)], 0.0);
        assert_eq!(chunk.d_temp[cell(4, 4, 4)], 0.2);
    }

    #[test]
    fn test_solid_cells_shed_density() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        // Host writes density into a solid cell; the density step works from
        // the masked snapshot, so only the open cell's mass survives.
        chunks[center].bounds[cell(5, 5, 5)] = 1.0;
        chunks[center].d[cell(5, 5, 5)] = 0.4;
        chunks[center].d[cell(9, 9, 9)] = 0.3;

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        let stats = simulate(&mut chunks, &env, &mut ws, env.timestep);

        assert!((stats.existing_density - 0.3).abs() < 1e-6);
        assert!((total_density(&chunks) - 0.3).abs() <= 1e-5);
    }

    #[test]
    fn test_scalar_advection_redirects_across_seam() {
        let mut chunks = vec![
            Chunk::new(ChunkCoord::new(0, 0, 0)),
            Chunk::new(ChunkCoord::new(1, 0, 0)),
        ];
        link_neighbors(&mut chunks);

        // Advection source hugging chunk 0's +x interior border.
        for z in 6..12 {
            for y in 6..12 {
                chunks[0].d0[cell(DIM - 2, y, z)] = 1.0;
            }
        }
        // Uniform +x wind sized so the back-trace from chunk 1's first
        // interior column lands exactly on chunk 0's last interior column:
        // dt * N * u = 1 cell.
        let env = quiet_env();
        let u = 1.0 / (env.timestep * N as f32);
        for z in 1..DIM - 1 {
            for y in 1..DIM - 1 {
                for x in 1..DIM - 1 {
                    chunks[1].u[cell(x, y, z)] = u;
                }
            }
        }

        let advected = advect_scalar(&chunks, 1, &env, env.timestep);
        assert!((advected[cell(1, 8, 8)] - 1.0).abs() < 1e-5);
        // Rows outside the seeded band stay empty.
        assert_eq!(advected[cell(1, 2, 2)], 0.0);
    }

    #[test]
    fn test_density_ghosts_mirror_neighbors_after_frame() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        for z in 4..14 {
            for y in 4..14 {
                for x in 4..14 {
                    chunks[center].d[cell(x, y, z)] = 0.3;
                }
            }
        }
        chunks[center].add_velocity(9, 9, 9, 2.0, 0.0, 2.0);

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        simulate(&mut chunks, &env, &mut ws, env.timestep);

        // Renormalization scales ghosts and interiors by the same global
        // ratio, so every seam stays exactly mirrored at frame end.
        for chunk in &chunks {
            if let Some(n) = chunk.neighbor(tephra_common::neighbor_index(0, 0, 1)) {
                for y in 1..DIM - 1 {
                    for x in 1..DIM - 1 {
                        assert_eq!(
                            chunk.d[cell(x, y, DIM - 1)],
                            chunks[n].d[cell(x, y, 1)],
                            "seam mismatch at ({x}, {y}) of {}",
                            chunk.coord()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_scratch_cleared_after_frame() {
        let mut chunks = grid_3x3x3();
        let center = center_index(&chunks);
        chunks[center].add_density(5, 5, 5, 1.0);
        chunks[center].add_velocity(5, 5, 5, 1.0, 1.0, 1.0);

        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        simulate(&mut chunks, &env, &mut ws, env.timestep);

        for chunk in &chunks {
            assert!(chunk.d0.iter().all(|&x| x == 0.0));
            assert!(chunk.u0.iter().all(|&x| x == 0.0));
            assert!(chunk.v0.iter().all(|&x| x == 0.0));
            assert!(chunk.w0.iter().all(|&x| x == 0.0));
        }
    }

    #[test]
    fn test_stage_timings_populated() {
        let mut chunks = grid_3x3x3();
        let env = quiet_env();
        let mut ws = MultigridWorkspace::new();
        let stats = simulate(&mut chunks, &env, &mut ws, env.timestep);
        assert!(stats.timings.total() > std::time::Duration::ZERO);
    }
}
