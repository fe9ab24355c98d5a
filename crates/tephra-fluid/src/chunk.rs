//! Per-chunk field storage for the chunked gas solver.
//!
//! A chunk covers `N` = 16 interior cells per axis, padded to `DIM` = 18 with
//! a one-cell ghost border. The ghost border never holds authoritative state:
//! it is rewritten every frame from a neighbor's interior (or a fallback
//! constant) by the bound solver before anything reads it.
//!
//! Chunks reference their neighbors through a 27-slot table of indices into
//! the caller's chunk slice (3x3x3 neighborhood, slot 13 = self). A chunk
//! never writes through a neighbor slot; cross-chunk reads copy the needed
//! border plane out before mutating local ghosts.

use ahash::AHashMap;
use tracing::{debug, warn};

use tephra_common::{ix, neighbor_offset, ChunkCoord, NEIGHBOR_CENTER, NEIGHBOR_SLOTS};

use crate::mask::compute_mask;

/// Interior cells per axis.
pub const N: usize = 16;

/// Cells per axis including the one-cell ghost border on each side.
pub const DIM: usize = N + 2;

/// Total cells per field array (interior + ghost border).
pub const CELLS: usize = DIM * DIM * DIM;

/// Upper clamp for density values; density always stays in `[0, DENSITY_MAX]`.
pub const DENSITY_MAX: f32 = 1.0;

/// Symmetric clamp for cached pressure values.
pub const PRESSURE_CLAMP: f32 = 1000.0;

/// Obstacle marker written into the bounds ghost border when no neighbor is
/// resident: the chunk edge behaves as closed.
pub const BOUNDS_CLOSED: f32 = 1000.0;

/// Flat array index of cell `(x, y, z)` within a chunk field.
#[must_use]
pub const fn cell(x: usize, y: usize, z: usize) -> usize {
    ix(x, y, z, DIM)
}

/// Identifies one of the per-chunk field arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Density
    Density,
    /// Density delta (source/previous-frame buffer)
    DensityDelta,
    /// X velocity
    VelX,
    /// Y velocity
    VelY,
    /// Z velocity
    VelZ,
    /// X velocity delta
    VelXDelta,
    /// Y velocity delta
    VelYDelta,
    /// Z velocity delta
    VelZDelta,
    /// Obstacle markers (>0 = solid)
    Bounds,
    /// Previous projection's divergence
    DivergenceCache,
    /// Previous projection's pressure potential
    PressureCache,
}

impl FieldKind {
    /// The fields that must stay continuous across chunk seams, in the order
    /// the bound solver stitches them.
    pub const CONTINUITY: [FieldKind; 8] = [
        FieldKind::Density,
        FieldKind::DensityDelta,
        FieldKind::VelXDelta,
        FieldKind::VelYDelta,
        FieldKind::VelZDelta,
        FieldKind::DivergenceCache,
        FieldKind::PressureCache,
        FieldKind::Bounds,
    ];
}

/// One cubic unit of the simulated field set.
///
/// All arrays are `CELLS` long and owned exclusively by the chunk; neighbor
/// slots are read-only references (by slice index) into sibling chunks.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Density
    pub d: Vec<f32>,
    /// Density delta
    pub d0: Vec<f32>,
    /// X velocity
    pub u: Vec<f32>,
    /// Y velocity
    pub v: Vec<f32>,
    /// Z velocity
    pub w: Vec<f32>,
    /// X velocity delta
    pub u0: Vec<f32>,
    /// Y velocity delta
    pub v0: Vec<f32>,
    /// Z velocity delta
    pub w0: Vec<f32>,
    /// Obstacle markers (>0 = solid)
    pub bounds: Vec<f32>,
    /// Divergence computed by the last projection pass
    pub divergence_cache: Vec<f32>,
    /// Pressure potential computed by the last projection pass
    pub pressure_cache: Vec<f32>,

    /// Scratch: masked density working buffer
    pub d_temp: Vec<f32>,
    /// Scratch: masked x-velocity working buffer
    pub u_temp: Vec<f32>,
    /// Scratch: masked y-velocity working buffer
    pub v_temp: Vec<f32>,
    /// Scratch: masked z-velocity working buffer
    pub w_temp: Vec<f32>,
    /// Scratch: masked pressure working buffer
    pub pressure_temp: Vec<f32>,

    /// Incoming density contributions queued per neighbor slot, distributed
    /// over the shared border by the bound solver.
    pub incoming_density: [f32; NEIGHBOR_SLOTS],
    /// Incoming pressure contributions queued per neighbor slot.
    pub incoming_pressure: [f32; NEIGHBOR_SLOTS],

    /// Bitmask of resident neighbors; bit `i` set iff `neighbors[i]` is set.
    pub chunk_mask: u32,

    /// Residual norm reported by the last projection solve.
    pub projection_residual: f32,
    /// V-cycle count used by the last projection solve.
    pub projection_iterations: u32,

    /// Simulation level-of-detail hint. Reserved: the solver currently runs
    /// every chunk at full resolution.
    pub lod: u8,

    coord: ChunkCoord,
    neighbors: [Option<usize>; NEIGHBOR_SLOTS],
}

impl Chunk {
    /// Creates a zero-initialized chunk with all scratch caches allocated and
    /// every neighbor slot empty.
    ///
    /// Linking neighbor slots is the owner's responsibility (see
    /// [`link_neighbors`]), done once per topology change, not per frame.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        debug!("Allocating chunk {coord}");
        Self {
            d: vec![0.0; CELLS],
            d0: vec![0.0; CELLS],
            u: vec![0.0; CELLS],
            v: vec![0.0; CELLS],
            w: vec![0.0; CELLS],
            u0: vec![0.0; CELLS],
            v0: vec![0.0; CELLS],
            w0: vec![0.0; CELLS],
            bounds: vec![0.0; CELLS],
            divergence_cache: vec![0.0; CELLS],
            pressure_cache: vec![0.0; CELLS],
            d_temp: vec![0.0; CELLS],
            u_temp: vec![0.0; CELLS],
            v_temp: vec![0.0; CELLS],
            w_temp: vec![0.0; CELLS],
            pressure_temp: vec![0.0; CELLS],
            incoming_density: [0.0; NEIGHBOR_SLOTS],
            incoming_pressure: [0.0; NEIGHBOR_SLOTS],
            chunk_mask: 0,
            projection_residual: 0.0,
            projection_iterations: 0,
            lod: 0,
            coord,
            neighbors: [None; NEIGHBOR_SLOTS],
        }
    }

    /// Returns the chunk's world coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Returns the neighbor slot table.
    #[must_use]
    pub const fn neighbors(&self) -> &[Option<usize>; NEIGHBOR_SLOTS] {
        &self.neighbors
    }

    /// Returns the slice index stored in the given neighbor slot.
    ///
    /// Absence means "no neighbor currently resident here", not "neighbor is
    /// empty of fluid".
    #[must_use]
    pub fn neighbor(&self, slot: usize) -> Option<usize> {
        self.neighbors.get(slot).copied().flatten()
    }

    /// Returns whether slot 13 has been wired to the chunk's own index.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.neighbors[NEIGHBOR_CENTER].is_some()
    }

    /// Wires one neighbor slot and keeps `chunk_mask` in agreement.
    ///
    /// The center slot may only be set, never cleared: slot 13 must refer to
    /// the chunk itself once linked.
    pub fn set_neighbor(&mut self, slot: usize, index: Option<usize>) {
        if slot == NEIGHBOR_CENTER && index.is_none() && self.neighbors[slot].is_some() {
            warn!("Refusing to clear center slot of chunk {}", self.coord);
            return;
        }
        self.neighbors[slot] = index;
        self.chunk_mask = compute_mask(&self.neighbors);
    }

    /// Returns the field array for `kind`.
    #[must_use]
    pub fn field(&self, kind: FieldKind) -> &[f32] {
        match kind {
            FieldKind::Density => &self.d,
            FieldKind::DensityDelta => &self.d0,
            FieldKind::VelX => &self.u,
            FieldKind::VelY => &self.v,
            FieldKind::VelZ => &self.w,
            FieldKind::VelXDelta => &self.u0,
            FieldKind::VelYDelta => &self.v0,
            FieldKind::VelZDelta => &self.w0,
            FieldKind::Bounds => &self.bounds,
            FieldKind::DivergenceCache => &self.divergence_cache,
            FieldKind::PressureCache => &self.pressure_cache,
        }
    }

    /// Returns the mutable field array for `kind`.
    pub fn field_mut(&mut self, kind: FieldKind) -> &mut [f32] {
        match kind {
            FieldKind::Density => &mut self.d,
            FieldKind::DensityDelta => &mut self.d0,
            FieldKind::VelX => &mut self.u,
            FieldKind::VelY => &mut self.v,
            FieldKind::VelZ => &mut self.w,
            FieldKind::VelXDelta => &mut self.u0,
            FieldKind::VelYDelta => &mut self.v0,
            FieldKind::VelZDelta => &mut self.w0,
            FieldKind::Bounds => &mut self.bounds,
            FieldKind::DivergenceCache => &mut self.divergence_cache,
            FieldKind::PressureCache => &mut self.pressure_cache,
        }
    }

    /// Queues a density source at an interior cell, to be integrated by the
    /// next frame's density step.
    ///
    /// Out-of-range coordinates are diagnosed and dropped; insertion never
    /// fails a frame.
    pub fn add_density(&mut self, x: usize, y: usize, z: usize, amount: f32) {
        if !interior(x, y, z) {
            warn!(
                "Dropping density insertion at ({x}, {y}, {z}) outside interior of chunk {}",
                self.coord
            );
            return;
        }
        self.d0[cell(x, y, z)] += amount;
    }

    /// Queues a velocity impulse at an interior cell.
    pub fn add_velocity(&mut self, x: usize, y: usize, z: usize, du: f32, dv: f32, dw: f32) {
        if !interior(x, y, z) {
            warn!(
                "Dropping velocity insertion at ({x}, {y}, {z}) outside interior of chunk {}",
                self.coord
            );
            return;
        }
        let i = cell(x, y, z);
        self.u0[i] += du;
        self.v0[i] += dv;
        self.w0[i] += dw;
    }

    /// Queues an incoming density contribution for the border shared with the
    /// given neighbor slot. The bound solver distributes and consumes it.
    pub fn queue_incoming_density(&mut self, slot: usize, amount: f32) {
        if slot < NEIGHBOR_SLOTS && slot != NEIGHBOR_CENTER {
            self.incoming_density[slot] += amount;
        }
    }

    /// Queues an incoming pressure contribution for the border shared with
    /// the given neighbor slot.
    pub fn queue_incoming_pressure(&mut self, slot: usize, amount: f32) {
        if slot < NEIGHBOR_SLOTS && slot != NEIGHBOR_CENTER {
            self.incoming_pressure[slot] += amount;
        }
    }

    /// Sums density over the interior (ghost cells excluded; they are views
    /// of neighbor state and would double-count).
    #[must_use]
    pub fn interior_density(&self) -> f32 {
        let mut total = 0.0;
        for z in 1..DIM - 1 {
            for y in 1..DIM - 1 {
                for x in 1..DIM - 1 {
                    total += self.d[cell(x, y, z)];
                }
            }
        }
        total
    }
}

/// Returns whether `(x, y, z)` addresses an interior (non-ghost) cell.
#[must_use]
pub const fn interior(x: usize, y: usize, z: usize) -> bool {
    x >= 1 && x < DIM - 1 && y >= 1 && y < DIM - 1 && z >= 1 && z < DIM - 1
}

/// Wires every chunk's neighbor table from its world coordinate.
///
/// Run once per topology change (chunk residency gain/loss), not per frame.
/// Slot 13 of each chunk is set to its own slice index; `chunk_mask` is
/// recomputed so bit `i` agrees with slot `i`. Duplicate coordinates are
/// diagnosed and the later chunk left unlinked.
pub fn link_neighbors(chunks: &mut [Chunk]) {
    let mut by_coord: AHashMap<ChunkCoord, usize> = AHashMap::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        if by_coord.insert(chunk.coord, index).is_some() {
            warn!("Duplicate chunk coordinate {} in chunk set", chunk.coord);
        }
    }
    for index in 0..chunks.len() {
        let coord = chunks[index].coord;
        if by_coord.get(&coord) != Some(&index) {
            continue; // duplicate loser stays unlinked
        }
        let mut slots = [None; NEIGHBOR_SLOTS];
        for (slot, entry) in slots.iter_mut().enumerate() {
            let (dx, dy, dz) = neighbor_offset(slot);
            *entry = by_coord.get(&coord.offset(dx, dy, dz)).copied();
        }
        slots[NEIGHBOR_CENTER] = Some(index);
        let chunk = &mut chunks[index];
        chunk.neighbors = slots;
        chunk.chunk_mask = compute_mask(&chunk.neighbors);
        debug!("Linked chunk {} with mask {:#029b}", coord, chunk.chunk_mask);
    }
}
