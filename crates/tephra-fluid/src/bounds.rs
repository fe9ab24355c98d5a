//! Bound solver: ghost-border stitching across chunk seams.
//!
//! Makes every chunk's ghost border equal to the correct neighbor's interior
//! border (or a boundary-condition constant) for every field that must stay
//! continuous across seams. Faces are resolved before edges and edges before
//! corners, so the most specific rule always lands last on shared cells.

use tephra_common::{neighbor_offset, NEIGHBOR_SLOTS};

use crate::chunk::{cell, Chunk, FieldKind, DIM};
use crate::config::Environment;

/// A slot's boundary class, by how many axes leave the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Face,
    Edge,
    Corner,
}

impl Region {
    fn of(slot: usize) -> Option<Region> {
        let (dx, dy, dz) = neighbor_offset(slot);
        match dx.abs() + dy.abs() + dz.abs() {
            1 => Some(Region::Face),
            2 => Some(Region::Edge),
            3 => Some(Region::Corner),
            _ => None, // center
        }
    }

    /// Divisor spreading an incoming contribution uniformly over the shared
    /// cells: a face is a 2-D plane, an edge a 1-D strip, a corner one cell.
    fn share_divisor(self) -> f32 {
        let span = (DIM - 2) as f32;
        match self {
            Region::Face => span * span,
            Region::Edge => span,
            Region::Corner => 1.0,
        }
    }
}

/// Ghost coordinate range along one axis for a slot offset.
fn ghost_range(offset: i32) -> std::ops::Range<usize> {
    match offset {
        -1 => 0..1,
        1 => DIM - 1..DIM,
        _ => 1..DIM - 1,
    }
}

/// Maps a ghost coordinate to the neighbor's adjacent interior coordinate.
const fn source_coord(ghost: usize, offset: i32) -> usize {
    match offset {
        -1 => DIM - 2,
        1 => 1,
        _ => ghost,
    }
}

/// Fallback fill constant for a field when no neighbor is resident.
fn fallback_value(kind: FieldKind, env: &Environment) -> f32 {
    match kind {
        FieldKind::Bounds => env.closed_bounds_value,
        _ => 0.0,
    }
}

/// Per-cell incoming share for a field, or zero if the field carries none.
fn incoming_share(chunk: &Chunk, kind: FieldKind, slot: usize, region: Region) -> f32 {
    let queued = match kind {
        FieldKind::Density => chunk.incoming_density[slot],
        FieldKind::PressureCache => chunk.incoming_pressure[slot],
        _ => return 0.0,
    };
    queued / region.share_divisor()
}

/// Collects the ghost writes for one chunk and one field into `out` as
/// `(flat index, value)` pairs. Reads only; the caller applies them.
fn collect_ghost_updates(
    chunks: &[Chunk],
    index: usize,
    kind: FieldKind,
    env: &Environment,
    out: &mut Vec<(usize, f32)>,
) {
    let chunk = &chunks[index];
    for region in [Region::Face, Region::Edge, Region::Corner] {
        for slot in 0..NEIGHBOR_SLOTS {
            if Region::of(slot) != Some(region) {
                continue;
            }
            let (dx, dy, dz) = neighbor_offset(slot);
            let neighbor = chunk.neighbor(slot).map(|n| &chunks[n]);
            let share = incoming_share(chunk, kind, slot, region);
            let fill = fallback_value(kind, env);
            for gz in ghost_range(dz) {
                for gy in ghost_range(dy) {
                    for gx in ghost_range(dx) {
                        let value = match neighbor {
                            Some(other) => {
                                let src = cell(
                                    source_coord(gx, dx),
                                    source_coord(gy, dy),
                                    source_coord(gz, dz),
                                );
                                other.field(kind)[src] + share
                            }
                            None => fill,
                        };
                        out.push((cell(gx, gy, gz), value));
                    }
                }
            }
        }
    }
}

/// Rewrites every chunk's ghost border for each continuity field.
///
/// For each of the 6 faces, 12 edges, and 8 corners: copy the neighbor's
/// adjacent interior cells (plus a uniform per-cell share of any queued
/// incoming contribution for density/pressure), or fill with the boundary
/// constant when the neighbor is absent. The copy and fallback branches are
/// mutually exclusive per region. Queued incoming contributions are consumed.
pub fn solve_bounds(chunks: &mut [Chunk], env: &Environment) {
    let mut updates = Vec::with_capacity(DIM * DIM * 6);
    for index in 0..chunks.len() {
        for kind in FieldKind::CONTINUITY {
            updates.clear();
            collect_ghost_updates(chunks, index, kind, env, &mut updates);
            let field = chunks[index].field_mut(kind);
            for &(at, value) in &updates {
                field[at] = value;
            }
        }
        let chunk = &mut chunks[index];
        chunk.incoming_density = [0.0; NEIGHBOR_SLOTS];
        chunk.incoming_pressure = [0.0; NEIGHBOR_SLOTS];
    }
}

/// Fills a field array's ghost border with a constant.
///
/// Plain Dirichlet boundary for callers that want no neighbor stitching,
/// independent of the per-chunk-array protocol above.
pub fn set_bounds_to_value(field: &mut [f32], value: f32) {
    debug_assert_eq!(field.len(), DIM * DIM * DIM);
    for z in 0..DIM {
        for y in 0..DIM {
            for x in 0..DIM {
                let on_border = x == 0
                    || x == DIM - 1
                    || y == 0
                    || y == DIM - 1
                    || z == 0
                    || z == DIM - 1;
                if on_border {
                    field[cell(x, y, z)] = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{link_neighbors, BOUNDS_CLOSED, CELLS};
    use tephra_common::{neighbor_index, ChunkCoord};

    fn linked_pair() -> Vec<Chunk> {
        let mut chunks = vec![
            Chunk::new(ChunkCoord::new(0, 0, 0)),
            Chunk::new(ChunkCoord::new(0, 0, 1)),
        ];
        link_neighbors(&mut chunks);
        chunks
    }

    #[test]
    fn test_face_stitching_is_symmetric() {
        let mut chunks = linked_pair();
        chunks[0].d[cell(1, 1, DIM - 2)] = 0.75;
        chunks[1].d[cell(1, 1, 1)] = 0.25;
        let env = Environment::default();
        solve_bounds(&mut chunks, &env);

        // A's +z ghost reads B's adjacent interior, and vice versa.
        assert_eq!(chunks[0].d[cell(1, 1, DIM - 1)], 0.25);
        assert_eq!(chunks[1].d[cell(1, 1, 0)], 0.75);
    }

    #[test]
    fn test_fallback_fill_constants() {
        let mut chunks = vec![Chunk::new(ChunkCoord::new(0, 0, 0))];
        link_neighbors(&mut chunks);
        chunks[0].d.fill(0.5);
        chunks[0].bounds.fill(0.0);
        let env = Environment::default();
        solve_bounds(&mut chunks, &env);

        // No neighbors: density border cleared, bounds border closed.
        assert_eq!(chunks[0].d[cell(0, 5, 5)], 0.0);
        assert_eq!(chunks[0].d[cell(DIM - 1, 5, 5)], 0.0);
        assert_eq!(chunks[0].bounds[cell(5, 0, 5)], BOUNDS_CLOSED);
        // Interior untouched.
        assert_eq!(chunks[0].d[cell(5, 5, 5)], 0.5);
        assert_eq!(chunks[0].bounds[cell(5, 5, 5)], 0.0);
    }

    #[test]
    fn test_corner_rule_lands_last() {
        // 2x2x2 block: every chunk has face, edge, and corner neighbors at
        // its inner corner. The corner ghost cell must hold the corner
        // neighbor's value, not a face or edge copy.
        let mut chunks = Vec::new();
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    chunks.push(Chunk::new(ChunkCoord::new(x, y, z)));
                }
            }
        }
        link_neighbors(&mut chunks);
        // Chunk 7 is at (1,1,1); its interior corner cell (1,1,1) is the
        // source for chunk 0's ghost corner (DIM-1, DIM-1, DIM-1).
        chunks[7].d[cell(1, 1, 1)] = 0.9;
        let env = Environment::default();
        solve_bounds(&mut chunks, &env);
        assert_eq!(chunks[0].d[cell(DIM - 1, DIM - 1, DIM - 1)], 0.9);
    }

    #[test]
    fn test_incoming_density_share_on_face() {
        let mut chunks = linked_pair();
        let slot = neighbor_index(0, 0, 1);
        let total = 32.0;
        chunks[0].queue_incoming_density(slot, total);
        let env = Environment::default();
        solve_bounds(&mut chunks, &env);

        let per_cell = total / ((DIM - 2) * (DIM - 2)) as f32;
        assert!((chunks[0].d[cell(1, 1, DIM - 1)] - per_cell).abs() < 1e-6);
        assert!((chunks[0].d[cell(DIM - 2, DIM - 2, DIM - 1)] - per_cell).abs() < 1e-6);
        // Consumed after stitching.
        assert_eq!(chunks[0].incoming_density[slot], 0.0);
    }

    #[test]
    fn test_set_bounds_to_value() {
        let mut field = vec![1.0; CELLS];
        set_bounds_to_value(&mut field, 7.0);
        assert_eq!(field[cell(0, 0, 0)], 7.0);
        assert_eq!(field[cell(DIM - 1, 5, 5)], 7.0);
        assert_eq!(field[cell(5, DIM - 1, 5)], 7.0);
        assert_eq!(field[cell(5, 5, 5)], 1.0);
        let border_cells = field.iter().filter(|&&x| x == 7.0).count();
        assert_eq!(border_cells, CELLS - (DIM - 2) * (DIM - 2) * (DIM - 2));
    }

    #[test]
    fn test_concrete_scenario_3x3x3() {
        // 3x3x3 grid, density 1.0 at local (DIM-2, 1, DIM-2) of chunk
        // (0,0,0); chunk (0,0,1)'s ghost at (DIM-2, 1, 0) must read it.
        let mut chunks = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    chunks.push(Chunk::new(ChunkCoord::new(x, y, z)));
                }
            }
        }
        link_neighbors(&mut chunks);
        let origin = chunks
            .iter()
            .position(|c| c.coord() == ChunkCoord::new(0, 0, 0))
            .expect("origin chunk");
        chunks[origin].d[cell(DIM - 2, 1, DIM - 2)] = 1.0;
        let env = Environment::default();
        solve_bounds(&mut chunks, &env);
        let above = chunks
            .iter()
            .position(|c| c.coord() == ChunkCoord::new(0, 0, 1))
            .expect("+z neighbor");
        assert_eq!(chunks[above].d[cell(DIM - 2, 1, 0)], 1.0);
    }
}
