//! Coordinate types and grid index arithmetic for chunked 3-D fields.
//!
//! A chunk is a cube of cells addressed by a flat index with `x` as the
//! fastest-varying axis. Chunk adjacency uses a 3x3x3 neighborhood flattened
//! to `0..27`, where index 13 is the chunk itself.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Number of slots in the 3x3x3 neighborhood table (center included).
pub const NEIGHBOR_SLOTS: usize = 27;

/// Flat neighborhood index of the chunk itself (`(1,1,1)` in offset space).
pub const NEIGHBOR_CENTER: usize = 13;

/// Chunk coordinate (identifies a chunk in the world grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the coordinate shifted by the given per-axis deltas.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Returns the 26 surrounding chunk coordinates in neighborhood order,
    /// skipping the center slot.
    #[must_use]
    pub fn neighbors(&self) -> Vec<ChunkCoord> {
        let mut out = Vec::with_capacity(NEIGHBOR_SLOTS - 1);
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    out.push(self.offset(dx, dy, dz));
                }
            }
        }
        out
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chunk({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Local cell coordinate within a chunk (0 to dim-1 per axis, border included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct CellCoord {
    /// X coordinate within chunk
    pub x: u16,
    /// Y coordinate within chunk
    pub y: u16,
    /// Z coordinate within chunk
    pub z: u16,
}

impl CellCoord {
    /// Creates a new cell coordinate.
    #[must_use]
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }

    /// Converts to a flat array index for the given chunk dimension.
    #[must_use]
    pub const fn to_index(self, dim: usize) -> usize {
        ix(self.x as usize, self.y as usize, self.z as usize, dim)
    }

    /// Creates from a flat array index for the given chunk dimension.
    #[must_use]
    pub const fn from_index(index: usize, dim: usize) -> Self {
        Self {
            x: (index % dim) as u16,
            y: ((index / dim) % dim) as u16,
            z: (index / (dim * dim)) as u16,
        }
    }
}

/// Flat array index of cell `(x, y, z)` in a `dim`-cubed grid.
///
/// `x` is the fastest-varying axis; all field arrays in the solver use this
/// ordering.
#[must_use]
pub const fn ix(x: usize, y: usize, z: usize, dim: usize) -> usize {
    x + dim * (y + dim * z)
}

/// Flat neighborhood index of offset `(dx, dy, dz)`, each in `-1..=1`.
///
/// The mapping is `(dx+1) + 3*(dy+1) + 9*(dz+1)`, so `(0,0,0)` is
/// [`NEIGHBOR_CENTER`].
#[must_use]
pub const fn neighbor_index(dx: i32, dy: i32, dz: i32) -> usize {
    ((dx + 1) + 3 * (dy + 1) + 9 * (dz + 1)) as usize
}

/// Per-axis offset of a flat neighborhood index, inverse of [`neighbor_index`].
#[must_use]
pub const fn neighbor_offset(index: usize) -> (i32, i32, i32) {
    let i = index as i32;
    (i % 3 - 1, (i / 3) % 3 - 1, i / 9 - 1)
}
