//! # Tephra Fluid
//!
//! Chunked Eulerian gas simulation for Project Tephra.
//!
//! The world is an unbounded set of fixed-size chunks, each carrying a
//! padded velocity/density grid whose one-cell ghost border mirrors its
//! neighbors. This crate handles:
//! - Chunk field storage and neighbor linking
//! - Ghost-border stitching across chunk seams (the bound solver)
//! - The per-frame simulation pipeline (forces, diffusion, projection,
//!   advection, mass renormalization)
//! - A geometric multigrid Poisson solver for the pressure projection
//! - Chunk snapshot serialization
//!
//! A host drives the simulation by mutating chunk fields (or queuing
//! sources), then calling [`pipeline::simulate`] once per frame:
//!
//! ```
//! use tephra_common::ChunkCoord;
//! use tephra_fluid::prelude::*;
//!
//! let mut chunks = vec![Chunk::new(ChunkCoord::new(0, 0, 0))];
//! link_neighbors(&mut chunks);
//! chunks[0].add_density(8, 8, 8, 1.0);
//!
//! let env = Environment::default();
//! let mut workspace = MultigridWorkspace::new();
//! let stats = simulate(&mut chunks, &env, &mut workspace, env.timestep);
//! assert!(stats.new_density > 0.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod bounds;
pub mod chunk;
pub mod config;
pub mod mask;
pub mod multigrid;
pub mod pipeline;
pub mod snapshot;
pub mod stats;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bounds::{set_bounds_to_value, solve_bounds};
    pub use crate::chunk::*;
    pub use crate::config::Environment;
    pub use crate::mask::*;
    pub use crate::multigrid::MultigridWorkspace;
    pub use crate::pipeline::simulate;
    pub use crate::stats::{FrameStats, StageTimings};
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use tephra_common::ChunkCoord;

    #[test]
    fn test_single_chunk_frame() {
        let mut chunks = vec![Chunk::new(ChunkCoord::new(0, 0, 0))];
        link_neighbors(&mut chunks);
        chunks[0].add_density(8, 8, 8, 2.0);

        let env = Environment::default();
        let mut workspace = MultigridWorkspace::new();
        let stats = simulate(&mut chunks, &env, &mut workspace, env.timestep);

        assert!(stats.new_density > 0.0);
        assert!(stats.normalization_ratio.is_finite());
        assert!(chunks[0].interior_density() > 0.0);
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let mut chunks = vec![Chunk::new(ChunkCoord::new(4, 0, -2))];
        link_neighbors(&mut chunks);
        chunks[0].d[chunk::cell(7, 7, 7)] = 0.6;

        let bytes = snapshot::serialize(&chunks[0]).expect("serialize failed");
        let loaded = snapshot::deserialize(&bytes).expect("deserialize failed");
        assert_eq!(loaded.coord(), ChunkCoord::new(4, 0, -2));
        assert_eq!(loaded.d[chunk::cell(7, 7, 7)], 0.6);
    }
}
