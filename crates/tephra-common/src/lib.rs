//! # Tephra Common
//!
//! Common types, utilities, and shared abstractions for Project Tephra.
//!
//! This crate provides foundational types used across all Tephra subsystems:
//! - Coordinate types (chunk, cell) and grid index arithmetic
//! - Version information for on-disk formats
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::version::*;
}

pub use prelude::*;
