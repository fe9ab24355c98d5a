//! Solver configuration.
//!
//! The `Environment` carries the read-only tunables of the simulation. It is
//! deliberately separate from per-frame outputs: `simulate` returns a
//! [`crate::stats::FrameStats`] instead of writing telemetry back here.
//! Configuration can be loaded from and saved to a TOML file.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use tephra_common::{TephraError, TephraResult};

/// Configuration file name.
const CONFIG_FILE: &str = "tephra.toml";

/// Simulation tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    // === Forces ===
    /// Gravity acceleration, applied to the velocity deltas each frame.
    /// Only the y component is used by the force stage.
    pub gravity: Vec3,

    // === Material constants ===
    /// Velocity diffusion (viscosity) constant
    pub viscosity: f32,
    /// Density diffusion constant
    pub diffusion: f32,

    // === Integration ===
    /// Simulation timestep in seconds (hosts may override per call)
    pub timestep: f32,
    /// Near-edge clamp margin for semi-Lagrangian back-traces, in cells.
    /// Keeps interpolation weights away from degenerate border stencils.
    pub advection_margin: f32,

    // === Projection solver ===
    /// Residual norm below which the projection solve stops early
    pub projection_tolerance: f32,
    /// V-cycle budget per projection solve
    pub projection_max_cycles: u32,

    // === Boundary conditions ===
    /// Obstacle value written into the bounds ghost border where no neighbor
    /// is resident; marks chunk edges as closed.
    pub closed_bounds_value: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.8, 0.0),
            viscosity: 1.0e-4,
            diffusion: 1.0e-5,
            timestep: 1.0 / 60.0,
            advection_margin: 0.5,
            projection_tolerance: 1.0e-3,
            projection_max_cycles: 20,
            closed_bounds_value: crate::chunk::BOUNDS_CLOSED,
        }
    }
}

impl Environment {
    /// Load configuration from the default file location.
    /// Returns default config if the file doesn't exist.
    #[must_use]
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}, using defaults");
                    return Self::default();
                }
                match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        warn!("Failed to parse config file: {e}, using defaults");
                        Self::default()
                    }
                }
            }
            Err(e) => {
                warn!("Failed to open config file: {e}, using defaults");
                Self::default()
            }
        }
    }

    /// Save configuration to the default file location.
    pub fn save(&self) -> TephraResult<()> {
        self.save_to(Self::config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> TephraResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| TephraError::Config(e.to_string()))?;
        let mut file = fs::File::create(path.as_ref())?;
        file.write_all(contents.as_bytes())?;
        info!("Saved config to {}", path.as_ref().display());
        Ok(())
    }

    /// Default configuration file path (current directory).
    #[must_use]
    pub fn config_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE)
    }
}
