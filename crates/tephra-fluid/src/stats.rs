//! Per-frame simulation telemetry.
//!
//! `simulate` returns a [`FrameStats`] value instead of threading mutable
//! telemetry through the configuration, keeping the `Environment` read-only.

use std::time::{Duration, Instant};

/// Wall-clock duration of each pipeline stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    /// Ghost-flux refresh (serial prerequisite)
    pub ghost_refresh: Duration,
    /// Masked boundary snapshot
    pub snapshot: Duration,
    /// Force injection and buffer flip
    pub forces: Duration,
    /// Velocity diffusion
    pub diffusion: Duration,
    /// First pressure projection
    pub projection_a: Duration,
    /// Semi-Lagrangian advection (velocity)
    pub advection: Duration,
    /// Second pressure projection
    pub projection_b: Duration,
    /// Density add/diffuse/advect/mirror
    pub density: Duration,
    /// Global mass renormalization
    pub renormalize: Duration,
    /// Delta-buffer clear
    pub clear: Duration,
}

impl StageTimings {
    /// Total wall-clock time across all stages.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.ghost_refresh
            + self.snapshot
            + self.forces
            + self.diffusion
            + self.projection_a
            + self.advection
            + self.projection_b
            + self.density
            + self.renormalize
            + self.clear
    }
}

/// Telemetry produced by one `simulate` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Total interior density present when the density step began
    pub existing_density: f32,
    /// Density actually injected from queued sources this frame
    pub new_density: f32,
    /// Ratio applied by the mass renormalization pass
    pub normalization_ratio: f32,
    /// Worst projection residual across chunks this frame
    pub max_projection_residual: f32,
    /// Per-stage wall-clock timings
    pub timings: StageTimings,
}

/// Measures successive stage durations from a single running clock.
#[derive(Debug)]
pub(crate) struct StageTimer {
    last: Instant,
}

impl StageTimer {
    pub(crate) fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Duration since construction or the previous lap.
    pub(crate) fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timer_monotonic() {
        let mut timer = StageTimer::start();
        let a = timer.lap();
        let b = timer.lap();
        assert!(a >= Duration::ZERO);
        assert!(b >= Duration::ZERO);
    }

    #[test]
    fn test_timings_total_sums_stages() {
        let timings = StageTimings {
            diffusion: Duration::from_millis(2),
            advection: Duration::from_millis(3),
            ..StageTimings::default()
        };
        assert_eq!(timings.total(), Duration::from_millis(5));
    }
}
