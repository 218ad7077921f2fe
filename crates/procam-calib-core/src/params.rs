use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DepthBounds, PlanarityCheck};

/// Parameters of the per-frame acquisition gates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParams {
    /// Number of consecutive frames judged together before a measurement is accepted.
    pub num_stability_frames: usize,

    /// Pause after an accepted measurement, in milliseconds. Detection is skipped meanwhile.
    pub measurement_pause_ms: u64,

    /// Smallest valid raw depth sample (inclusive).
    pub depth_min: f32,

    /// Largest valid raw depth sample (inclusive).
    pub depth_max: f32,

    /// Reject frames whose corners do not lie on a plane.
    pub use_planar_condition: bool,

    /// Minimal plane-fit `R²` (exclusive) when `use_planar_condition` is set.
    pub planar_threshold: f64,

    /// Maximal per-corner x/y variance (exclusive) over the stability window, in px².
    pub variance_threshold_xy: f64,

    /// Maximal per-corner depth-normalized z variance (exclusive) over the stability window.
    pub variance_threshold_z: f64,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            num_stability_frames: 10,
            measurement_pause_ms: 2000,
            depth_min: 400.0,
            depth_max: 4000.0,
            use_planar_condition: true,
            planar_threshold: 0.95,
            variance_threshold_xy: 0.5,
            variance_threshold_z: 0.5,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParamsError {
    #[error("num_stability_frames must be >= 1")]
    NoStabilityFrames,
    #[error("invalid depth bounds [{min}, {max}]: need 0 < min <= max, both finite")]
    InvalidDepthBounds { min: f32, max: f32 },
    #[error("{name} must be finite (got {value})")]
    NonFiniteThreshold { name: &'static str, value: f64 },
}

impl AcquisitionParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_stability_frames == 0 {
            return Err(ParamsError::NoStabilityFrames);
        }
        let (min, max) = (self.depth_min, self.depth_max);
        if !min.is_finite() || !max.is_finite() || min <= 0.0 || min > max {
            return Err(ParamsError::InvalidDepthBounds { min, max });
        }
        for (name, value) in [
            ("planar_threshold", self.planar_threshold),
            ("variance_threshold_xy", self.variance_threshold_xy),
            ("variance_threshold_z", self.variance_threshold_z),
        ] {
            if !value.is_finite() {
                return Err(ParamsError::NonFiniteThreshold { name, value });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn depth_bounds(&self) -> DepthBounds {
        DepthBounds {
            min: self.depth_min,
            max: self.depth_max,
        }
    }

    #[inline]
    pub fn planarity(&self) -> PlanarityCheck {
        PlanarityCheck {
            enforce: self.use_planar_condition,
            threshold: self.planar_threshold,
        }
    }

    #[inline]
    pub fn measurement_pause(&self) -> Duration {
        Duration::from_millis(self.measurement_pause_ms)
    }
}
