//! Temporal consensus over the last N accepted corner sets.
//!
//! A measurement is only emitted once every frame of the stability window
//! produced the same number of corners and the per-corner spread over the
//! window is below the configured thresholds. After an acceptance the window
//! is emptied and detection pauses, so two measurements never share frames.

use std::time::{Duration, Instant};

use log::debug;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::{AcquisitionParams, RingBuffer};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Largest per-corner variances over the stability window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowVariance {
    /// Max over corners of the x and y variances, in px².
    pub max_xy: f64,
    /// Max over corners of `Σ((z - mean)² / z) / N`.
    pub max_z: f64,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum VarianceError {
    #[error("depth {value} of corner {corner} is not positive; depth-normalized variance is undefined")]
    NonPositiveDepth { corner: usize, value: f32 },
    #[error("stability window entries have different corner counts")]
    CornerCountMismatch,
}

/// Result of pushing one frame into the [`StabilityAccumulator`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StabilityOutcome {
    /// Window entries whose corner count equals the current frame's (0 for rejected frames).
    pub frames_matching: usize,
    /// Window size N.
    pub window_size: usize,
    /// Every window entry matched the current, non-empty frame.
    pub enough_frames: bool,
    pub variance: Option<WindowVariance>,
    pub variance_error: Option<VarianceError>,
    /// Variance below both thresholds.
    pub variance_ok: bool,
    /// Per-corner mean camera points when the window was accepted.
    pub accepted: Option<Vec<Point3<f32>>>,
}

/// Ring of the last N corner sets plus the post-acceptance pause timer.
#[derive(Clone, Debug)]
pub struct StabilityAccumulator {
    window: RingBuffer<Vec<Point3<f32>>>,
    pause: Duration,
    threshold_xy: f64,
    threshold_z: f64,
    accepted_at: Option<Instant>,
}

impl StabilityAccumulator {
    pub fn new(params: &AcquisitionParams) -> Self {
        Self {
            window: RingBuffer::with_capacity(params.num_stability_frames),
            pause: params.measurement_pause(),
            threshold_xy: params.variance_threshold_xy,
            threshold_z: params.variance_threshold_z,
            accepted_at: None,
        }
    }

    #[inline]
    pub fn window(&self) -> &RingBuffer<Vec<Point3<f32>>> {
        &self.window
    }

    #[inline]
    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// `true` while the pause after the last acceptance has not yet elapsed.
    ///
    /// The pause ends on the first call where strictly more than the pause
    /// length has passed.
    pub fn is_paused(&mut self, now: Instant) -> bool {
        match self.accepted_at {
            Some(at) if now.saturating_duration_since(at) > self.pause => {
                self.accepted_at = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drop the window contents and any running pause.
    pub fn reset(&mut self) {
        self.window.clear();
        self.accepted_at = None;
    }

    /// Push the corners of the current frame (empty if the frame was rejected).
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, corners), fields(n = corners.len()))
    )]
    pub fn push(&mut self, corners: Vec<Point3<f32>>, now: Instant) -> StabilityOutcome {
        let count = corners.len();
        self.window.push(corners);

        let mut outcome = StabilityOutcome {
            window_size: self.window.capacity(),
            ..StabilityOutcome::default()
        };
        if count == 0 {
            return outcome;
        }

        outcome.frames_matching = self.window.iter().filter(|c| c.len() == count).count();
        outcome.enough_frames = outcome.frames_matching == self.window.capacity();
        if !outcome.enough_frames {
            return outcome;
        }

        let entries: Vec<&[Point3<f32>]> = self.window.iter().map(Vec::as_slice).collect();
        let (variance, means) = match window_statistics(&entries) {
            Ok(stats) => stats,
            Err(err) => {
                debug!("stability window rejected: {err}");
                outcome.variance_error = Some(err);
                return outcome;
            }
        };
        outcome.variance = Some(variance);
        outcome.variance_ok =
            variance.max_xy < self.threshold_xy && variance.max_z < self.threshold_z;

        if outcome.variance_ok {
            self.window.clear();
            self.accepted_at = Some(now);
            outcome.accepted = Some(means);
        } else {
            debug!(
                "variance too high (xy {:.4} / {}, z {:.4} / {})",
                variance.max_xy, self.threshold_xy, variance.max_z, self.threshold_z
            );
        }
        outcome
    }
}

/// Per-corner variances and means over equally sized corner sets.
///
/// x and y use the plain population variance; z divides every squared
/// deviation by the raw sample, which weights deep corners down.
pub(crate) fn window_statistics(
    entries: &[&[Point3<f32>]],
) -> Result<(WindowVariance, Vec<Point3<f32>>), VarianceError> {
    let Some(first) = entries.first() else {
        return Ok((WindowVariance::default(), Vec::new()));
    };
    let corners = first.len();
    if entries.iter().any(|e| e.len() != corners) {
        return Err(VarianceError::CornerCountMismatch);
    }

    let n = entries.len() as f64;
    let mut variance = WindowVariance::default();
    let mut means = Vec::with_capacity(corners);

    for i in 0..corners {
        let mut mean = [0.0f64; 3];
        for entry in entries {
            let p = entry[i];
            mean[0] += p.x as f64;
            mean[1] += p.y as f64;
            mean[2] += p.z as f64;
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = [0.0f64; 3];
        for entry in entries {
            let p = entry[i];
            let dx = p.x as f64 - mean[0];
            let dy = p.y as f64 - mean[1];
            let z = p.z as f64;
            if !p.z.is_finite() || p.z <= 0.0 {
                return Err(VarianceError::NonPositiveDepth {
                    corner: i,
                    value: p.z,
                });
            }
            let dz = z - mean[2];
            var[0] += dx * dx;
            var[1] += dy * dy;
            var[2] += dz * dz / z;
        }
        for v in &mut var {
            *v /= n;
        }

        variance.max_xy = variance.max_xy.max(var[0]).max(var[1]);
        variance.max_z = variance.max_z.max(var[2]);
        means.push(Point3::new(mean[0] as f32, mean[1] as f32, mean[2] as f32));
    }

    Ok((variance, means))
}
