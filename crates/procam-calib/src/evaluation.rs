//! Per-frame acquisition outcome and the operator-facing status text.

use std::fmt;

use procam_calib_core::{
    AcquisitionParams, BackprojectError, CornerObservation, MeasurementError, PlaneFit,
    PlaneFitError, VarianceError, WindowVariance,
};
use serde::Serialize;

/// First gate a frame failed. Never fatal: the session just waits for the next frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameRejection {
    #[error("pausing after the last measurement")]
    Paused,
    #[error("chessboard not detected")]
    NotDetected,
    #[error("detector returned {found} corners, expected {expected}")]
    CornerCountMismatch { expected: usize, found: usize },
    #[error("incomplete depth: {0}")]
    Depth(BackprojectError),
    #[error("plane fit failed: {0}")]
    PlaneFit(PlaneFitError),
    #[error("chessboard is not planar (R^2 = {r2})")]
    NotPlanar { r2: f64 },
    #[error("stable for {frames}/{required} frames")]
    Stabilizing { frames: usize, required: usize },
    #[error("variance too high (xy {}, z {})", .0.max_xy, .0.max_z)]
    Unstable(WindowVariance),
    #[error(transparent)]
    VarianceUndefined(VarianceError),
    #[error(transparent)]
    Measurement(MeasurementError),
}

/// What happened to one camera frame.
///
/// Flags are cumulative: a flag is only meaningful if all previous ones are set
/// (`detected` → `depth_complete` → `planar` → `enough_frames` → `variance_ok`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameEvaluation {
    pub paused: bool,
    pub detected: bool,
    pub depth_complete: bool,
    pub planar: bool,
    pub plane_fit: Option<PlaneFit>,
    /// Window entries with the current frame's corner count.
    pub frames_matching: usize,
    pub window_size: usize,
    pub enough_frames: bool,
    pub variance: Option<WindowVariance>,
    pub variance_ok: bool,
    /// A new measurement was stored on this frame.
    pub accepted: bool,
    /// Store size after this frame.
    pub measurements: usize,
    /// Backprojected corners, for overlays. Empty unless depth was complete.
    pub observations: Vec<CornerObservation>,
    pub rejection: Option<FrameRejection>,
}

/// Rendering hint for a status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusLine {
    fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    fn flag(ok: bool, text: impl Into<String>) -> Self {
        let kind = if ok {
            StatusKind::Success
        } else {
            StatusKind::Error
        };
        Self::new(kind, text)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FrameEvaluation {
    /// Status messages for the operator, top to bottom.
    ///
    /// The gate messages stop at the first failed gate; the threshold summary
    /// and the measurement count are always appended.
    pub fn status_lines(&self, params: &AcquisitionParams, measurements: usize) -> Vec<StatusLine> {
        let mut lines = Vec::new();
        self.push_gate_lines(params, &mut lines);
        lines.push(StatusLine::new(
            StatusKind::Info,
            format!(
                "Planar threshold {}, variance threshold XY {} Z {}.",
                params.planar_threshold, params.variance_threshold_xy, params.variance_threshold_z
            ),
        ));
        lines.push(StatusLine::new(
            StatusKind::Info,
            format!("Valid measurements: {measurements}"),
        ));
        lines
    }

    fn push_gate_lines(&self, params: &AcquisitionParams, lines: &mut Vec<StatusLine>) {
        if self.paused {
            lines.push(StatusLine::new(
                StatusKind::Info,
                "Pausing before next measurement...",
            ));
            return;
        }

        if !self.detected {
            lines.push(StatusLine::flag(false, "Chess board not detected."));
            return;
        }
        lines.push(StatusLine::flag(true, "Chess board detected."));

        if !self.depth_complete {
            lines.push(StatusLine::flag(false, "Depth data for chess board is incomplete."));
            return;
        }
        lines.push(StatusLine::flag(true, "Depth data complete."));

        let r2 = self
            .plane_fit
            .map_or_else(|| "n/a".to_string(), |fit| fit.r2.to_string());
        if !self.planar {
            lines.push(StatusLine::flag(
                false,
                format!("Chessboard is not planar (R^2 = {r2})."),
            ));
            return;
        }
        lines.push(StatusLine::flag(
            true,
            format!("Chessboard is planar (R^2 = {r2})."),
        ));

        lines.push(StatusLine::flag(
            self.enough_frames,
            format!(
                "Values for {}/{} frames",
                self.frames_matching, params.num_stability_frames
            ),
        ));
        if !self.enough_frames {
            return;
        }

        let Some(var) = self.variance else {
            if let Some(FrameRejection::VarianceUndefined(err)) = &self.rejection {
                lines.push(StatusLine::flag(false, format!("Variance undefined: {err}.")));
            }
            return;
        };
        let head = if self.variance_ok {
            "Variance OK"
        } else {
            "Variance too high"
        };
        lines.push(StatusLine::flag(
            self.variance_ok,
            format!(
                "{head} (xy {} ({}), z {} ({})).",
                var.max_xy, params.variance_threshold_xy, var.max_z, params.variance_threshold_z
            ),
        ));
    }
}
