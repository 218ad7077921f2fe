//! Per-frame acquisition loop, store edits and on-demand solve.

use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use nalgebra::Point2;
use procam_calib_core::{
    backproject_corners, fit_plane, AcquisitionParams, BoardGeometry, BoardGeometryError,
    BoardRect, CandidateFrame, InMemoryMeasurementStore, Measurement, MeasurementStore,
    StabilityAccumulator,
};
use procam_calib_solver::{ReprojectionFit, ReprojectionSolver, SolveError, SolveWorker};

use crate::io::{read_measurements, write_measurements, CalibrationConfig, ConfigError, IoError};
use crate::source::{to_gray, CameraSource, CornerDetector};
use crate::{FrameEvaluation, FrameRejection};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("no camera source configured")]
    MissingCamera,
    #[error("no corner detector configured")]
    MissingDetector,
    #[error("no measurement store configured")]
    MissingStore,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session is finalized")]
    Finalized,
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<BoardGeometryError> for SessionError {
    fn from(err: BoardGeometryError) -> Self {
        Self::Config(ConfigError::Board(err))
    }
}

/// Builder for [`CalibrationSession`].
pub struct SessionBuilder<C, D, S = InMemoryMeasurementStore> {
    camera: Option<C>,
    detector: Option<D>,
    store: Option<S>,
    config: CalibrationConfig,
}

impl<C, D, S> Default for SessionBuilder<C, D, S> {
    fn default() -> Self {
        Self {
            camera: None,
            detector: None,
            store: None,
            config: CalibrationConfig::default(),
        }
    }
}

impl<C, D, S> SessionBuilder<C, D, S>
where
    C: CameraSource,
    D: CornerDetector,
    S: MeasurementStore,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(mut self, camera: C) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn detector(mut self, detector: D) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: CalibrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CalibrationSession<C, D, S>, SessionError> {
        let camera = self.camera.ok_or(SessionError::MissingCamera)?;
        let detector = self.detector.ok_or(SessionError::MissingDetector)?;
        let store = self.store.ok_or(SessionError::MissingStore)?;
        self.config.validate()?;

        let CalibrationConfig {
            board,
            acquisition,
            solver,
        } = self.config;
        info!(
            "calibration session: {}x{} squares, {} stability frames",
            board.squares_x, board.squares_y, acquisition.num_stability_frames
        );

        Ok(CalibrationSession {
            camera,
            detector,
            store,
            stability: StabilityAccumulator::new(&acquisition),
            board_points: board.board_points(),
            board,
            params: acquisition,
            solver: ReprojectionSolver::new(solver),
            finalized: false,
        })
    }
}

/// Drives measurement acquisition for one projector/camera pair.
///
/// Each [`update`](Self::update) looks at the latest camera frame and either
/// rejects it at one of the gates (detection, depth, planarity, stability) or,
/// once enough stable frames were collected, stores a new [`Measurement`].
pub struct CalibrationSession<C, D, S = InMemoryMeasurementStore> {
    camera: C,
    detector: D,
    store: S,
    board: BoardGeometry,
    board_points: Vec<Point2<f32>>,
    params: AcquisitionParams,
    solver: ReprojectionSolver,
    stability: StabilityAccumulator,
    finalized: bool,
}

impl<C, D, S> CalibrationSession<C, D, S>
where
    C: CameraSource,
    D: CornerDetector,
    S: MeasurementStore,
{
    /// Evaluate the current frame if the camera has a new one.
    ///
    /// Returns `None` when nothing was evaluated (no new frame, or finalized).
    pub fn update(&mut self) -> Option<FrameEvaluation> {
        self.update_at(Instant::now(), false)
    }

    /// Evaluate the current frame even if the camera reports it as old.
    pub fn force_update(&mut self) -> Option<FrameEvaluation> {
        self.update_at(Instant::now(), true)
    }

    /// [`update`](Self::update) with an explicit clock, for replay and tests.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn update_at(&mut self, now: Instant, force: bool) -> Option<FrameEvaluation> {
        if self.finalized || !(force || self.camera.is_frame_new()) {
            return None;
        }

        let mut eval = FrameEvaluation {
            window_size: self.stability.window_size(),
            ..FrameEvaluation::default()
        };

        if self.stability.is_paused(now) {
            self.stability.push(Vec::new(), now);
            eval.paused = true;
            eval.rejection = Some(FrameRejection::Paused);
            eval.measurements = self.store.len();
            return Some(eval);
        }

        let candidate = self.evaluate_candidate(&mut eval);
        let outcome = self.stability.push(candidate.points_if_ok(), now);
        eval.frames_matching = outcome.frames_matching;
        eval.enough_frames = outcome.enough_frames;
        eval.variance = outcome.variance;
        eval.variance_ok = outcome.variance_ok;

        if eval.rejection.is_none() {
            if let Some(means) = outcome.accepted {
                match Measurement::new(means, self.board_points.clone()) {
                    Ok(measurement) => {
                        self.store.add_measurement(measurement);
                        eval.accepted = true;
                    }
                    Err(err) => {
                        warn!("accepted window does not match the board: {err}");
                        eval.rejection = Some(FrameRejection::Measurement(err));
                    }
                }
            } else if let Some(err) = outcome.variance_error {
                eval.rejection = Some(FrameRejection::VarianceUndefined(err));
            } else if let Some(var) = outcome.variance {
                eval.rejection = Some(FrameRejection::Unstable(var));
            } else {
                eval.rejection = Some(FrameRejection::Stabilizing {
                    frames: outcome.frames_matching,
                    required: outcome.window_size,
                });
            }
        }

        eval.measurements = self.store.len();
        Some(eval)
    }

    /// Detection, backprojection and planarity gates.
    fn evaluate_candidate(&mut self, eval: &mut FrameEvaluation) -> CandidateFrame {
        let mut candidate = CandidateFrame::default();

        let gray = to_gray(self.camera.color_frame());
        let interior = self.board.interior_size();
        let expected = interior.corner_count();
        let corners = match self.detector.detect(&gray, interior) {
            Some(corners) if corners.len() == expected => corners,
            Some(corners) => {
                warn!(
                    "detector returned {} corners, expected {expected}",
                    corners.len()
                );
                eval.rejection = Some(FrameRejection::CornerCountMismatch {
                    expected,
                    found: corners.len(),
                });
                return candidate;
            }
            None => {
                debug!("chessboard not detected");
                eval.rejection = Some(FrameRejection::NotDetected);
                return candidate;
            }
        };
        candidate.detected = true;
        eval.detected = true;

        let bounds = self.params.depth_bounds();
        match backproject_corners(&self.camera.depth_frame(), &corners, bounds) {
            Ok(observations) => candidate.observations = observations,
            Err(err) => {
                debug!("depth incomplete: {err}");
                eval.rejection = Some(FrameRejection::Depth(err));
                return candidate;
            }
        }
        candidate.depth_complete = true;
        eval.depth_complete = true;
        eval.observations = candidate.observations.clone();

        let points: Vec<_> = candidate.observations.iter().map(|o| o.point).collect();
        let fit = fit_plane(&points);
        eval.plane_fit = fit.ok();
        candidate.planar = self.params.planarity().accepts(&fit);
        eval.planar = candidate.planar;
        if !candidate.planar {
            eval.rejection = Some(match fit {
                Ok(fit) => FrameRejection::NotPlanar { r2: fit.r2 },
                Err(err) => FrameRejection::PlaneFit(err),
            });
            debug!("planarity rejected: {:?}", eval.rejection);
        }
        candidate
    }

    /// Freeze acquisition; store edits and board changes are refused until
    /// [`unfinalize`](Self::unfinalize).
    pub fn finalize(&mut self) {
        if !self.finalized {
            info!("calibration finalized with {} measurements", self.store.len());
            self.finalized = true;
        }
    }

    pub fn unfinalize(&mut self) {
        if self.finalized {
            self.finalized = false;
            self.stability.reset();
        }
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_editable(&self) -> Result<(), SessionError> {
        if self.finalized {
            return Err(SessionError::Finalized);
        }
        Ok(())
    }

    pub fn delete_last_measurement(&mut self) -> Result<Option<Measurement>, SessionError> {
        self.ensure_editable()?;
        Ok(self.store.delete_last_measurement())
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.ensure_editable()?;
        self.store.clear();
        Ok(())
    }

    /// Replace the board area. The stability window restarts since the
    /// projected corners move.
    pub fn set_board_area(&mut self, area: BoardRect) -> Result<(), SessionError> {
        self.ensure_editable()?;
        self.board = self.board.with_area(area)?;
        self.board_points = self.board.board_points();
        self.stability.reset();
        Ok(())
    }

    /// Move the board's top-left corner, clamped into the display.
    pub fn move_board_to(&mut self, x: f32, y: f32) -> Result<(), SessionError> {
        let area = self.board.area.moved_to(x, y);
        self.set_board_area(area)
    }

    /// Drag one vertical and one horizontal board edge by `(dx, dy)`.
    pub fn resize_board(
        &mut self,
        dx: f32,
        dy: f32,
        from_left: bool,
        from_top: bool,
    ) -> Result<(), SessionError> {
        let area = self.board.area.resized_by(dx, dy, from_left, from_top);
        self.set_board_area(area)
    }

    /// Fit the camera-to-projector matrix to everything stored so far. The
    /// session keeps no copy of the result.
    pub fn calculate_reprojection_transform(&self) -> Result<ReprojectionFit, SolveError> {
        self.solver.solve_snapshot(&self.store.snapshot())
    }

    /// Run the fit on a worker thread over a snapshot of the store.
    pub fn spawn_solve(&self) -> SolveWorker {
        SolveWorker::spawn(self.solver.clone(), self.store.snapshot())
    }

    pub fn save_measurements(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        write_measurements(&self.store.snapshot(), path)?;
        Ok(())
    }

    /// Replace the stored measurements with those in `path`. Returns how many were loaded.
    pub fn load_measurements(&mut self, path: impl AsRef<Path>) -> Result<usize, SessionError> {
        self.ensure_editable()?;
        let snapshot = read_measurements(path)?;
        self.store.clear();
        for m in snapshot.measurements() {
            self.store.add_measurement(m.clone());
        }
        info!("loaded {} measurements", snapshot.len());
        Ok(snapshot.len())
    }

    #[inline]
    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    #[inline]
    pub fn board_points(&self) -> &[Point2<f32>] {
        &self.board_points
    }

    #[inline]
    pub fn params(&self) -> &AcquisitionParams {
        &self.params
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn camera(&self) -> &C {
        &self.camera
    }

    #[inline]
    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }
}
