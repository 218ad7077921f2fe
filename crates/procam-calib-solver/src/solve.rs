use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use levenberg_marquardt::LevenbergMarquardt;
use log::{info, warn};
use nalgebra::{DMatrix, Point2, Point3, Vector3};
use procam_calib_core::MeasurementSnapshot;
use serde::{Deserialize, Serialize};

use crate::problem::ReprojectionProblem;
use crate::{CameraMatrix, NUM_PARAMS};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Smallest number of correspondences accepted by the solver.
pub const MIN_POINTS: usize = 4;

/// Starting point of the optimization.
pub const DEFAULT_INITIAL_PARAMS: [f64; NUM_PARAMS] = [0.5, 0.5, 0.5, 0.1, 0.5, 0.5, 0.5, 0.1];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("not enough correspondences: {points} < {required}")]
    InsufficientData { points: usize, required: usize },
    #[error("{camera} camera points but {board} board points")]
    LengthMismatch { camera: usize, board: usize },
    #[error("correspondence {index} contains a non-finite coordinate")]
    NonFiniteInput { index: usize },
    #[error("solve cancelled")]
    Cancelled,
    #[error("optimizer did not converge: {termination} (rms {rms})")]
    NotConverged { termination: String, rms: f64 },
    #[error("camera points do not span 3D space (singular value ratio {ratio:.3e})")]
    DegenerateGeometry { ratio: f64 },
    #[error("optimizer produced a non-finite solution")]
    DegenerateSolution,
    #[error("solver worker panicked")]
    WorkerPanicked,
}

/// Levenberg-Marquardt knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Evaluation budget is `patience * (NUM_PARAMS + 1)`.
    pub patience: usize,
    /// Turn a non-successful termination into [`SolveError::NotConverged`].
    pub require_convergence: bool,
    pub initial_params: [f64; NUM_PARAMS],
    /// Smallest accepted ratio between the smallest and largest singular value
    /// of the centered, column-normalized camera points. Points from a single
    /// board pose lie on one plane and fall below it.
    pub degeneracy_tolerance: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 0.0,
            patience: 100,
            require_convergence: false,
            initial_params: DEFAULT_INITIAL_PARAMS,
            degeneracy_tolerance: 1e-3,
        }
    }
}

/// How the optimizer ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub evaluations: usize,
    /// Final value of `0.5 * ‖r‖²`.
    pub objective: f64,
    pub converged: bool,
    pub termination: String,
}

/// Result of a successful solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionFit {
    pub matrix: CameraMatrix,
    /// `sqrt(Σ e² / n)` over the per-point errors.
    pub rms: f64,
    /// Per-correspondence 2D distance `‖A·x_i − board_i‖`.
    pub errors: Vec<f64>,
    pub report: SolveReport,
}

/// Cooperative cancellation flag shared with a running solve.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-point reprojection errors and their RMS.
///
/// The RMS of nothing is undefined, so an empty input is
/// [`SolveError::InsufficientData`].
pub fn reprojection_errors(
    matrix: &CameraMatrix,
    cam: &[Point3<f32>],
    board: &[Point2<f32>],
) -> Result<(Vec<f64>, f64), SolveError> {
    if cam.len() != board.len() {
        return Err(SolveError::LengthMismatch {
            camera: cam.len(),
            board: board.len(),
        });
    }
    if cam.is_empty() {
        return Err(SolveError::InsufficientData {
            points: 0,
            required: 1,
        });
    }
    let errors: Vec<f64> = cam
        .iter()
        .zip(board)
        .map(|(c, b)| {
            let q = matrix.project(c);
            let dx = q.x - b.x as f64;
            let dy = q.y - b.y as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .collect();
    let sum_sq: f64 = errors.iter().map(|e| e * e).sum();
    let rms = (sum_sq / errors.len() as f64).sqrt();
    Ok((errors, rms))
}

/// Fits the camera-to-projector [`CameraMatrix`] to stored correspondences.
#[derive(Clone, Debug, Default)]
pub struct ReprojectionSolver {
    options: SolveOptions,
}

impl ReprojectionSolver {
    pub fn new(options: SolveOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    pub fn solve_snapshot(&self, snapshot: &MeasurementSnapshot) -> Result<ReprojectionFit, SolveError> {
        let (cam, board) = snapshot.flatten();
        self.solve(&cam, &board)
    }

    pub fn solve(
        &self,
        cam: &[Point3<f32>],
        board: &[Point2<f32>],
    ) -> Result<ReprojectionFit, SolveError> {
        self.solve_inner(cam, board, None)
    }

    /// Like [`solve`](Self::solve), but aborts with [`SolveError::Cancelled`]
    /// once `cancel` is set.
    pub fn solve_with_cancel(
        &self,
        cam: &[Point3<f32>],
        board: &[Point2<f32>],
        cancel: &CancelToken,
    ) -> Result<ReprojectionFit, SolveError> {
        self.solve_inner(cam, board, Some(cancel.clone()))
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, cam, board, cancel), fields(points = cam.len()))
    )]
    fn solve_inner(
        &self,
        cam: &[Point3<f32>],
        board: &[Point2<f32>],
        cancel: Option<CancelToken>,
    ) -> Result<ReprojectionFit, SolveError> {
        validate_input(cam, board)?;
        check_geometry(cam, self.options.degeneracy_tolerance)?;
        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SolveError::Cancelled);
        }

        let opts = &self.options;
        let problem = ReprojectionProblem::new(cam, board, &opts.initial_params, cancel.clone());
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.patience.max(1));
        let (problem, report) = lm.minimize(problem);

        if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(SolveError::Cancelled);
        }

        let matrix = CameraMatrix::from_params(&problem.params_array());
        let (errors, rms) = reprojection_errors(&matrix, cam, board)?;
        if !matrix.is_finite() || !rms.is_finite() {
            return Err(SolveError::DegenerateSolution);
        }

        let converged = report.termination.was_successful();
        let termination = format!("{:?}", report.termination);
        if !converged {
            if opts.require_convergence {
                return Err(SolveError::NotConverged { termination, rms });
            }
            warn!("reprojection solve did not converge: {termination}");
        }
        info!(
            "reprojection solve: {} points, rms {:.6}, {} evaluations",
            cam.len(),
            rms,
            report.number_of_evaluations
        );

        Ok(ReprojectionFit {
            matrix,
            rms,
            errors,
            report: SolveReport {
                evaluations: report.number_of_evaluations,
                objective: report.objective_function,
                converged,
                termination,
            },
        })
    }
}

fn validate_input(cam: &[Point3<f32>], board: &[Point2<f32>]) -> Result<(), SolveError> {
    if cam.len() != board.len() {
        return Err(SolveError::LengthMismatch {
            camera: cam.len(),
            board: board.len(),
        });
    }
    if cam.len() < MIN_POINTS {
        return Err(SolveError::InsufficientData {
            points: cam.len(),
            required: MIN_POINTS,
        });
    }
    let finite = |c: &Point3<f32>, b: &Point2<f32>| {
        c.coords.iter().chain(b.coords.iter()).all(|v| v.is_finite())
    };
    if let Some(index) = cam.iter().zip(board).position(|(c, b)| !finite(c, b)) {
        return Err(SolveError::NonFiniteInput { index });
    }
    Ok(())
}

/// Reject point sets whose affine hull is not 3D; the 8 parameters are not
/// identifiable from them.
fn check_geometry(cam: &[Point3<f32>], tolerance: f64) -> Result<(), SolveError> {
    let n = cam.len() as f64;
    let mean = cam
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, p| acc + p.coords.cast::<f64>())
        / n;
    let mut centered = DMatrix::<f64>::from_fn(cam.len(), 3, |r, c| cam[r][c] as f64 - mean[c]);
    for mut column in centered.column_iter_mut() {
        let norm = column.norm();
        if norm <= 0.0 {
            return Err(SolveError::DegenerateGeometry { ratio: 0.0 });
        }
        column /= norm;
    }

    let singular = centered.singular_values();
    let ratio = singular.min() / singular.max();
    if ratio.is_nan() || ratio < tolerance {
        warn!("degenerate calibration geometry: singular value ratio {ratio:.3e}");
        return Err(SolveError::DegenerateGeometry { ratio });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_of_known_errors() {
        let m = CameraMatrix::from_params(&[0.0; NUM_PARAMS]);
        let cam = [Point3::new(1.0, 1.0, 1.0), Point3::new(2.0, 2.0, 2.0)];
        let board = [Point2::new(3.0, 4.0), Point2::new(0.0, 0.0)];
        let (errors, rms) = reprojection_errors(&m, &cam, &board).expect("errors");
        assert_eq!(errors, vec![5.0, 0.0]);
        assert_relative_eq!(rms, (25.0_f64 / 2.0).sqrt());
    }

    #[test]
    fn rms_of_nothing_is_an_error() {
        let m = CameraMatrix::from_params(&[0.0; NUM_PARAMS]);
        assert_eq!(
            reprojection_errors(&m, &[], &[]),
            Err(SolveError::InsufficientData {
                points: 0,
                required: 1
            })
        );
        assert!(matches!(
            reprojection_errors(&m, &[Point3::origin()], &[]),
            Err(SolveError::LengthMismatch { camera: 1, board: 0 })
        ));
    }

    #[test]
    fn input_validation() {
        let solver = ReprojectionSolver::default();
        assert_eq!(
            solver.solve(&[], &[]),
            Err(SolveError::InsufficientData {
                points: 0,
                required: MIN_POINTS
            })
        );
        let cam = vec![Point3::new(1.0, 2.0, 900.0); 5];
        let board = vec![Point2::new(0.5, 0.5); 4];
        assert!(matches!(
            solver.solve(&cam, &board),
            Err(SolveError::LengthMismatch { camera: 5, board: 4 })
        ));
        let mut cam = cam;
        cam.truncate(4);
        cam[2].z = f32::NAN;
        assert_eq!(
            solver.solve(&cam, &board),
            Err(SolveError::NonFiniteInput { index: 2 })
        );
    }

    #[test]
    fn pre_cancelled_token_short_circuits() {
        let cam = vec![
            Point3::new(10.0, 20.0, 900.0),
            Point3::new(30.0, 25.0, 950.0),
            Point3::new(12.0, 60.0, 1000.0),
            Point3::new(50.0, 45.0, 1100.0),
        ];
        let board = vec![Point2::new(0.5, 0.5); 4];
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            ReprojectionSolver::default().solve_with_cancel(&cam, &board, &token),
            Err(SolveError::Cancelled)
        );
    }

    #[test]
    fn options_parse_with_defaults() {
        let opts: SolveOptions =
            serde_json::from_str(r#"{ "patience": 20, "require_convergence": true }"#)
                .expect("parse");
        assert_eq!(opts.patience, 20);
        assert!(opts.require_convergence);
        assert_eq!(opts.initial_params, DEFAULT_INITIAL_PARAMS);
    }
}
