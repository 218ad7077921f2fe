//! Camera-to-projector fit for projector-camera calibration.
//!
//! Given the accepted measurements (camera-space points `(px, py, z)` paired
//! with normalized projector coordinates), [`ReprojectionSolver`] fits the
//! 8-parameter [`CameraMatrix`] with Levenberg-Marquardt and reports the
//! per-point reprojection errors and their RMS.
//!
//! ```no_run
//! use procam_calib_core::InMemoryMeasurementStore;
//! use procam_calib_core::MeasurementStore;
//! use procam_calib_solver::{ReprojectionSolver, SolveOptions};
//!
//! let store = InMemoryMeasurementStore::new();
//! let solver = ReprojectionSolver::new(SolveOptions::default());
//! match solver.solve_snapshot(&store.snapshot()) {
//!     Ok(fit) => println!("rms = {}", fit.rms),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

mod matrix;
mod problem;
mod solve;
mod worker;

pub use matrix::{CameraMatrix, NUM_PARAMS};
pub use solve::{
    reprojection_errors, CancelToken, ReprojectionFit, ReprojectionSolver, SolveError,
    SolveOptions, SolveReport, DEFAULT_INITIAL_PARAMS, MIN_POINTS,
};
pub use worker::SolveWorker;
