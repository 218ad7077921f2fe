//! Projector-camera calibration with a color + depth camera.
//!
//! A chessboard is projected into the scene. For every camera frame the
//! [`CalibrationSession`] detects the board corners, lifts them into camera
//! space with the depth map, checks that they are planar and stable over the
//! last N frames and, if so, stores a measurement pairing the mean camera
//! points with the known projector coordinates of the corners. Once enough
//! measurements were collected, the camera-to-projector matrix is fitted with
//! Levenberg-Marquardt.
//!
//! ## Quickstart
//!
//! ```no_run
//! use image::GrayImage;
//! use nalgebra::Point2;
//! use procam_calib::core::{DepthFrame, InMemoryMeasurementStore, InteriorSize};
//! use procam_calib::{CalibrationConfig, RecordedFrame, SessionBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = RecordedFrame::new(image::RgbImage::new(640, 480), DepthFrame::filled(640, 480, 1000.0));
//! let detector = |_gray: &GrayImage, _interior: InteriorSize| -> Option<Vec<Point2<f32>>> { None };
//!
//! let mut session = SessionBuilder::new()
//!     .camera(frame)
//!     .detector(detector)
//!     .store(InMemoryMeasurementStore::new())
//!     .config(CalibrationConfig::default())
//!     .build()?;
//!
//! if let Some(eval) = session.update() {
//!     for line in eval.status_lines(session.params(), eval.measurements) {
//!         println!("{line}");
//!     }
//! }
//! let fit = session.calculate_reprojection_transform();
//! println!("{fit:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `procam_calib::core`: board geometry, depth backprojection, plane fit,
//!   stability window, measurements and stores.
//! - `procam_calib::solver`: camera matrix, reprojection solver, solve worker.
//! - [`CalibrationSession`]: the per-frame pipeline.
//! - [`CalibrationConfig`]: JSON configuration.

pub use procam_calib_core as core;
pub use procam_calib_solver as solver;

pub use procam_calib_core::{
    AcquisitionParams, BoardGeometry, BoardRect, InMemoryMeasurementStore, Measurement,
    MeasurementStore, SharedMeasurementStore,
};
pub use procam_calib_solver::{
    CameraMatrix, CancelToken, ReprojectionFit, ReprojectionSolver, SolveError, SolveOptions,
    SolveWorker,
};

mod evaluation;
mod io;
mod session;
mod source;

pub use evaluation::{FrameEvaluation, FrameRejection, StatusKind, StatusLine};
pub use io::{
    read_measurements, write_measurements, CalibrationConfig, CalibrationReport, ConfigError,
    IoError,
};
pub use session::{CalibrationSession, SessionBuilder, SessionError};
pub use source::{to_gray, CameraSource, CornerDetector, RecordedFrame};
