//! Core types and utilities for projector-camera calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete camera, corner detector or image type: depth maps
//! are borrowed as [`DepthFrameView`]s and corners arrive as sub-pixel
//! `Point2<f32>` positions.
//!
//! Per-frame flow:
//! 1. [`backproject_corners`] fuses detected corners with the depth map.
//! 2. [`fit_plane`] / [`PlanarityCheck`] score how planar the corner set is.
//! 3. [`StabilityAccumulator`] keeps the last N corner sets and emits a
//!    per-corner mean once the window is saturated and its variance is low.
//! 4. The caller pairs the mean with [`BoardGeometry::board_points`] and hands
//!    the resulting [`Measurement`] to a [`MeasurementStore`].

mod board;
mod depth;
mod logger;
mod measurement;
mod params;
mod plane;
mod ring;
mod stability;

pub use board::{BoardGeometry, BoardGeometryError, BoardRect, InteriorSize};
pub use depth::{
    backproject_corner, backproject_corners, BackprojectError, CandidateFrame, CornerObservation,
    DepthBounds, DepthFrame, DepthFrameView,
};
pub use measurement::{
    InMemoryMeasurementStore, Measurement, MeasurementError, MeasurementSnapshot,
    MeasurementStore, SharedMeasurementStore,
};
pub use params::{AcquisitionParams, ParamsError};
pub use plane::{fit_plane, PlaneFit, PlaneFitError, PlanarityCheck};
pub use ring::RingBuffer;
pub use stability::{StabilityAccumulator, StabilityOutcome, VarianceError, WindowVariance};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_env, LOG_ENV};
