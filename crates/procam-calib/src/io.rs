//! JSON configuration, measurement files and solve reports.

use std::{fs, path::Path};

use procam_calib_core::{
    AcquisitionParams, BoardGeometry, BoardGeometryError, MeasurementSnapshot, ParamsError,
};
use procam_calib_solver::{ReprojectionFit, SolveOptions};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Board(#[from] BoardGeometryError),
    #[error(transparent)]
    Acquisition(#[from] ParamsError),
}

/// Everything a calibration session is configured with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub board: BoardGeometry,
    pub acquisition: AcquisitionParams,
    pub solver: SolveOptions,
}

impl CalibrationConfig {
    /// Load a JSON config from disk. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board.validate()?;
        self.acquisition.validate()?;
        Ok(())
    }
}

/// Read measurements saved with [`write_measurements`].
pub fn read_measurements(path: impl AsRef<Path>) -> Result<MeasurementSnapshot, IoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Save measurements as a JSON array of `{ camera_points, board_points }`.
pub fn write_measurements(
    snapshot: &MeasurementSnapshot,
    path: impl AsRef<Path>,
) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json)?;
    Ok(())
}

/// Result of an offline solve, as written by the CLI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub measurements: usize,
    pub points: usize,
    /// Row-major camera-to-projector matrix.
    pub matrix: [[f64; 4]; 4],
    pub fit: ReprojectionFit,
}

impl CalibrationReport {
    pub fn new(snapshot: &MeasurementSnapshot, fit: ReprojectionFit) -> Self {
        Self {
            measurements: snapshot.len(),
            points: snapshot.point_count(),
            matrix: fit.matrix.to_rows(),
            fit,
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
