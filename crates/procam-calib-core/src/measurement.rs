//! Accepted measurements and the store that owns them.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("{camera} camera points but {board} board points")]
    LengthMismatch { camera: usize, board: usize },
}

/// One accepted correspondence set: the per-corner mean camera points and the
/// projector-space board corners they were observed at.
///
/// Both sequences always have the same length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMeasurement")]
pub struct Measurement {
    camera_points: Vec<Point3<f32>>,
    board_points: Vec<Point2<f32>>,
}

#[derive(Deserialize)]
struct RawMeasurement {
    camera_points: Vec<Point3<f32>>,
    board_points: Vec<Point2<f32>>,
}

impl TryFrom<RawMeasurement> for Measurement {
    type Error = MeasurementError;

    fn try_from(raw: RawMeasurement) -> Result<Self, Self::Error> {
        Measurement::new(raw.camera_points, raw.board_points)
    }
}

impl Measurement {
    pub fn new(
        camera_points: Vec<Point3<f32>>,
        board_points: Vec<Point2<f32>>,
    ) -> Result<Self, MeasurementError> {
        if camera_points.len() != board_points.len() {
            return Err(MeasurementError::LengthMismatch {
                camera: camera_points.len(),
                board: board_points.len(),
            });
        }
        Ok(Self {
            camera_points,
            board_points,
        })
    }

    #[inline]
    pub fn camera_points(&self) -> &[Point3<f32>] {
        &self.camera_points
    }

    #[inline]
    pub fn board_points(&self) -> &[Point2<f32>] {
        &self.board_points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.camera_points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.camera_points.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Point3<f32>, &Point2<f32>)> + '_ {
        self.camera_points.iter().zip(self.board_points.iter())
    }
}

/// Owned copy of the store contents, taken atomically with respect to appends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementSnapshot {
    measurements: Vec<Measurement>,
}

impl MeasurementSnapshot {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }

    #[inline]
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Total number of correspondences over all measurements.
    pub fn point_count(&self) -> usize {
        self.measurements.iter().map(Measurement::len).sum()
    }

    /// Parallel camera / board sequences in insertion order.
    pub fn flatten(&self) -> (Vec<Point3<f32>>, Vec<Point2<f32>>) {
        let n = self.point_count();
        let mut cam = Vec::with_capacity(n);
        let mut board = Vec::with_capacity(n);
        for m in &self.measurements {
            cam.extend_from_slice(m.camera_points());
            board.extend_from_slice(m.board_points());
        }
        (cam, board)
    }
}

impl From<Vec<Measurement>> for MeasurementSnapshot {
    fn from(measurements: Vec<Measurement>) -> Self {
        Self::new(measurements)
    }
}

/// Owner of the accepted measurements.
///
/// The acquisition pipeline only ever appends; the operator may drop the last
/// entry or clear everything. Readers work on a [`MeasurementSnapshot`].
pub trait MeasurementStore {
    fn add_measurement(&mut self, measurement: Measurement);

    fn snapshot(&self) -> MeasurementSnapshot;

    /// Remove and return the most recent measurement.
    fn delete_last_measurement(&mut self) -> Option<Measurement>;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All camera points, flattened in insertion order.
    fn cam_points(&self) -> Vec<Point3<f32>> {
        self.snapshot().flatten().0
    }

    /// All board (projector) points, flattened in insertion order.
    fn projector_points(&self) -> Vec<Point2<f32>> {
        self.snapshot().flatten().1
    }
}

/// Plain vector-backed store. Serializes as a JSON array of measurements.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryMeasurementStore {
    measurements: Vec<Measurement>,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }
}

impl From<Vec<Measurement>> for InMemoryMeasurementStore {
    fn from(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }
}

impl MeasurementStore for InMemoryMeasurementStore {
    fn add_measurement(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
        info!(
            "measurement #{} stored ({} points)",
            self.measurements.len(),
            self.measurements.last().map_or(0, Measurement::len)
        );
    }

    fn snapshot(&self) -> MeasurementSnapshot {
        MeasurementSnapshot::new(self.measurements.clone())
    }

    fn delete_last_measurement(&mut self) -> Option<Measurement> {
        self.measurements.pop()
    }

    fn clear(&mut self) {
        self.measurements.clear();
    }

    fn len(&self) -> usize {
        self.measurements.len()
    }
}

/// Cloneable handle to a store shared between threads.
///
/// A panicked writer poisons the lock; the data it guards is still a valid
/// vector of immutable measurements, so the poison is ignored.
#[derive(Clone, Debug, Default)]
pub struct SharedMeasurementStore<S = InMemoryMeasurementStore> {
    inner: Arc<RwLock<S>>,
}

impl<S: MeasurementStore> SharedMeasurementStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: MeasurementStore> MeasurementStore for SharedMeasurementStore<S> {
    fn add_measurement(&mut self, measurement: Measurement) {
        self.write().add_measurement(measurement);
    }

    fn snapshot(&self) -> MeasurementSnapshot {
        self.read().snapshot()
    }

    fn delete_last_measurement(&mut self) -> Option<Measurement> {
        self.write().delete_last_measurement()
    }

    fn clear(&mut self) {
        self.write().clear();
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(offset: f32, n: usize) -> Measurement {
        let cam = (0..n)
            .map(|i| Point3::new(offset + i as f32, offset, 900.0))
            .collect();
        let board = (0..n)
            .map(|i| Point2::new(0.1 * i as f32 + offset, 0.5))
            .collect();
        Measurement::new(cam, board).expect("equal lengths")
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = Measurement::new(vec![Point3::origin(); 3], vec![Point2::origin(); 2])
            .expect_err("mismatch");
        assert_eq!(
            err,
            MeasurementError::LengthMismatch {
                camera: 3,
                board: 2
            }
        );
    }

    #[test]
    fn store_edits_and_flatten_order() {
        let mut store = InMemoryMeasurementStore::new();
        assert!(store.is_empty());
        store.add_measurement(measurement(0.0, 2));
        store.add_measurement(measurement(10.0, 3));
        assert_eq!(store.len(), 2);

        let cam = store.cam_points();
        let proj = store.projector_points();
        assert_eq!(cam.len(), 5);
        assert_eq!(proj.len(), 5);
        assert_eq!(cam[2], Point3::new(10.0, 10.0, 900.0));
        assert_eq!(proj[0], Point2::new(0.0, 0.5));

        let last = store.delete_last_measurement().expect("one left");
        assert_eq!(last.len(), 3);
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
        assert!(store.delete_last_measurement().is_none());
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let mut store = SharedMeasurementStore::new(InMemoryMeasurementStore::new());
        store.add_measurement(measurement(0.0, 4));
        let snap = store.snapshot();
        store.add_measurement(measurement(1.0, 4));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.point_count(), 4);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn shared_store_is_visible_across_threads() {
        let store = SharedMeasurementStore::new(InMemoryMeasurementStore::new());
        let mut writer = store.clone();
        std::thread::spawn(move || writer.add_measurement(measurement(2.0, 2)))
            .join()
            .expect("writer thread");
        assert_eq!(store.len(), 1);
        assert_eq!(store.read().measurements()[0].camera_points()[0].x, 2.0);
    }

    #[test]
    fn json_round_trip_validates_lengths() {
        let store = InMemoryMeasurementStore::from(vec![measurement(0.0, 2)]);
        let json = serde_json::to_string(&store).expect("serialize");
        let back: InMemoryMeasurementStore = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, store);

        let bad = r#"[{ "camera_points": [[1.0, 2.0, 3.0]], "board_points": [] }]"#;
        assert!(serde_json::from_str::<InMemoryMeasurementStore>(bad).is_err());
    }
}
