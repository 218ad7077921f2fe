use approx::assert_relative_eq;
use nalgebra::{Point2, Point3};
use procam_calib_core::{InMemoryMeasurementStore, Measurement, MeasurementStore};
use procam_calib_solver::{
    CameraMatrix, ReprojectionSolver, SolveError, SolveOptions, SolveWorker, MIN_POINTS,
    NUM_PARAMS,
};

const TRUTH: [f64; 8] = [1.2e-3, 1.0e-4, -2.0e-4, 0.3, -5.0e-5, 1.5e-3, 1.0e-4, 0.1];

/// Camera points spread over the image and a range of depths, not on one plane.
fn synthetic(
    truth: &CameraMatrix,
    rows: usize,
    offset: f32,
) -> (Vec<Point3<f32>>, Vec<Point2<f32>>) {
    let mut cam = Vec::new();
    let mut board = Vec::new();
    for j in 0..rows {
        for i in 0..6 {
            let k = (j * 6 + i) as f32;
            let x = 60.0 + 90.0 * i as f32 + offset;
            let y = 50.0 + 70.0 * j as f32 - offset;
            let z = 900.0 + 180.0 * (0.7 * k).sin() + 2.0 * offset;
            let c = Point3::new(x, y, z);
            let b = truth.project(&c);
            cam.push(c);
            board.push(Point2::new(b.x as f32, b.y as f32));
        }
    }
    (cam, board)
}

fn store_with(truth: &CameraMatrix, count: usize) -> InMemoryMeasurementStore {
    let mut store = InMemoryMeasurementStore::new();
    for m in 0..count {
        let (cam, board) = synthetic(truth, 4, 13.0 * m as f32);
        store.add_measurement(Measurement::new(cam, board).expect("equal lengths"));
    }
    store
}

#[test]
fn recovers_a_known_matrix() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 3);

    let fit = ReprojectionSolver::default()
        .solve_snapshot(&store.snapshot())
        .expect("solve");

    assert_eq!(fit.errors.len(), 72);
    assert!(fit.rms < 1e-5, "rms = {}", fit.rms);
    assert!(fit.report.evaluations > 0);
    for (got, want) in fit.matrix.params().iter().zip(TRUTH) {
        assert_relative_eq!(*got, want, epsilon = 1e-5);
    }
    let rows = fit.matrix.to_rows();
    assert_eq!(rows[2], [0.0; 4]);
    assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn empty_store_is_insufficient() {
    let store = InMemoryMeasurementStore::new();
    assert_eq!(
        ReprojectionSolver::default().solve_snapshot(&store.snapshot()),
        Err(SolveError::InsufficientData {
            points: 0,
            required: MIN_POINTS
        })
    );
}

#[test]
fn worker_matches_inline_solve() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 2);
    let solver = ReprojectionSolver::new(SolveOptions::default());

    let inline = solver.solve_snapshot(&store.snapshot()).expect("inline");
    let worker = SolveWorker::spawn(solver, store.snapshot());
    let threaded = worker.join().expect("worker");
    assert_eq!(inline, threaded);
}

#[test]
fn fit_serializes_to_json() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 1);
    let fit = ReprojectionSolver::default()
        .solve_snapshot(&store.snapshot())
        .expect("solve");
    let json = serde_json::to_value(&fit).expect("serialize");
    assert!(json.get("rms").is_some());
    assert!(json.get("matrix").is_some());
    assert_eq!(json["errors"].as_array().map(Vec::len), Some(24));
}

#[test]
fn single_board_pose_is_degenerate() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let mut cam = Vec::new();
    let mut board = Vec::new();
    for j in 0..4 {
        for i in 0..6 {
            let x = 60.0 + 90.0 * i as f32;
            let y = 50.0 + 70.0 * j as f32;
            let c = Point3::new(x, y, 900.0 + 0.5 * x - 0.2 * y);
            let b = truth.project(&c);
            cam.push(c);
            board.push(Point2::new(b.x as f32, b.y as f32));
        }
    }
    let mut store = InMemoryMeasurementStore::new();
    store.add_measurement(Measurement::new(cam, board).expect("equal lengths"));

    match ReprojectionSolver::default().solve_snapshot(&store.snapshot()) {
        Err(SolveError::DegenerateGeometry { ratio }) => assert!(ratio < 1e-3, "ratio = {ratio}"),
        other => panic!("expected degenerate geometry, got {other:?}"),
    }
}

#[test]
fn exhausted_budget_is_reported() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 2);
    let tight = SolveOptions {
        ftol: 0.0,
        xtol: 0.0,
        gtol: 0.0,
        patience: 1,
        ..SolveOptions::default()
    };

    let fit = ReprojectionSolver::new(tight.clone())
        .solve_snapshot(&store.snapshot())
        .expect("best effort");
    assert!(!fit.report.converged, "termination {}", fit.report.termination);

    let strict = SolveOptions {
        require_convergence: true,
        ..tight
    };
    assert!(matches!(
        ReprojectionSolver::new(strict).solve_snapshot(&store.snapshot()),
        Err(SolveError::NotConverged { .. })
    ));
}

#[test]
fn non_finite_start_is_a_degenerate_solution() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 2);
    let options = SolveOptions {
        initial_params: [f64::NAN; NUM_PARAMS],
        ..SolveOptions::default()
    };
    assert_eq!(
        ReprojectionSolver::new(options).solve_snapshot(&store.snapshot()),
        Err(SolveError::DegenerateSolution)
    );
}

#[test]
fn running_worker_can_be_cancelled() {
    let truth = CameraMatrix::from_params(&TRUTH);
    let store = store_with(&truth, 2000);

    let worker = SolveWorker::spawn(ReprojectionSolver::default(), store.snapshot());
    worker.cancel();
    assert!(worker.cancel_token().is_cancelled());
    assert_eq!(worker.join(), Err(SolveError::Cancelled));
    assert_eq!(store.len(), 2000);
}
