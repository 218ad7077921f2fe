//! Least-squares problem for the 8-parameter camera-to-projector model.
//!
//! Every correspondence contributes three residuals `b0 - u`, `b1 - v` and
//! `b2 - 1`, where `b = A·(x, y, z, 1)` and `A` has the fixed third row
//! `(0, 0, 0, 1)`. The third residual is identically zero; it is kept so the
//! residual vector has the same shape as the homogeneous model.

use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{DMatrix, DVector, Dyn, Owned, Point2, Point3};

use crate::{CancelToken, NUM_PARAMS};

pub(crate) const RESIDUALS_PER_POINT: usize = 3;

#[derive(Clone, Debug)]
pub(crate) struct ReprojectionProblem<'a> {
    cam: &'a [Point3<f32>],
    board: &'a [Point2<f32>],
    params: DVector<f64>,
    cancel: Option<CancelToken>,
}

impl<'a> ReprojectionProblem<'a> {
    /// `cam` and `board` must have equal lengths.
    pub(crate) fn new(
        cam: &'a [Point3<f32>],
        board: &'a [Point2<f32>],
        initial: &[f64; NUM_PARAMS],
        cancel: Option<CancelToken>,
    ) -> Self {
        debug_assert_eq!(cam.len(), board.len());
        Self {
            cam,
            board,
            params: DVector::from_column_slice(initial),
            cancel,
        }
    }

    pub(crate) fn params_array(&self) -> [f64; NUM_PARAMS] {
        let mut out = [0.0; NUM_PARAMS];
        out.copy_from_slice(self.params.as_slice());
        out
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        if self.is_cancelled() {
            return None;
        }
        let p = &self.params;
        let mut r = DVector::zeros(self.cam.len() * RESIDUALS_PER_POINT);
        for (i, (c, b)) in self.cam.iter().zip(self.board).enumerate() {
            let (x, y, z) = (c.x as f64, c.y as f64, c.z as f64);
            let b0 = p[0] * x + p[1] * y + p[2] * z + p[3];
            let b1 = p[4] * x + p[5] * y + p[6] * z + p[7];
            let row = i * RESIDUALS_PER_POINT;
            r[row] = b0 - b.x as f64;
            r[row + 1] = b1 - b.y as f64;
            // b2 = 0·x + 0·y + 0·z + 1
            r[row + 2] = 0.0;
        }
        Some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut j = DMatrix::zeros(self.cam.len() * RESIDUALS_PER_POINT, NUM_PARAMS);
        for (i, c) in self.cam.iter().enumerate() {
            let row = i * RESIDUALS_PER_POINT;
            let h = [c.x as f64, c.y as f64, c.z as f64, 1.0];
            for (k, v) in h.into_iter().enumerate() {
                j[(row, k)] = v;
                j[(row + 1, 4 + k)] = v;
            }
        }
        Some(j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> (Vec<Point3<f32>>, Vec<Point2<f32>>) {
        let cam = vec![
            Point3::new(120.0, 80.0, 950.0),
            Point3::new(300.5, 210.25, 1100.0),
            Point3::new(410.0, 95.0, 870.0),
            Point3::new(55.0, 330.0, 1240.0),
        ];
        let board = vec![
            Point2::new(0.2, 0.3),
            Point2::new(0.5, 0.55),
            Point2::new(0.7, 0.25),
            Point2::new(0.1, 0.8),
        ];
        (cam, board)
    }

    #[test]
    fn three_residuals_per_point_with_zero_third() {
        let (cam, board) = sample();
        let p = [0.5, 0.5, 0.5, 0.1, 0.5, 0.5, 0.5, 0.1];
        let problem = ReprojectionProblem::new(&cam, &board, &p, None);
        let r = problem.residuals().expect("residuals");
        assert_eq!(r.len(), 12);
        for i in 0..4 {
            assert_eq!(r[3 * i + 2], 0.0);
        }
        let expected = 0.5 * 120.0 + 0.5 * 80.0 + 0.5 * 950.0 + 0.1 - 0.2;
        assert_relative_eq!(r[0], expected, epsilon = 1e-6);
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let (cam, board) = sample();
        let p = [1e-3, -2e-4, 5e-5, 0.1, 3e-4, 1e-3, -1e-4, 0.2];
        let mut problem = ReprojectionProblem::new(&cam, &board, &p, None);
        let numerical =
            levenberg_marquardt::differentiate_numerically(&mut problem).expect("numerical");
        let analytic = problem.jacobian().expect("analytic");
        assert_eq!(analytic.shape(), (12, NUM_PARAMS));
        assert_relative_eq!(numerical, analytic, epsilon = 1e-5, max_relative = 1e-6);
    }

    #[test]
    fn cancelled_problem_stops_producing_residuals() {
        let (cam, board) = sample();
        let token = CancelToken::new();
        let problem =
            ReprojectionProblem::new(&cam, &board, &[0.0; NUM_PARAMS], Some(token.clone()));
        assert!(problem.residuals().is_some());
        token.cancel();
        assert!(problem.residuals().is_none());
    }
}
