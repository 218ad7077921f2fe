use nalgebra::{Matrix4, Point2, Point3, Vector4};
use serde::{Deserialize, Serialize};

/// Number of free parameters of the camera-to-projector model.
pub const NUM_PARAMS: usize = 8;

/// 4×4 camera-to-projector transform.
///
/// Rows 0 and 1 hold the solved parameters `p0..p3` and `p4..p7`, row 2 is
/// zero and row 3 is `(0, 0, 0, 1)`. Applied to a camera point `(x, y, z, 1)`
/// it yields the normalized projector coordinate in the first two components.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    matrix: Matrix4<f64>,
}

impl CameraMatrix {
    pub fn from_params(p: &[f64; NUM_PARAMS]) -> Self {
        #[rustfmt::skip]
        let matrix = Matrix4::new(
            p[0], p[1], p[2], p[3],
            p[4], p[5], p[6], p[7],
            0.0,  0.0,  0.0,  0.0,
            0.0,  0.0,  0.0,  1.0,
        );
        Self { matrix }
    }

    pub fn params(&self) -> [f64; NUM_PARAMS] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(0, 3)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(1, 3)],
        ]
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// Row-major copy, convenient for shaders and JSON reports.
    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.matrix[(r, c)];
            }
        }
        rows
    }

    /// Map a camera-space point `(px, py, z)` to projector coordinates.
    #[inline]
    pub fn project(&self, p: &Point3<f32>) -> Point2<f64> {
        let h = self.matrix * Vector4::new(p.x as f64, p.y as f64, p.z as f64, 1.0);
        Point2::new(h[0], h[1])
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn layout_and_projection() {
        let p = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let m = CameraMatrix::from_params(&p);
        assert_eq!(m.params(), p);
        let rows = m.to_rows();
        assert_eq!(rows[0], [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rows[1], [5.0, 6.0, 7.0, 8.0]);
        assert_eq!(rows[2], [0.0; 4]);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);

        let q = m.project(&Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(q.x, 10.0);
        assert_relative_eq!(q.y, 26.0);
    }
}
