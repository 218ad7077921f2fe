//! Least-squares plane fit used to check that the observed board is flat.

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Plane `z = a*x + b*y + c` with its coefficient of determination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// `1 - SSres / SStot`.
    pub r2: f64,
}

impl PlaneFit {
    #[inline]
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum PlaneFitError {
    #[error("no points to fit")]
    Empty,
    #[error("plane normal equations are singular")]
    Singular,
    /// The normal equations were solved but every `z` is identical, so `R²` is undefined.
    #[error("all depths are equal; R^2 is undefined")]
    ZeroDepthSpread,
}

/// Ordinary least-squares fit of `z ≈ a*x + b*y + c` through the normal equations.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(points), fields(n = points.len()))
)]
pub fn fit_plane(points: &[Point3<f32>]) -> Result<PlaneFit, PlaneFitError> {
    if points.is_empty() {
        return Err(PlaneFitError::Empty);
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_z = 0.0;
    let mut sum_x2 = 0.0;
    let mut sum_y2 = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xz = 0.0;
    let mut sum_yz = 0.0;
    for p in points {
        let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
        sum_x += x;
        sum_y += y;
        sum_z += z;
        sum_x2 += x * x;
        sum_y2 += y * y;
        sum_xy += x * y;
        sum_xz += x * z;
        sum_yz += y * z;
    }
    let n = points.len() as f64;

    let lhs = Matrix3::new(
        sum_x2, sum_xy, sum_x, //
        sum_xy, sum_y2, sum_y, //
        sum_x, sum_y, n,
    );
    let rhs = Vector3::new(sum_xz, sum_yz, sum_z);
    let coeffs = lhs.lu().solve(&rhs).ok_or(PlaneFitError::Singular)?;
    if !coeffs.iter().all(|v| v.is_finite()) {
        return Err(PlaneFitError::Singular);
    }
    let (a, b, c) = (coeffs[0], coeffs[1], coeffs[2]);

    let mean_z = sum_z / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for p in points {
        let z = p.z as f64;
        let tot = z - mean_z;
        ss_tot += tot * tot;
        let res = z - (a * p.x as f64 + b * p.y as f64 + c);
        ss_res += res * res;
    }

    if ss_tot <= 0.0 {
        return Err(PlaneFitError::ZeroDepthSpread);
    }

    Ok(PlaneFit {
        a,
        b,
        c,
        r2: 1.0 - ss_res / ss_tot,
    })
}

/// Planarity acceptance policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanarityCheck {
    /// When `false` any solvable fit is accepted.
    pub enforce: bool,
    /// Minimal `R²` (exclusive) when enforced.
    pub threshold: f64,
}

impl PlanarityCheck {
    /// Decide whether a fit outcome counts as planar.
    ///
    /// Singular or empty fits are never planar. A zero depth spread passes
    /// only when the condition is not enforced.
    pub fn accepts(&self, fit: &Result<PlaneFit, PlaneFitError>) -> bool {
        match fit {
            Ok(fit) => !self.enforce || fit.r2 > self.threshold,
            Err(PlaneFitError::ZeroDepthSpread) => !self.enforce,
            Err(_) => false,
        }
    }
}
