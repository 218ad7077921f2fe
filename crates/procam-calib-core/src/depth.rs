//! Depth maps and corner backprojection.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Borrowed depth map: one `f32` sample per pixel, row-major, `len = width * height`.
#[derive(Clone, Copy, Debug)]
pub struct DepthFrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [f32],
}

/// Owned depth map.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl DepthFrame {
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Overwrite one sample. Returns `false` (and writes nothing) when `(x, y)`
    /// lies outside the map.
    pub fn set(&mut self, x: usize, y: usize, value: f32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        match self.data.get_mut(y * self.width + x) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn view(&self) -> DepthFrameView<'_> {
        DepthFrameView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

impl DepthFrameView<'_> {
    #[inline]
    fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }
}

/// Inclusive range of depth samples considered valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthBounds {
    pub min: f32,
    pub max: f32,
}

impl DepthBounds {
    #[inline]
    pub fn contains(&self, v: f32) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Reasons a corner cannot be lifted into camera space.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum BackprojectError {
    #[error("corner position ({x}, {y}) is not finite")]
    NonFinite { x: f32, y: f32 },
    #[error("corner ({x}, {y}) has interpolation neighbours outside the {width}x{height} depth map")]
    OutOfBounds {
        x: f32,
        y: f32,
        width: usize,
        height: usize,
    },
    #[error("zero-width interpolation span at ({x}, {y})")]
    ZeroSpan { x: f32, y: f32 },
    #[error("depth sample {value} at pixel ({x}, {y}) is outside [{min}, {max}]")]
    DepthOutOfRange {
        x: usize,
        y: usize,
        value: f32,
        min: f32,
        max: f32,
    },
}

/// A detected corner with its interpolated camera-space point `(px, py, z)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerObservation {
    pub pixel: Point2<f32>,
    pub point: Point3<f32>,
}

/// Linear blend in the span form `(b_pos - t)/(b_pos - a_pos) * a + (t - a_pos)/(b_pos - a_pos) * b`.
#[inline]
fn span_lerp(a: f32, b: f32, a_pos: f32, b_pos: f32, t: f32) -> f32 {
    let span = b_pos - a_pos;
    (b_pos - t) / span * a + (t - a_pos) / span * b
}

/// Lift one sub-pixel corner into camera space using the depth map.
///
/// The four samples around the corner must all lie inside `bounds`. The
/// depth is blended first along x on row `y1` (`(x1,y1)`→`(x2,y1)`), then along
/// x between `(x2,y1)` and `(x2,y2)`, then along y between the two. The
/// second blend deliberately uses the `x2` column for both rows.
#[inline]
pub fn backproject_corner(
    depth: &DepthFrameView<'_>,
    corner: Point2<f32>,
    bounds: DepthBounds,
) -> Result<CornerObservation, BackprojectError> {
    let (px, py) = (corner.x, corner.y);
    if !px.is_finite() || !py.is_finite() {
        return Err(BackprojectError::NonFinite { x: px, y: py });
    }

    let out_of_bounds = BackprojectError::OutOfBounds {
        x: px,
        y: py,
        width: depth.width,
        height: depth.height,
    };
    if px < 0.0 || py < 0.0 {
        return Err(out_of_bounds);
    }

    // Casts saturate for huge coordinates, so the `+ 1` must be checked.
    let x1 = px.floor() as usize;
    let y1 = py.floor() as usize;
    let x2 = x1.checked_add(1).ok_or(out_of_bounds)?;
    let y2 = y1.checked_add(1).ok_or(out_of_bounds)?;

    let mut samples = [0.0f32; 4];
    for (slot, (x, y)) in samples
        .iter_mut()
        .zip([(x1, y1), (x2, y1), (x1, y2), (x2, y2)])
    {
        let value = depth.get(x, y).ok_or(out_of_bounds)?;
        if !bounds.contains(value) {
            return Err(BackprojectError::DepthOutOfRange {
                x,
                y,
                value,
                min: bounds.min,
                max: bounds.max,
            });
        }
        *slot = value;
    }
    let [d11, d21, _d12, d22] = samples;

    let (fx1, fx2) = (x1 as f32, x2 as f32);
    let (fy1, fy2) = (y1 as f32, y2 as f32);
    if fx2 - fx1 <= 0.0 || fy2 - fy1 <= 0.0 {
        return Err(BackprojectError::ZeroSpan { x: px, y: py });
    }

    let interp_x1 = span_lerp(d11, d21, fx1, fx2, px);
    let interp_x2 = span_lerp(d21, d22, fx1, fx2, px);
    let z = span_lerp(interp_x1, interp_x2, fy1, fy2, py);

    Ok(CornerObservation {
        pixel: corner,
        point: Point3::new(px, py, z),
    })
}

/// Backproject every corner of a frame, failing fast on the first invalid one.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(depth, corners), fields(n = corners.len()))
)]
pub fn backproject_corners(
    depth: &DepthFrameView<'_>,
    corners: &[Point2<f32>],
    bounds: DepthBounds,
) -> Result<Vec<CornerObservation>, BackprojectError> {
    corners
        .iter()
        .map(|&c| backproject_corner(depth, c, bounds))
        .collect()
}

/// Corners evaluated during one update cycle together with their gate flags.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateFrame {
    pub observations: Vec<CornerObservation>,
    pub detected: bool,
    pub depth_complete: bool,
    pub planar: bool,
}

impl CandidateFrame {
    /// `true` if the frame passed detection, depth and planarity gates.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.detected && self.depth_complete && self.planar
    }

    /// Camera-space points of an accepted frame; empty for a rejected one.
    pub fn points_if_ok(&self) -> Vec<Point3<f32>> {
        if !self.is_ok() {
            return Vec::new();
        }
        self.observations.iter().map(|o| o.point).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BOUNDS: DepthBounds = DepthBounds {
        min: 100.0,
        max: 2000.0,
    };

    fn gradient_frame() -> DepthFrame {
        DepthFrame::from_fn(8, 6, |x, y| 500.0 + 10.0 * x as f32 + 100.0 * y as f32)
    }

    #[test]
    fn integer_corner_reads_the_sample() {
        let frame = gradient_frame();
        let obs = backproject_corner(&frame.view(), Point2::new(3.0, 2.0), BOUNDS).expect("valid");
        assert_relative_eq!(obs.point.x, 3.0);
        assert_relative_eq!(obs.point.y, 2.0);
        assert_relative_eq!(obs.point.z, 730.0);
    }

    #[test]
    fn interpolation_uses_the_x2_column_for_the_second_row_blend() {
        let mut frame = DepthFrame::filled(4, 4, 1000.0);
        // (x1,y1)=(1,1), (x2,y1)=(2,1), (x1,y2)=(1,2), (x2,y2)=(2,2)
        frame.set(1, 1, 400.0);
        frame.set(2, 1, 800.0);
        frame.set(1, 2, 1600.0);
        frame.set(2, 2, 1200.0);

        let obs = backproject_corner(&frame.view(), Point2::new(1.25, 1.5), BOUNDS).expect("valid");
        let ix1: f32 = 0.75 * 400.0 + 0.25 * 800.0;
        let ix2: f32 = 0.75 * 800.0 + 0.25 * 1200.0;
        let expected = 0.5 * ix1 + 0.5 * ix2;
        assert_relative_eq!(obs.point.z, expected, epsilon = 1e-3);

        // Changing the unused (x1, y2) sample does not move the result.
        frame.set(1, 2, 150.0);
        let again = backproject_corner(&frame.view(), Point2::new(1.25, 1.5), BOUNDS).expect("valid");
        assert_relative_eq!(again.point.z, obs.point.z);
    }

    #[test]
    fn interpolated_depth_is_bounded_by_neighbours() {
        let frame = DepthFrame::from_fn(10, 10, |x, y| {
            600.0 + ((x * 37 + y * 91) % 17) as f32 * 45.0
        });
        let view = frame.view();
        for i in 0..40 {
            let px = 0.13 + (i as f32) * 0.211;
            let py = 0.57 + (i as f32) * 0.173;
            let obs = backproject_corner(&view, Point2::new(px, py), BOUNDS).expect("valid");
            let (x1, y1) = (px.floor() as usize, py.floor() as usize);
            let neigh = [
                view.get(x1, y1).unwrap_or_default(),
                view.get(x1 + 1, y1).unwrap_or_default(),
                view.get(x1, y1 + 1).unwrap_or_default(),
                view.get(x1 + 1, y1 + 1).unwrap_or_default(),
            ];
            let lo = neigh.iter().cloned().fold(f32::INFINITY, f32::min);
            let hi = neigh.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert!(
                obs.point.z >= lo - 1e-3 && obs.point.z <= hi + 1e-3,
                "z={} outside [{lo}, {hi}] at ({px}, {py})",
                obs.point.z
            );
        }
    }

    #[test]
    fn any_out_of_range_neighbour_invalidates_the_corner() {
        for (bx, by) in [(2, 3), (3, 3), (2, 4), (3, 4)] {
            let mut frame = DepthFrame::filled(6, 6, 900.0);
            frame.set(bx, by, 0.0);
            let err = backproject_corner(&frame.view(), Point2::new(2.4, 3.6), BOUNDS)
                .expect_err("invalid depth");
            assert_eq!(
                err,
                BackprojectError::DepthOutOfRange {
                    x: bx,
                    y: by,
                    value: 0.0,
                    min: BOUNDS.min,
                    max: BOUNDS.max
                }
            );
        }
    }

    #[test]
    fn edge_corners_are_rejected_instead_of_reading_past_the_map() {
        let frame = DepthFrame::filled(5, 5, 900.0);
        let view = frame.view();
        assert!(matches!(
            backproject_corner(&view, Point2::new(4.2, 1.0), BOUNDS),
            Err(BackprojectError::OutOfBounds { .. })
        ));
        assert!(matches!(
            backproject_corner(&view, Point2::new(-0.5, 1.0), BOUNDS),
            Err(BackprojectError::OutOfBounds { .. })
        ));
        assert!(matches!(
            backproject_corner(&view, Point2::new(f32::NAN, 1.0), BOUNDS),
            Err(BackprojectError::NonFinite { .. })
        ));
    }

    #[test]
    fn huge_coordinates_are_out_of_bounds() {
        let frame = DepthFrame::filled(5, 5, 900.0);
        let view = frame.view();
        for corner in [
            Point2::new(1e30, 1.0),
            Point2::new(1.0, 1e30),
            Point2::new(f32::MAX, f32::MAX),
        ] {
            assert!(matches!(
                backproject_corner(&view, corner, BOUNDS),
                Err(BackprojectError::OutOfBounds { .. })
            ));
        }
    }

    #[test]
    fn writes_outside_the_map_are_reported() {
        let mut frame = DepthFrame::filled(3, 2, 900.0);
        assert!(frame.set(2, 1, 450.0));
        assert_eq!(frame.data[5], 450.0);
        assert!(!frame.set(3, 0, 1.0));
        assert!(!frame.set(0, 2, 1.0));
        assert!(frame.data.iter().all(|&v| v == 900.0 || v == 450.0));
    }

    #[test]
    fn frame_backprojection_fails_fast() {
        let mut frame = DepthFrame::filled(6, 6, 900.0);
        frame.set(4, 4, 5000.0);
        let corners = [Point2::new(1.5, 1.5), Point2::new(3.5, 3.5), Point2::new(2.5, 2.5)];
        assert!(backproject_corners(&frame.view(), &corners, BOUNDS).is_err());

        let ok = backproject_corners(&frame.view(), &corners[..1], BOUNDS).expect("valid");
        assert_eq!(ok.len(), 1);
    }
}
