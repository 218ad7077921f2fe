//! Collaborator interfaces: the depth camera and the chessboard corner detector.

use image::{GrayImage, RgbImage};
use nalgebra::Point2;
use procam_calib_core::{DepthFrame, DepthFrameView, InteriorSize};

/// Finds the interior corners of the projected chessboard.
///
/// Corners are returned row-major (the same order as
/// [`BoardGeometry::board_points`](procam_calib_core::BoardGeometry::board_points))
/// with sub-pixel precision, or `None` if the board is not found.
pub trait CornerDetector {
    fn detect(&mut self, gray: &GrayImage, interior: InteriorSize) -> Option<Vec<Point2<f32>>>;
}

impl<F> CornerDetector for F
where
    F: FnMut(&GrayImage, InteriorSize) -> Option<Vec<Point2<f32>>>,
{
    fn detect(&mut self, gray: &GrayImage, interior: InteriorSize) -> Option<Vec<Point2<f32>>> {
        self(gray, interior)
    }
}

/// Color + depth camera, registered so that color pixel `(x, y)` and depth
/// sample `(x, y)` see the same scene point.
pub trait CameraSource {
    /// `true` if a frame arrived since the last update.
    fn is_frame_new(&self) -> bool;

    fn depth_frame(&self) -> DepthFrameView<'_>;

    fn color_frame(&self) -> &RgbImage;
}

/// An owned color/depth pair, e.g. for replaying recorded frames.
#[derive(Clone, Debug)]
pub struct RecordedFrame {
    pub color: RgbImage,
    pub depth: DepthFrame,
    pub fresh: bool,
}

impl RecordedFrame {
    pub fn new(color: RgbImage, depth: DepthFrame) -> Self {
        Self {
            color,
            depth,
            fresh: true,
        }
    }
}

impl CameraSource for RecordedFrame {
    fn is_frame_new(&self) -> bool {
        self.fresh
    }

    fn depth_frame(&self) -> DepthFrameView<'_> {
        self.depth.view()
    }

    fn color_frame(&self) -> &RgbImage {
        &self.color
    }
}

/// Luma conversion of the color frame, as fed to the detector.
pub fn to_gray(color: &RgbImage) -> GrayImage {
    image::imageops::grayscale(color)
}
