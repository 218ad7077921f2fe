//! Displayed chessboard geometry and the fixed board-space corner layout.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in normalized display coordinates (`[0, 1]` on both axes).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoardRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// `true` if `p` lies inside the rectangle, excluding its border.
    pub fn contains_strictly(&self, p: Point2<f32>) -> bool {
        p.x > self.x && p.x < self.x + self.width && p.y > self.y && p.y < self.y + self.height
    }

    /// Clamp the rectangle into the unit square.
    ///
    /// Position is clamped first (keeping the size), then the size is clamped
    /// against the new position.
    pub fn clamped(&self) -> Self {
        let x = self.x.clamp(0.0, (1.0 - self.width).max(0.0));
        let y = self.y.clamp(0.0, (1.0 - self.height).max(0.0));
        Self {
            x,
            y,
            width: self.width.clamp(0.0, 1.0 - x),
            height: self.height.clamp(0.0, 1.0 - y),
        }
    }

    /// Move the top-left corner to `(x, y)`, keeping the size, clamped into the unit square.
    pub fn moved_to(&self, x: f32, y: f32) -> Self {
        Self { x, y, ..*self }.clamped()
    }

    /// Grow or shrink the rectangle by dragging one vertical and one horizontal edge.
    ///
    /// `from_left`/`from_top` select which edges follow the drag `(dx, dy)`;
    /// the opposite edges stay in place.
    pub fn resized_by(&self, dx: f32, dy: f32, from_left: bool, from_top: bool) -> Self {
        let mut out = *self;
        if from_left {
            out.x = self.x + dx;
            out.width = self.width - dx;
        } else {
            out.width = self.width + dx;
        }
        if from_top {
            out.y = self.y + dy;
            out.height = self.height - dy;
        } else {
            out.height = self.height + dy;
        }
        out.clamped()
    }

    fn is_valid(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.width > 0.0
            && self.height > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= 1.0 + f32::EPSILON
            && self.y + self.height <= 1.0 + f32::EPSILON
    }
}

/// Interior corner grid size, as passed to a chessboard corner detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteriorSize {
    pub cols: u32,
    pub rows: u32,
}

impl InteriorSize {
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

/// Board geometry validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardGeometryError {
    #[error("squares_x and squares_y must be >= 2 (got {squares_x}x{squares_y})")]
    InvalidSquares { squares_x: u32, squares_y: u32 },
    #[error("board area must be finite, non-empty and inside the unit square (got {0:?})")]
    InvalidArea(BoardRect),
}

/// Calibration board description.
///
/// `squares_x`/`squares_y` are **square counts**; the detector looks for
/// `(squares_x - 1) x (squares_y - 1)` interior corners. `area` is where the
/// board is drawn on the projector, in normalized display coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub squares_x: u32,
    pub squares_y: u32,
    pub area: BoardRect,
}

impl Default for BoardGeometry {
    /// 7x5 squares, centred, sized for a 4:3 projector.
    fn default() -> Self {
        Self::centered(7, 5)
    }
}

impl BoardGeometry {
    /// Validate and create a board geometry.
    pub fn new(squares_x: u32, squares_y: u32, area: BoardRect) -> Result<Self, BoardGeometryError> {
        let board = Self {
            squares_x,
            squares_y,
            area,
        };
        board.validate()?;
        Ok(board)
    }

    /// Board with the given square counts, centred on the display.
    pub fn centered(squares_x: u32, squares_y: u32) -> Self {
        let width = 0.9 * 0.75 * squares_x as f32 / 7.0;
        let height = 0.9 * squares_y as f32 / 7.0;
        Self {
            squares_x,
            squares_y,
            area: BoardRect::new((1.0 - width) / 2.0, (1.0 - height) / 2.0, width, height),
        }
    }

    pub fn validate(&self) -> Result<(), BoardGeometryError> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(BoardGeometryError::InvalidSquares {
                squares_x: self.squares_x,
                squares_y: self.squares_y,
            });
        }
        if !self.area.is_valid() {
            return Err(BoardGeometryError::InvalidArea(self.area));
        }
        Ok(())
    }

    /// Same squares, different display area.
    pub fn with_area(&self, area: BoardRect) -> Result<Self, BoardGeometryError> {
        Self::new(self.squares_x, self.squares_y, area)
    }

    #[inline]
    pub fn interior_size(&self) -> InteriorSize {
        InteriorSize {
            cols: self.squares_x.saturating_sub(1),
            rows: self.squares_y.saturating_sub(1),
        }
    }

    #[inline]
    pub fn interior_corner_count(&self) -> usize {
        self.interior_size().corner_count()
    }

    /// Board-space positions of the interior corners in detector order.
    ///
    /// Row-major: `y` is the outer loop, `x` the inner one, matching the
    /// ordering chessboard detectors report corners in.
    pub fn board_points(&self) -> Vec<Point2<f32>> {
        let interior = self.interior_size();
        let step_x = self.area.width / self.squares_x as f32;
        let step_y = self.area.height / self.squares_y as f32;

        let mut points = Vec::with_capacity(interior.corner_count());
        for y in 0..interior.rows {
            for x in 0..interior.cols {
                points.push(Point2::new(
                    self.area.x + (x + 1) as f32 * step_x,
                    self.area.y + (y + 1) as f32 * step_y,
                ));
            }
        }
        points
    }

    /// Normalized rectangles of the dark squares (`(x + y)` even) for rendering the pattern.
    pub fn dark_squares(&self) -> Vec<BoardRect> {
        let w = self.area.width / self.squares_x as f32;
        let h = self.area.height / self.squares_y as f32;
        (0..self.squares_x)
            .flat_map(|x| (0..self.squares_y).map(move |y| (x, y)))
            .filter(|(x, y)| (x + y) % 2 == 0)
            .map(|(x, y)| BoardRect::new(self.area.x + x as f32 * w, self.area.y + y as f32 * h, w, h))
            .collect()
    }
}
