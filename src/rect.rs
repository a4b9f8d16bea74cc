//! Rectangles and the geometric transforms between source frames and network inputs.

use std::fmt;

use crate::image::Resolution;

/// An axis-aligned rectangle with `f32` coordinates.
///
/// Rectangles are allowed to have zero height and/or width.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x: x_center - width / 2.0,
            y: y_center - height / 2.0,
            w: width,
            h: height,
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self {
            x: top_left_x,
            y: top_left_y,
            w: width,
            h: height,
        }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.w
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.h
    }

    #[inline]
    pub fn top(&self) -> f32 {
        self.y
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Returns whether all coordinates are finite and the size is positive.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite()) && self.w > 0.0 && self.h > 0.0
    }

    /// Applies `f` to the top left and bottom right corners.
    pub fn map_corners(&self, mut f: impl FnMut((f32, f32)) -> (f32, f32)) -> Rect {
        let (x0, y0) = f((self.x, self.y));
        let (x1, y1) = f((self.x + self.w, self.y + self.h));
        Rect::from_top_left(x0, y0, x1 - x0, y1 - y0)
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.x, self.y, self.w, self.h
        )
    }
}

/// An integer region of an image, used for cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn x(&self) -> i32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> i32 {
        self.y
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Moves the region so that it lies inside of an image of size `bounds`.
    ///
    /// The region is only shrunk if it is larger than `bounds` in some dimension. The result always
    /// covers at least 1 pixel. Applying this twice yields the same region as applying it once.
    ///
    /// Returns [`None`] if `bounds` is empty.
    pub fn clamp_to(&self, bounds: Resolution) -> Option<PixelRect> {
        if bounds.width() == 0 || bounds.height() == 0 {
            return None;
        }

        let width = self.width.clamp(1, bounds.width());
        let height = self.height.clamp(1, bounds.height());
        let max_x = i64::from(bounds.width() - width);
        let max_y = i64::from(bounds.height() - height);
        let x = i64::from(self.x).clamp(0, max_x) as i32;
        let y = i64::from(self.y).clamp(0, max_y) as i32;

        Some(PixelRect {
            x,
            y,
            width,
            height,
        })
    }
}

/// Computes the square region of interest around a detected box.
///
/// The square is centered on `bbox` and has a side length of `max(width, height) * margin`. It is
/// then moved (and only if unavoidable, shrunk) to fit into `bounds`.
///
/// Returns [`None`] for degenerate input geometry.
pub fn square_roi(bbox: &Rect, margin: f32, bounds: Resolution) -> Option<PixelRect> {
    if !bbox.is_valid() {
        return None;
    }

    let side = (bbox.width().max(bbox.height()) * margin).round();
    if !side.is_finite() || side < 1.0 {
        log::trace!("degenerate ROI size {side} for {bbox:?}");
        return None;
    }

    let (xc, yc) = bbox.center();
    let x = (xc - side / 2.0).round();
    let y = (yc - side / 2.0).round();
    // `as` saturates, so far out-of-frame boxes just get clamped to the nearest edge.
    let side = side as u32;
    PixelRect::new(x as i32, y as i32, side, side).clamp_to(bounds)
}

/// Describes how an image was resized (preserving its aspect ratio) and padded to fit a square
/// network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    content: Resolution,
}

impl LetterboxTransform {
    /// Computes the transform that fits an image of resolution `source` into a `target x target`
    /// square, centering it and padding the remaining space.
    ///
    /// Returns [`None`] if either size is 0.
    pub fn new(source: Resolution, target: u32) -> Option<Self> {
        if source.width() == 0 || source.height() == 0 || target == 0 {
            return None;
        }

        let target_f = target as f32;
        let scale = (target_f / source.width() as f32).min(target_f / source.height() as f32);
        let w = ((source.width() as f32 * scale).round() as u32).clamp(1, target);
        let h = ((source.height() as f32 * scale).round() as u32).clamp(1, target);

        Some(Self {
            scale,
            pad_x: ((target - w) / 2) as f32,
            pad_y: ((target - h) / 2) as f32,
            content: Resolution::new(w, h),
        })
    }

    #[inline]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[inline]
    pub fn pad_x(&self) -> f32 {
        self.pad_x
    }

    #[inline]
    pub fn pad_y(&self) -> f32 {
        self.pad_y
    }

    /// Returns the size of the resized image inside the padded square.
    #[inline]
    pub fn content_resolution(&self) -> Resolution {
        self.content
    }

    /// Maps a point from source image coordinates to network input coordinates.
    pub fn to_input(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }

    /// Maps a point from network input coordinates back to source image coordinates.
    pub fn to_source(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// Maps a rectangle from network input coordinates back to source image coordinates.
    pub fn rect_to_source(&self, rect: &Rect) -> Rect {
        rect.map_corners(|pt| self.to_source(pt))
    }
}
