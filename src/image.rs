//! Frames and the image operations the pipeline needs.
//!
//! Images are stored as 8-bit sRGB [`RgbaImage`]s. Frames arrive from the camera with a sensor
//! rotation attached, which has to be corrected before any network sees them.

use std::{borrow::Cow, fmt, path::Path};

use anyhow::Context;
use image::imageops::{self, FilterType};
use image::Rgba;

pub use image::RgbaImage;

use crate::rect::{LetterboxTransform, PixelRect};

/// Resolution (`width x height`) of an image or network input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the resolution of `image`.
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Clockwise rotation of the camera sensor relative to the upright image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Converts a rotation in degrees to a [`Rotation`].
    ///
    /// Negative angles and angles above 360° are normalized. Angles that are not a multiple of 90°
    /// are rejected.
    pub fn from_degrees(degrees: i32) -> anyhow::Result<Self> {
        Ok(match degrees.rem_euclid(360) {
            0 => Self::Deg0,
            90 => Self::Deg90,
            180 => Self::Deg180,
            270 => Self::Deg270,
            _ => anyhow::bail!("unsupported sensor rotation of {degrees}°"),
        })
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// A camera frame.
///
/// Frames are produced by an external frame source and consumed by one pipeline pass.
#[derive(Clone)]
pub struct Frame {
    image: RgbaImage,
    rotation: Rotation,
}

impl Frame {
    pub fn new(image: RgbaImage, rotation: Rotation) -> Self {
        Self { image, rotation }
    }

    /// Wraps a raw RGBA8 pixel buffer.
    ///
    /// `buf` must contain exactly `width * height * 4` bytes.
    pub fn from_rgba8(width: u32, height: u32, buf: Vec<u8>, rotation: Rotation) -> anyhow::Result<Self> {
        let len = buf.len();
        let image = RgbaImage::from_raw(width, height, buf).with_context(|| {
            format!("incorrect buffer size {len} for {width}x{height} RGBA frame")
        })?;
        Ok(Self::new(image, rotation))
    }

    /// Loads a frame from an image file.
    pub fn load<P: AsRef<Path>>(path: P, rotation: Rotation) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to load image '{}'", path.display()))?
            .to_rgba8();
        Ok(Self::new(image, rotation))
    }

    #[inline]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[inline]
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::of(&self.image)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution())
            .field("rotation", &self.rotation)
            .finish()
    }
}

/// Rotates `image` clockwise by `rotation`, undoing the sensor orientation.
pub fn rotate(image: &RgbaImage, rotation: Rotation) -> Cow<'_, RgbaImage> {
    match rotation {
        Rotation::Deg0 => Cow::Borrowed(image),
        Rotation::Deg90 => Cow::Owned(imageops::rotate90(image)),
        Rotation::Deg180 => Cow::Owned(imageops::rotate180(image)),
        Rotation::Deg270 => Cow::Owned(imageops::rotate270(image)),
    }
}

/// Resizes `image` to `width x height`, ignoring its aspect ratio.
pub fn resize(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Resizes `image` into a black `target x target` square, preserving its aspect ratio.
///
/// Returns [`None`] if `image` or `target` is empty.
pub fn letterbox(image: &RgbaImage, target: u32) -> Option<(RgbaImage, LetterboxTransform)> {
    let transform = LetterboxTransform::new(Resolution::of(image), target)?;
    let content = transform.content_resolution();
    let resized = resize(image, content.width(), content.height());

    let mut canvas = RgbaImage::from_pixel(target, target, Rgba([0, 0, 0, 255]));
    imageops::overlay(
        &mut canvas,
        &resized,
        transform.pad_x() as i64,
        transform.pad_y() as i64,
    );
    Some((canvas, transform))
}

/// Crops `region` out of `image` and resizes it to a `size x size` square.
///
/// `region` is expected to already be clamped to the image bounds.
pub fn crop_resized(image: &RgbaImage, region: PixelRect, size: u32) -> RgbaImage {
    let cropped = imageops::crop_imm(
        image,
        region.x().max(0) as u32,
        region.y().max(0) as u32,
        region.width(),
        region.height(),
    )
    .to_image();
    resize(&cropped, size, size)
}

/// Draws a filled circular marker centered at `(x, y)`.
///
/// Parts of the marker that fall outside of the image are clipped.
pub fn draw_marker(image: &mut RgbaImage, x: f32, y: f32, radius: u32, color: Rgba<u8>) {
    let r = radius as i64;
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            put_pixel(image, cx + dx, cy + dy, color);
        }
    }
}

/// Draws a 1 pixel wide line from `a` to `b`.
pub fn draw_line(image: &mut RgbaImage, a: (f32, f32), b: (f32, f32), color: Rgba<u8>) {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let steps = dx.abs().max(dy.abs()).ceil();
    if !steps.is_finite() {
        return;
    }
    let steps = (steps as i64).clamp(1, 1 << 16);
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = (a.0 + dx * t).round() as i64;
        let y = (a.1 + dy * t).round() as i64;
        put_pixel(image, x, y, color);
    }
}

fn put_pixel(image: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= i64::from(image.width()) || y >= i64::from(image.height()) {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90).unwrap(), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(540).unwrap(), Rotation::Deg180);
        assert!(Rotation::from_degrees(45).is_err());
    }

    #[test]
    fn rotate_swaps_dimensions() {
        let mut image = RgbaImage::new(4, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));

        let rotated = rotate(&image, Rotation::Deg90);
        assert_eq!(Resolution::of(&rotated), Resolution::new(2, 4));
        // Clockwise: the top left pixel ends up in the top right corner.
        assert_eq!(rotated.get_pixel(1, 0), &Rgba([255, 0, 0, 255]));

        assert!(matches!(rotate(&image, Rotation::Deg0), Cow::Borrowed(_)));
        assert_eq!(Resolution::of(&rotate(&image, Rotation::Deg180)), Resolution::new(4, 2));
    }

    #[test]
    fn letterbox_pads_with_black() {
        let image = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
        let (boxed, transform) = letterbox(&image, 8).unwrap();
        assert_eq!(Resolution::of(&boxed), Resolution::new(8, 8));
        assert_eq!(transform.pad_y(), 2.0);
        assert_eq!(boxed.get_pixel(4, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(boxed.get_pixel(4, 4), &Rgba([255, 255, 255, 255]));
        assert_eq!(boxed.get_pixel(4, 7), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn crop_resized_output_size() {
        let image = RgbaImage::new(100, 50);
        let crop = crop_resized(&image, PixelRect::new(10, 5, 40, 40), 256);
        assert_eq!(Resolution::of(&crop), Resolution::new(256, 256));
    }

    #[test]
    fn frame_buffer_size_is_checked() {
        assert!(Frame::from_rgba8(2, 2, vec![0; 16], Rotation::Deg0).is_ok());
        assert!(Frame::from_rgba8(2, 2, vec![0; 15], Rotation::Deg0).is_err());
    }

    #[test]
    fn markers_are_clipped() {
        let mut image = RgbaImage::new(4, 4);
        let green = Rgba([0, 255, 0, 255]);
        draw_marker(&mut image, 0.0, 0.0, 2, green);
        draw_marker(&mut image, -100.0, 1000.0, 2, green);
        assert_eq!(image.get_pixel(0, 0), &green);
        assert_eq!(image.get_pixel(3, 3), &Rgba([0, 0, 0, 0]));
    }
}
