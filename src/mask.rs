use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegError};

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

/// Binary membership grid.
///
/// Stored as an 8-bit single-channel buffer whose pixels are only ever `0` or `255`, so
/// it can go through `imageproc` filters directly. Every constructor re-binarizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    inner: GrayImage,
}

impl Mask {
    /// All-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: GrayImage::new(width, height),
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        Self {
            inner: GrayImage::from_fn(width, height, |x, y| if f(x, y) { ON } else { OFF }),
        }
    }

    /// Threshold a grayscale buffer: values strictly above `threshold` become true.
    pub fn from_gray(gray: &GrayImage, threshold: u8) -> Self {
        let mut inner = gray.clone();
        inner
            .pixels_mut()
            .for_each(|p| *p = if p[0] > threshold { ON } else { OFF });
        Self { inner }
    }

    /// Same as [`Mask::from_gray`] but reuses the buffer.
    pub fn from_gray_owned(mut gray: GrayImage, threshold: u8) -> Self {
        gray.pixels_mut()
            .for_each(|p| *p = if p[0] > threshold { ON } else { OFF });
        Self { inner: gray }
    }

    pub fn from_bools(width: u32, height: u32, values: &[bool]) -> Result<Self> {
        if values.len() != (width as usize) * (height as usize) {
            return Err(SegError::internal(
                "マスク構築",
                format!(
                    "{} values do not fill a {}x{} mask",
                    values.len(),
                    width,
                    height
                ),
            ));
        }
        let raw = values.iter().map(|&v| if v { 255 } else { 0 }).collect();
        GrayImage::from_raw(width, height, raw)
            .map(|inner| Self { inner })
            .ok_or_else(|| SegError::internal("マスク構築", "buffer size mismatch"))
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.inner.get_pixel(x, y)[0] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.inner.put_pixel(x, y, if value { ON } else { OFF });
    }

    /// Number of true pixels.
    pub fn count(&self) -> usize {
        self.inner.as_raw().iter().filter(|&&v| v != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.as_raw().iter().all(|&v| v == 0)
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.inner
    }

    pub fn into_gray(self) -> GrayImage {
        self.inner
    }

    pub fn complement(&self) -> Self {
        let mut inner = self.inner.clone();
        inner.pixels_mut().for_each(|p| p[0] = !p[0]);
        Self { inner }
    }

    /// Bitwise AND with `region`, in place.
    pub fn constrain_to(&mut self, region: &Mask) -> Result<()> {
        self.ensure_same_dimensions(region, "領域制約")?;
        self.inner
            .iter_mut()
            .zip(region.inner.as_raw())
            .for_each(|(v, &r)| *v &= r);
        Ok(())
    }

    pub fn and(&self, other: &Mask) -> Result<Self> {
        let mut out = self.clone();
        out.constrain_to(other)?;
        Ok(out)
    }

    /// `true` when every true pixel of `self` is also true in `region`.
    pub fn is_subset_of(&self, region: &Mask) -> bool {
        self.dimensions() == region.dimensions()
            && self
                .inner
                .as_raw()
                .iter()
                .zip(region.inner.as_raw())
                .all(|(&v, &r)| v == 0 || r != 0)
    }

    /// Minimal inclusive box around the true pixels, `None` for an empty mask.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let (width, height) = self.dimensions();
        let mut bounds = [width, height, 0, 0]; // [x1, y1, x2, y2]
        let mut found = false;

        for (x, y, pixel) in self.inner.enumerate_pixels() {
            if pixel[0] != 0 {
                update_bounds(&mut bounds, x, y);
                found = true;
            }
        }

        found.then(|| BoundingBox::new(bounds[0], bounds[1], bounds[2], bounds[3]))
    }

    pub(crate) fn ensure_same_dimensions(&self, other: &Mask, operation: &str) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(SegError::internal(
                operation,
                format!(
                    "mask is {}x{} but reference is {}x{}",
                    self.width(),
                    self.height(),
                    other.width(),
                    other.height()
                ),
            ));
        }
        Ok(())
    }
}

fn update_bounds(bounds: &mut [u32; 4], x: u32, y: u32) {
    bounds[0] = bounds[0].min(x);
    bounds[1] = bounds[1].min(y);
    bounds[2] = bounds[2].max(x);
    bounds[3] = bounds[3].max(y);
}

/// Axis-aligned rectangle with inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub const fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub const fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }

    pub const fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }

    pub const fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// `true` when `other` lies entirely inside `self`.
    pub const fn encloses(&self, other: &BoundingBox) -> bool {
        other.x_min >= self.x_min
            && other.y_min >= self.y_min
            && other.x_max <= self.x_max
            && other.y_max <= self.y_max
    }

    /// Grow by `margin` on every side, clamped to a `width`x`height` image.
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> Self {
        Self {
            x_min: self.x_min.saturating_sub(margin),
            y_min: self.y_min.saturating_sub(margin),
            x_max: (self.x_max + margin).min(width.saturating_sub(1)),
            y_max: (self.y_max + margin).min(height.saturating_sub(1)),
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);

        if x1 > x2 || y1 > y2 {
            return 0.0;
        }

        let intersection = u64::from(x2 - x1 + 1) * u64::from(y2 - y1 + 1);
        let union = self.area() + other.area() - intersection;
        intersection as f32 / union as f32
    }

    /// Corners as `[x_min, y_min, x_max, y_max]` in model prompt layout.
    pub fn to_xyxy(&self) -> [f32; 4] {
        [
            self.x_min as f32,
            self.y_min as f32,
            self.x_max as f32,
            self.y_max as f32,
        ]
    }
}
