//! Resolution bookkeeping between the original image, the model-input image and the
//! low-resolution prompt space.

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::mask::{BoundingBox, Mask};

/// Long edge of the model-input image.
pub const MODEL_INPUT_LONG_EDGE: u32 = 1024;

/// Side of the square mask-prior prompt.
pub const LOW_RES_PROMPT_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of_image(image: &RgbImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn of_mask(mask: &Mask) -> Self {
        Self::new(mask.width(), mask.height())
    }

    /// Scale so the longer side becomes `long_edge`, keeping the aspect ratio.
    pub fn fit_long_edge(&self, long_edge: u32) -> Self {
        let longest = self.width.max(self.height).max(1);
        let scale = f64::from(long_edge) / f64::from(longest);
        let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
        Self::new(scaled(self.width), scaled(self.height))
    }
}

/// The three resolution spaces a request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Original,
    ModelInput,
    LowRes,
}

/// Scale factors between the original, model-input and low-res spaces of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    original: Resolution,
    model_input: Resolution,
    low_res: Resolution,
}

impl CoordinateTransform {
    pub fn new(original: Resolution, long_edge: u32, low_res_size: u32) -> Self {
        Self {
            original,
            model_input: original.fit_long_edge(long_edge),
            low_res: Resolution::new(low_res_size, low_res_size),
        }
    }

    pub fn for_image(image: &RgbImage) -> Self {
        Self::new(
            Resolution::of_image(image),
            MODEL_INPUT_LONG_EDGE,
            LOW_RES_PROMPT_SIZE,
        )
    }

    pub const fn original(&self) -> Resolution {
        self.original
    }

    pub const fn model_input(&self) -> Resolution {
        self.model_input
    }

    pub const fn low_res(&self) -> Resolution {
        self.low_res
    }

    pub const fn resolution(&self, space: Space) -> Resolution {
        match space {
            Space::Original => self.original,
            Space::ModelInput => self.model_input,
            Space::LowRes => self.low_res,
        }
    }

    /// Per-axis `(sx, sy)` factors taking coordinates from `from` to `to`.
    pub fn scale(&self, from: Space, to: Space) -> (f64, f64) {
        let src = self.resolution(from);
        let dst = self.resolution(to);
        (
            f64::from(dst.width) / f64::from(src.width),
            f64::from(dst.height) / f64::from(src.height),
        )
    }

    /// Map an inclusive box between spaces. The result covers every target pixel whose
    /// footprint overlaps the source box.
    pub fn map_box(&self, bbox: &BoundingBox, from: Space, to: Space) -> BoundingBox {
        let (sx, sy) = self.scale(from, to);
        let dst = self.resolution(to);
        let lo = |v: u32, s: f64, limit: u32| ((f64::from(v) * s).floor() as u32).min(limit - 1);
        let hi = |v: u32, s: f64, limit: u32| {
            (((f64::from(v) + 1.0) * s).ceil() as u32)
                .saturating_sub(1)
                .min(limit - 1)
        };

        let x_min = lo(bbox.x_min, sx, dst.width);
        let y_min = lo(bbox.y_min, sy, dst.height);
        BoundingBox::new(
            x_min,
            y_min,
            hi(bbox.x_max, sx, dst.width).max(x_min),
            hi(bbox.y_max, sy, dst.height).max(y_min),
        )
    }

    pub fn image_to(&self, image: &RgbImage, space: Space) -> RgbImage {
        resize_image(image, self.resolution(space))
    }

    pub fn mask_to(&self, mask: &Mask, space: Space) -> Mask {
        resize_mask(mask, self.resolution(space))
    }
}

/// Smooth resize for photographic content.
pub fn resize_image(image: &RgbImage, target: Resolution) -> RgbImage {
    if image.dimensions() == (target.width, target.height) {
        return image.clone();
    }
    imageops::resize(image, target.width, target.height, FilterType::Triangle)
}

/// Nearest-neighbor resize. Output pixels only ever copy an input pixel, so the result
/// stays binary and is identical for identical inputs.
pub fn resize_mask(mask: &Mask, target: Resolution) -> Mask {
    if mask.dimensions() == (target.width, target.height) {
        return mask.clone();
    }

    let src = mask.as_gray();
    let x_map = nearest_indices(mask.width(), target.width);
    let y_map = nearest_indices(mask.height(), target.height);
    let resized = GrayImage::from_fn(target.width, target.height, |x, y| {
        *src.get_pixel(x_map[x as usize], y_map[y as usize])
    });

    Mask::from_gray_owned(resized, 127)
}

fn nearest_indices(src_len: u32, dst_len: u32) -> Vec<u32> {
    let scale = f64::from(src_len) / f64::from(dst_len);
    (0..dst_len)
        .map(|i| ((f64::from(i) * scale).floor() as u32).min(src_len - 1))
        .collect()
}

/// Mask prior for the model: `size`x`size` regardless of aspect ratio, `{0.0, 1.0}`
/// valued, indexed `[row, column]`.
pub fn low_res_prior(mask: &Mask, size: u32) -> Array2<f32> {
    let low_res = resize_mask(mask, Resolution::new(size, size));
    Array2::from_shape_fn((size as usize, size as usize), |(y, x)| {
        if low_res.get(x as u32, y as u32) {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology;

    fn ellipse(width: u32, height: u32, cx: f32, cy: f32, rx: f32, ry: f32) -> Mask {
        Mask::from_fn(width, height, |x, y| {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            dx * dx + dy * dy <= 1.0
        })
    }

    #[test]
    fn test_long_edge_becomes_1024() {
        let landscape = Resolution::new(1920, 1080).fit_long_edge(MODEL_INPUT_LONG_EDGE);
        assert_eq!(landscape, Resolution::new(1024, 576));

        let portrait = Resolution::new(300, 451).fit_long_edge(MODEL_INPUT_LONG_EDGE);
        assert_eq!(portrait.height, 1024);
        assert_eq!(portrait.width, (300.0_f64 * 1024.0 / 451.0).round() as u32);

        let small = Resolution::new(512, 512).fit_long_edge(MODEL_INPUT_LONG_EDGE);
        assert_eq!(small, Resolution::new(1024, 1024));
    }

    #[test]
    fn test_extreme_aspect_ratio_keeps_one_pixel() {
        let thin = Resolution::new(5000, 1).fit_long_edge(MODEL_INPUT_LONG_EDGE);
        assert_eq!(thin, Resolution::new(1024, 1));
    }

    #[test]
    fn test_mask_resize_is_binary_and_deterministic() {
        let mask = ellipse(300, 200, 150.0, 100.0, 60.0, 40.0);
        let first = resize_mask(&mask, Resolution::new(1024, 683));
        let second = resize_mask(&mask, Resolution::new(1024, 683));
        assert_eq!(first, second);
        assert!(first.as_gray().pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_round_trip_stays_inside_dilated_hull() {
        let mask = ellipse(512, 384, 250.0, 190.0, 70.0, 50.0);
        let down = resize_mask(&mask, Resolution::new(128, 96));
        let up = resize_mask(&down, Resolution::of_mask(&mask));

        // each output pixel copies a source pixel at most `factor` away
        let hull = morphology::dilate(&mask, &morphology::ellipse_kernel(2 * 4 + 1), 1);
        assert!(up.is_subset_of(&hull));

        let changed = mask
            .as_gray()
            .pixels()
            .zip(up.as_gray().pixels())
            .filter(|(a, b)| a != b)
            .count();
        assert!((changed as f64) < 0.5 * mask.count() as f64);
    }

    #[test]
    fn test_low_res_prior_is_square_and_binary() {
        let mask = ellipse(1024, 576, 512.0, 288.0, 100.0, 100.0);
        let prior = low_res_prior(&mask, LOW_RES_PROMPT_SIZE);
        assert_eq!(prior.shape(), &[256, 256]);
        assert!(prior.iter().all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(prior[[128, 128]], 1.0);
        assert_eq!(prior[[0, 0]], 0.0);
    }

    #[test]
    fn test_box_mapping_covers_source() {
        let transform = CoordinateTransform::new(Resolution::new(512, 256), 1024, 256);
        assert_eq!(transform.model_input(), Resolution::new(1024, 512));

        let bbox = BoundingBox::new(10, 20, 30, 40);
        let up = transform.map_box(&bbox, Space::Original, Space::ModelInput);
        assert_eq!(up, BoundingBox::new(20, 40, 61, 81));

        let back = transform.map_box(&up, Space::ModelInput, Space::Original);
        assert_eq!(back, bbox);
    }

    #[test]
    fn test_box_mapping_clamps_to_target() {
        let transform = CoordinateTransform::new(Resolution::new(1000, 1000), 1024, 256);
        let full = BoundingBox::new(0, 0, 999, 999);
        let low = transform.map_box(&full, Space::Original, Space::LowRes);
        assert_eq!(low, BoundingBox::new(0, 0, 255, 255));
    }

    #[test]
    fn test_image_resize_uses_target_size() {
        let image = RgbImage::new(640, 480);
        let transform = CoordinateTransform::for_image(&image);
        let resized = transform.image_to(&image, Space::ModelInput);
        assert_eq!(resized.dimensions(), (1024, 768));
    }
}
