use image::{imageops, GenericImageView, Rgb, RgbImage, RgbaImage};

use crate::errors::{Result, SegError};
use crate::mask::Mask;

/// Cropped RGBA cut-out of one object plus its placement in the source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub image: RgbaImage,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

pub trait AlphaMaskApplicable {
    /// `mask` をアルファチャンネルとして付与（内側255、外側0）
    fn apply_alpha_mask(self, mask: &Mask) -> Result<RgbaImage>;
}

impl AlphaMaskApplicable for RgbImage {
    fn apply_alpha_mask(self, mask: &Mask) -> Result<RgbaImage> {
        if self.dimensions() != mask.dimensions() {
            return Err(SegError::internal(
                "マスク適用",
                "image and mask dimensions do not match",
            ));
        }

        let processed_pixels = self
            .pixels()
            .zip(mask.as_gray().pixels())
            .flat_map(|(&Rgb([red, green, blue]), alpha)| [red, green, blue, alpha[0]])
            .collect::<Vec<u8>>();

        RgbaImage::from_raw(self.width(), self.height(), processed_pixels)
            .ok_or_else(|| SegError::internal("マスク適用", "failed to assemble RGBA buffer"))
    }
}

/// Crop `image` to the mask's bounding box and make everything outside the mask
/// transparent.
pub fn extract_region(mask: &Mask, image: &RgbImage) -> Result<Region> {
    if mask.dimensions() != image.dimensions() {
        return Err(SegError::internal(
            "領域抽出",
            format!(
                "mask is {}x{} but image is {}x{}",
                mask.width(),
                mask.height(),
                image.width(),
                image.height()
            ),
        ));
    }

    let bbox = mask.bounding_box().ok_or(SegError::NoValidRegion)?;
    let (x, y, width, height) = (bbox.x_min, bbox.y_min, bbox.width(), bbox.height());

    let crop = image.view(x, y, width, height).to_image();
    let mask_crop = imageops::crop_imm(mask.as_gray(), x, y, width, height).to_image();

    Ok(Region {
        image: crop.apply_alpha_mask(&Mask::from_gray_owned(mask_crop, 127))?,
        offset_x: x,
        offset_y: y,
        width,
        height,
    })
}
