use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage, RgbaImage};

use crate::binarize::{raw_mask_from_image, RawMask};
use crate::errors::{Result, SegError};

/// Decode an uploaded image. Anything that is not an `image/*` content type, or does not
/// decode, is an unsupported media type.
pub fn decode_image(bytes: &[u8], content_type: Option<&str>) -> Result<RgbImage> {
    if let Some(content_type) = content_type {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if !essence.to_ascii_lowercase().starts_with("image/") {
            return Err(SegError::UnsupportedMediaType {
                media_type: essence.to_string(),
            });
        }
    }

    image::load_from_memory(bytes)
        .map(|image| image.into_rgb8())
        .map_err(|err| SegError::UnsupportedMediaType {
            media_type: format!(
                "{} ({err})",
                content_type.unwrap_or("undetected image format")
            ),
        })
}

/// Decode a mask image into its raw array, keeping every channel for the binarizer.
pub fn decode_mask(bytes: &[u8]) -> Result<RawMask> {
    let image = image::load_from_memory(bytes).map_err(|err| SegError::UnsupportedMediaType {
        media_type: format!("mask ({err})"),
    })?;
    raw_mask_from_image(image)
}

pub fn load_image(path: &Path) -> Result<RgbImage> {
    decode_image(&read_file(path)?, mime_for_path(path))
}

pub fn load_mask(path: &Path) -> Result<RawMask> {
    decode_mask(&read_file(path)?)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "ファイル読み込み".to_string(),
        source: e,
    })
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    ImageFormat::from_path(path).ok().map(|format| format.to_mime_type())
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// `data:image/png;base64,...`
pub fn encode_png_data_uri(image: &RgbaImage) -> Result<String> {
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(encode_png(image)?)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use image::{DynamicImage, Luma, Rgba};

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() -> Result<()> {
        let source = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let bytes = png_bytes(DynamicImage::ImageRgba8(source));
        let image = decode_image(&bytes, Some("image/png"))?;
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_non_image_content_type_is_rejected() {
        let err = decode_image(b"hello", Some("text/plain; charset=utf-8")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let err = decode_image(b"not an image", Some("image/png")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
    }

    #[test]
    fn test_decode_gray_mask() -> Result<()> {
        let mask = image::GrayImage::from_pixel(5, 4, Luma([255]));
        let raw = decode_mask(&png_bytes(DynamicImage::ImageLuma8(mask)))?;
        assert_eq!(raw.shape(), &[4, 5]);
        Ok(())
    }

    #[test]
    fn test_data_uri_round_trips() -> Result<()> {
        let image = RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255]));
        let uri = encode_png_data_uri(&image)?;
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = image::load_from_memory(&STANDARD.decode(payload).unwrap())?.into_rgba8();
        assert_eq!(decoded, image);
        Ok(())
    }
}
