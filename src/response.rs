use serde::{Deserialize, Serialize};

use crate::codec::encode_png_data_uri;
use crate::errors::{ErrorKind, Result, SegError};
use crate::region::Region;

/// One region as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskPayload {
    /// PNG data URI of the RGBA crop.
    pub image: String,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl MaskPayload {
    pub fn from_region(region: &Region) -> Result<Self> {
        Ok(Self {
            image: encode_png_data_uri(&region.image)?,
            offset_x: region.offset_x,
            offset_y: region.offset_y,
            width: region.width,
            height: region.height,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationResponse {
    pub masks: Vec<MaskPayload>,
}

impl SegmentationResponse {
    pub fn from_regions(regions: &[Region]) -> Result<Self> {
        let masks = regions
            .iter()
            .map(MaskPayload::from_region)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { masks })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub detail: String,
}

/// Client errors keep their message. Model and internal failures get a fixed text so
/// paths and operation details stay in the logs.
impl From<&SegError> for ErrorResponse {
    fn from(err: &SegError) -> Self {
        let detail = match err.kind() {
            ErrorKind::ModelUnavailable => "Segmentation model is unavailable".to_string(),
            ErrorKind::InternalProcessingFailure => "Internal processing failure".to_string(),
            ErrorKind::InvalidMaskShape
            | ErrorKind::EmptyPromptRegion
            | ErrorKind::NoValidRegion
            | ErrorKind::UnsupportedMediaType => err.to_string(),
        };
        Self {
            status: err.status_code(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_payload_uses_camel_case_keys() -> Result<()> {
        let region = Region {
            image: RgbaImage::from_pixel(2, 3, Rgba([1, 2, 3, 255])),
            offset_x: 4,
            offset_y: 5,
            width: 2,
            height: 3,
        };
        let response = SegmentationResponse::from_regions(&[region])?;
        let value: serde_json::Value = serde_json::from_str(&response.to_json()?)?;

        let mask = &value["masks"][0];
        assert_eq!(mask["offsetX"], 4);
        assert_eq!(mask["offsetY"], 5);
        assert_eq!(mask["width"], 2);
        assert_eq!(mask["height"], 3);
        assert!(mask["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        Ok(())
    }

    #[test]
    fn test_empty_response() -> Result<()> {
        let json = SegmentationResponse::default().to_json()?;
        let value: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(value["masks"].as_array().map(Vec::len), Some(0));
        Ok(())
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::from(&SegError::EmptyPromptRegion);
        assert_eq!(response.status, 400);
        assert_eq!(response.detail, "Prompt mask has no foreground pixels");

        let unavailable = ErrorResponse::from(&SegError::ModelUnavailable {
            reason: "checkpoint not found: /srv/models/encoder.onnx".to_string(),
        });
        assert_eq!(unavailable.status, 503);
        assert!(!unavailable.detail.contains("/srv"));
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let io = ErrorResponse::from(&SegError::FileSystem {
            path: "/home/user/secret/photo.png".into(),
            operation: "ファイル読み込み".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(io.status, 500);
        assert_eq!(io.detail, "Internal processing failure");

        let internal =
            ErrorResponse::from(&SegError::internal("マスク精製", "mask is 3x3 but reference is 4x4"));
        assert_eq!(internal.status, 500);
        assert_eq!(internal.detail, "Internal processing failure");
    }
}
