use std::path::PathBuf;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors of the segmentation refinement pipeline.
///
/// The first five variants are the request-facing failure classes and map to status
/// codes through [`SegError::status_code`]. The rest carry operation context and all
/// classify as [`ErrorKind::InternalProcessingFailure`].
#[derive(Error, Debug)]
pub enum SegError {
    #[error("Invalid mask shape {shape:?}: {reason}")]
    InvalidMaskShape { shape: Vec<usize>, reason: String },

    #[error("Prompt mask has no foreground pixels")]
    EmptyPromptRegion,

    #[error("Mask has no foreground pixels to extract")]
    NoValidRegion,

    #[error("Segmentation model is unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("Unsupported media type: {media_type}")]
    UnsupportedMediaType { media_type: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Internal processing failure during {operation}: {message}")]
    Internal { operation: String, message: String },
}

/// Boundary-facing failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidMaskShape,
    EmptyPromptRegion,
    NoValidRegion,
    ModelUnavailable,
    UnsupportedMediaType,
    InternalProcessingFailure,
}

impl SegError {
    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_shape(shape: &[usize], reason: impl Into<String>) -> Self {
        Self::InvalidMaskShape {
            shape: shape.to_vec(),
            reason: reason.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMaskShape { .. } => ErrorKind::InvalidMaskShape,
            Self::EmptyPromptRegion => ErrorKind::EmptyPromptRegion,
            Self::NoValidRegion => ErrorKind::NoValidRegion,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            Self::Configuration { .. }
            | Self::FileSystem { .. }
            | Self::ImageProcessing { .. }
            | Self::Model { .. }
            | Self::Internal { .. } => ErrorKind::InternalProcessingFailure,
        }
    }

    /// HTTP-style status code for the failure class.
    pub const fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidMaskShape
            | ErrorKind::EmptyPromptRegion
            | ErrorKind::NoValidRegion
            | ErrorKind::UnsupportedMediaType => 400,
            ErrorKind::ModelUnavailable => 503,
            ErrorKind::InternalProcessingFailure => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SegError>;

/// Fallback without path context. Call sites that know the path build
/// `SegError::FileSystem` directly.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come from reinterpreting mask buffers and model tensors; both are
/// internal once the input has passed the binarizer.
impl From<ndarray::ShapeError> for SegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ImageProcessing {
            operation: "array shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for SegError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for SegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SegError::EmptyPromptRegion.status_code(), 400);
        assert_eq!(SegError::NoValidRegion.status_code(), 400);
        assert_eq!(SegError::invalid_shape(&[2, 3, 5, 7], "bad").status_code(), 400);
        assert_eq!(
            SegError::UnsupportedMediaType {
                media_type: "text/plain".to_string()
            }
            .status_code(),
            400
        );
        assert_eq!(
            SegError::ModelUnavailable {
                reason: "missing".to_string()
            }
            .status_code(),
            503
        );
        assert_eq!(SegError::internal("マスク精製", "boom").status_code(), 500);
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: SegError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::InternalProcessingFailure);
    }
}
