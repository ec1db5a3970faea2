use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegError};
use crate::mask::{BoundingBox, Mask};
use crate::transform::{low_res_prior, LOW_RES_PROMPT_SIZE};

/// A labelled click in model-input coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPrompt {
    pub x: f32,
    pub y: f32,
    /// `true` marks foreground, `false` background.
    pub foreground: bool,
}

impl PointPrompt {
    pub const fn foreground(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            foreground: true,
        }
    }

    pub const fn background(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            foreground: false,
        }
    }
}

/// Geometric input for one promptable prediction, in model-input coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub bbox: Option<BoundingBox>,
    pub points: Vec<PointPrompt>,
    /// `(1, 1, S, S)` prior with values in `{0.0, 1.0}`.
    pub mask_prior: Option<Array4<f32>>,
}

impl Prompt {
    pub fn from_point(point: PointPrompt) -> Self {
        Self {
            points: vec![point],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bbox.is_none() && self.points.is_empty() && self.mask_prior.is_none()
    }
}

/// Derives a box + mask-prior prompt from a model-input resolution mask.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    low_res_size: u32,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(LOW_RES_PROMPT_SIZE)
    }
}

impl PromptBuilder {
    pub const fn new(low_res_size: u32) -> Self {
        Self { low_res_size }
    }

    pub fn build(&self, mask: &Mask) -> Result<Prompt> {
        let bbox = mask.bounding_box().ok_or(SegError::EmptyPromptRegion)?;

        let side = self.low_res_size as usize;
        let prior =
            low_res_prior(mask, self.low_res_size).into_shape_with_order((1, 1, side, side))?;

        Ok(Prompt {
            bbox: Some(bbox),
            points: Vec::new(),
            mask_prior: Some(prior),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_build_box_and_prior() -> Result<()> {
        let mask = Mask::from_fn(1024, 512, |x, y| {
            (100..=299).contains(&x) && (50..=149).contains(&y)
        });
        let prompt = PromptBuilder::default().build(&mask)?;

        assert_eq!(prompt.bbox, Some(BoundingBox::new(100, 50, 299, 149)));
        let prior = prompt.mask_prior.as_ref().unwrap();
        assert_eq!(prior.shape(), &[1, 1, 256, 256]);
        assert!(prior.iter().all(|&v| v == 0.0 || v == 1.0));
        // x 100..=299 -> columns 25..=74, y 50..=149 -> rows 25..=74
        assert_eq!(prior[[0, 0, 50, 50]], 1.0);
        assert_eq!(prior[[0, 0, 10, 10]], 0.0);
        assert!(prompt.points.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_mask_is_rejected() {
        let err = PromptBuilder::default().build(&Mask::new(64, 64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyPromptRegion);
    }

    #[test]
    fn test_custom_prior_size() -> Result<()> {
        let mask = Mask::from_fn(32, 32, |x, _| x < 16);
        let prompt = PromptBuilder::new(64).build(&mask)?;
        assert_eq!(prompt.mask_prior.unwrap().shape(), &[1, 1, 64, 64]);
        Ok(())
    }

    #[test]
    fn test_point_prompt() {
        let prompt = Prompt::from_point(PointPrompt::foreground(3.0, 4.0));
        assert!(!prompt.is_empty());
        assert!(prompt.bbox.is_none());
        assert!(Prompt::default().is_empty());
    }
}
