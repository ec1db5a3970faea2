//! Constrained morphological refinement.
//!
//! A refiner turns a raw model mask into a clean one while never letting it grow past the
//! user-authorized region: every morphological stage is followed by an AND with that
//! region.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::mask::Mask;
use crate::morphology;

/// Kernel sizes and iteration counts for one refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    pub close_kernel: u32,
    pub close_iterations: u32,
    pub open_kernel: u32,
    pub open_iterations: u32,
    pub smooth_close_kernel: u32,
    pub median_kernel: u32,
    pub gaussian_sigma: Option<f32>,
    pub fill_holes: bool,
}

impl RefineParams {
    /// Pass applied to the raw model output at model-input resolution.
    pub fn model_input() -> Self {
        Self {
            close_kernel: 9,
            close_iterations: 2,
            open_kernel: 3,
            open_iterations: 1,
            smooth_close_kernel: 5,
            median_kernel: 5,
            gaussian_sigma: None,
            fill_holes: false,
        }
    }

    /// Pass applied after mapping back to the original resolution.
    pub fn original() -> Self {
        Self {
            close_kernel: 7,
            close_iterations: 2,
            open_kernel: 3,
            open_iterations: 1,
            smooth_close_kernel: 5,
            median_kernel: 5,
            gaussian_sigma: Some(1.0),
            fill_holes: true,
        }
    }

    /// Ordered stage list. A constrain follows every stage that can add pixels.
    pub fn stages(&self) -> Vec<RefineStage> {
        let mut stages = vec![
            RefineStage::Close {
                kernel: self.close_kernel,
                iterations: self.close_iterations,
            },
            RefineStage::Constrain,
            RefineStage::Open {
                kernel: self.open_kernel,
                iterations: self.open_iterations,
            },
            RefineStage::Constrain,
            RefineStage::Close {
                kernel: self.smooth_close_kernel,
                iterations: 1,
            },
            RefineStage::Constrain,
            RefineStage::Smooth {
                median_kernel: self.median_kernel,
                gaussian_sigma: self.gaussian_sigma,
            },
            RefineStage::Constrain,
        ];

        if self.fill_holes {
            stages.push(RefineStage::FillHoles);
            stages.push(RefineStage::Constrain);
        }

        stages
    }
}

impl Default for RefineParams {
    fn default() -> Self {
        Self::model_input()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefineStage {
    /// AND with the authorized region.
    Constrain,
    Close { kernel: u32, iterations: u32 },
    Open { kernel: u32, iterations: u32 },
    /// Median filter, optional Gaussian blur, re-threshold.
    Smooth {
        median_kernel: u32,
        gaussian_sigma: Option<f32>,
    },
    FillHoles,
}

impl RefineStage {
    fn apply(&self, mask: Mask, authorized: &Mask) -> Result<Mask> {
        let out = match *self {
            Self::Constrain => {
                let mut mask = mask;
                mask.constrain_to(authorized)?;
                mask
            }
            Self::Close { kernel, iterations } => {
                morphology::close(&mask, &morphology::ellipse_kernel(kernel), iterations)
            }
            Self::Open { kernel, iterations } => {
                morphology::open(&mask, &morphology::ellipse_kernel(kernel), iterations)
            }
            Self::Smooth {
                median_kernel,
                gaussian_sigma,
            } => morphology::smooth(&mask, median_kernel, gaussian_sigma),
            Self::FillHoles => morphology::fill_holes(&mask),
        };
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct Refiner {
    stages: Vec<RefineStage>,
}

impl Refiner {
    pub fn new(params: &RefineParams) -> Self {
        Self {
            stages: params.stages(),
        }
    }

    pub fn stages(&self) -> &[RefineStage] {
        &self.stages
    }

    /// Run every stage. The result is always a subset of `authorized`.
    pub fn refine(&self, candidate: &Mask, authorized: &Mask) -> Result<Mask> {
        self.refine_with(candidate, authorized, |_, _| {})
    }

    /// Same as [`Refiner::refine`], reporting the mask after each stage.
    pub fn refine_with(
        &self,
        candidate: &Mask,
        authorized: &Mask,
        mut observer: impl FnMut(&RefineStage, &Mask),
    ) -> Result<Mask> {
        candidate.ensure_same_dimensions(authorized, "マスク精製")?;

        // start inside the authorized region
        let mut mask = candidate.and(authorized)?;
        for stage in &self.stages {
            mask = stage.apply(mask, authorized)?;
            observer(stage, &mask);
        }

        debug!(
            width = mask.width(),
            height = mask.height(),
            before = candidate.count(),
            after = mask.count(),
            "refined mask"
        );
        Ok(mask)
    }
}
