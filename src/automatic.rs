//! Whole-image mask generation by prompting a point grid.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::mask::{BoundingBox, Mask};
use crate::prompt::{PointPrompt, Prompt};
use crate::traits::{Candidate, SegmentationModel};
use crate::transform::{
    CoordinateTransform, Resolution, Space, LOW_RES_PROMPT_SIZE, MODEL_INPUT_LONG_EDGE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomaticParams {
    pub points_per_side: u32,
    /// Candidates whose predicted IoU is below this are dropped.
    pub pred_iou_threshold: f32,
    /// Box IoU above which a lower-scored candidate counts as a duplicate.
    pub nms_iou_threshold: f32,
    pub model_input_long_edge: u32,
}

impl Default for AutomaticParams {
    fn default() -> Self {
        Self {
            points_per_side: 32,
            pred_iou_threshold: 0.88,
            nms_iou_threshold: 0.7,
            model_input_long_edge: MODEL_INPUT_LONG_EDGE,
        }
    }
}

impl AutomaticParams {
    /// Cell-centred grid over a `width`x`height` image.
    pub fn grid_points(&self, width: u32, height: u32) -> Vec<PointPrompt> {
        let n = self.points_per_side.max(1);
        let step_x = width as f32 / n as f32;
        let step_y = height as f32 / n as f32;
        (0..n)
            .flat_map(|j| {
                (0..n).map(move |i| {
                    PointPrompt::foreground((i as f32 + 0.5) * step_x, (j as f32 + 0.5) * step_y)
                })
            })
            .collect()
    }
}

/// Prompt `model` with every grid point and keep the distinct, confident masks, sorted by
/// descending score. Masks come back at the resolution of `image`.
pub fn generate_with_grid<M>(
    model: &mut M,
    image: &RgbImage,
    params: &AutomaticParams,
) -> Result<Vec<Candidate>>
where
    M: SegmentationModel + ?Sized,
{
    let original = Resolution::of_image(image);
    let transform =
        CoordinateTransform::new(original, params.model_input_long_edge, LOW_RES_PROMPT_SIZE);
    let input = transform.image_to(image, Space::ModelInput);
    model.set_image(&input)?;

    let model_input = transform.model_input();
    let mut kept = Vec::new();
    for point in params.grid_points(model_input.width, model_input.height) {
        for candidate in model.predict(&Prompt::from_point(point), true)? {
            if candidate.score < params.pred_iou_threshold || candidate.mask.is_empty() {
                continue;
            }
            kept.push(candidate);
        }
    }

    let total = kept.len();
    let kept = non_max_suppression(kept, params.nms_iou_threshold);
    debug!(total, kept = kept.len(), "grid candidates");

    Ok(kept
        .into_iter()
        .map(|candidate| {
            let mask = transform.mask_to(&candidate.mask, Space::Original);
            Candidate::new(mask, candidate.score)
        })
        .collect())
}

/// Greedy suppression on mask bounding boxes, highest score first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<(Candidate, BoundingBox)> = Vec::new();
    for candidate in candidates {
        let Some(bbox) = candidate.mask.bounding_box() else {
            continue;
        };
        if kept.iter().all(|(_, other)| bbox.iou(other) <= iou_threshold) {
            kept.push((candidate, bbox));
        }
    }

    kept.into_iter().map(|(candidate, _)| candidate).collect()
}

/// Helper for tests and backends: a mask at `resolution` covering `bbox`.
pub fn box_mask(resolution: Resolution, bbox: &BoundingBox) -> Mask {
    Mask::from_fn(resolution.width, resolution.height, |x, y| bbox.contains(x, y))
}
