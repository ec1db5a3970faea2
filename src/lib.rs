pub mod automatic;
pub mod batch;
pub mod binarize;
pub mod codec;
pub mod config;
pub mod errors;
pub mod logging;
pub mod mask;
pub mod model;
pub mod morphology;
pub mod prompt;
pub mod refine;
pub mod region;
pub mod response;
pub mod traits;
pub mod transform;

pub mod mocks;

use image::RgbImage;
use tracing::{debug, info, instrument, warn};

pub use binarize::{MaskBinarizer, RawMask};
pub use config::{Config, PipelineConfig};
pub use errors::{ErrorKind, Result, SegError};
pub use mask::{BoundingBox, Mask};
pub use model::ModelService;
pub use prompt::{PointPrompt, Prompt, PromptBuilder};
pub use refine::{RefineParams, RefineStage, Refiner};
pub use region::{extract_region, Region};
pub use response::{ErrorResponse, MaskPayload, SegmentationResponse};
pub use traits::*;
pub use transform::{CoordinateTransform, Resolution, Space};

#[cfg(feature = "onnx")]
pub use model::{OnnxSam, OnnxSamConfig};

/// セグメンテーション要求（マスクありはガイド付き、なしは自動）
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub image: RgbImage,
    pub mask: Option<RawMask>,
}

impl SegmentRequest {
    pub const fn automatic(image: RgbImage) -> Self {
        Self { image, mask: None }
    }

    pub const fn guided(image: RgbImage, mask: RawMask) -> Self {
        Self {
            image,
            mask: Some(mask),
        }
    }
}

pub struct Segmenter<M: SegmentationModel> {
    model: ModelService<M>,
    config: PipelineConfig,
    model_input_refiner: Refiner,
    original_refiner: Refiner,
}

impl<M: SegmentationModel> Segmenter<M> {
    pub fn new(model: ModelService<M>, config: PipelineConfig) -> Self {
        Self {
            model_input_refiner: Refiner::new(&config.model_input_refine),
            original_refiner: Refiner::new(&config.original_refine),
            model,
            config,
        }
    }

    pub fn with_defaults(model: ModelService<M>) -> Self {
        Self::new(model, PipelineConfig::default())
    }

    pub const fn model(&self) -> &ModelService<M> {
        &self.model
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn segment(&self, request: &SegmentRequest) -> Result<Vec<Region>> {
        match &request.mask {
            Some(mask) => self.segment_guided(&request.image, mask),
            None => self.segment_automatic(&request.image),
        }
    }

    /// 要求を実行し、クライアント向けの形に変換
    pub fn respond(
        &self,
        request: &SegmentRequest,
    ) -> std::result::Result<SegmentationResponse, ErrorResponse> {
        self.segment(request)
            .and_then(|regions| SegmentationResponse::from_regions(&regions))
            .map_err(|err| {
                warn!(error = %err, status = err.status_code(), "segmentation failed");
                ErrorResponse::from(&err)
            })
    }

    /// モデルが自力で見つけた全マスクを精製せずに切り抜く
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn segment_automatic(&self, image: &RgbImage) -> Result<Vec<Region>> {
        let candidates = self.model.with_model(|model| model.generate(image))?;

        let mut regions = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if candidate.mask.dimensions() != image.dimensions() {
                return Err(SegError::internal(
                    "自動セグメンテーション",
                    format!(
                        "model returned a {}x{} mask for a {}x{} image",
                        candidate.mask.width(),
                        candidate.mask.height(),
                        image.width(),
                        image.height()
                    ),
                ));
            }
            match extract_region(&candidate.mask, image) {
                Ok(region) => regions.push(region),
                Err(SegError::NoValidRegion) => debug!("skipping empty candidate"),
                Err(err) => return Err(err),
            }
        }

        info!(
            candidates = candidates.len(),
            regions = regions.len(),
            "automatic segmentation done"
        );
        Ok(regions)
    }

    /// ユーザーの粗いマスクを、そのマスクからはみ出さない一つの領域に精製
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn segment_guided(&self, image: &RgbImage, raw_mask: &RawMask) -> Result<Vec<Region>> {
        let original = Resolution::of_image(image);
        let binarizer = MaskBinarizer::new(self.config.mask_threshold)
            .with_expected_size(original.width, original.height);
        let mut user_mask = binarizer.binarize(raw_mask)?;

        if user_mask.dimensions() != image.dimensions() {
            warn!(
                mask_width = user_mask.width(),
                mask_height = user_mask.height(),
                "mask size differs from image, resizing"
            );
            user_mask = transform::resize_mask(&user_mask, original);
        }
        if user_mask.is_empty() {
            return Err(SegError::EmptyPromptRegion);
        }

        let transform = CoordinateTransform::new(
            original,
            self.config.model_input_long_edge,
            self.config.low_res_size,
        );
        let input_image = transform.image_to(image, Space::ModelInput);
        let input_mask = transform.mask_to(&user_mask, Space::ModelInput);
        let prompt = PromptBuilder::new(self.config.low_res_size).build(&input_mask)?;
        debug!(bbox = ?prompt.bbox, model_input = ?transform.model_input(), "prompt built");

        let candidates = self.model.with_model(|model| {
            model.set_image(&input_image)?;
            model.predict(&prompt, self.config.multimask)
        })?;

        let best = candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or_else(|| SegError::internal("ガイド付きセグメンテーション", "model returned no candidates"))?;
        debug!(score = best.score, "selected candidate");

        let candidate_mask = transform.mask_to(&best.mask, Space::ModelInput);
        let refined_input = self.model_input_refiner.refine(&candidate_mask, &input_mask)?;

        let mapped_back = transform.mask_to(&refined_input, Space::Original);
        let refined = self.original_refiner.refine(&mapped_back, &user_mask)?;

        let region = extract_region(&refined, image)?;
        info!(
            offset_x = region.offset_x,
            offset_y = region.offset_y,
            width = region.width,
            height = region.height,
            "guided segmentation done"
        );
        Ok(vec![region])
    }
}
