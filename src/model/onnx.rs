use std::path::{Path, PathBuf};

use image::RgbImage;
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use tracing::{debug, info};

use crate::automatic::{generate_with_grid, AutomaticParams};
use crate::errors::{Result, SegError};
use crate::mask::Mask;
use crate::prompt::Prompt;
use crate::traits::{Candidate, SegmentationModel};
use crate::transform::{resize_image, Resolution, LOW_RES_PROMPT_SIZE, MODEL_INPUT_LONG_EDGE};

const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

const LABEL_PADDING: f32 = -1.0;
const LABEL_BACKGROUND: f32 = 0.0;
const LABEL_FOREGROUND: f32 = 1.0;
const LABEL_BOX_TOP_LEFT: f32 = 2.0;
const LABEL_BOX_BOTTOM_RIGHT: f32 = 3.0;

#[derive(Debug, Clone)]
pub struct OnnxSamConfig {
    pub encoder_path: PathBuf,
    pub decoder_path: PathBuf,
    pub device_id: i32,
    pub num_threads: Option<usize>,
    pub automatic: AutomaticParams,
}

impl OnnxSamConfig {
    pub fn new(encoder_path: impl Into<PathBuf>, decoder_path: impl Into<PathBuf>) -> Self {
        Self {
            encoder_path: encoder_path.into(),
            decoder_path: decoder_path.into(),
            device_id: 0,
            num_threads: None,
            automatic: AutomaticParams::default(),
        }
    }
}

struct ImageState {
    embedding: Array4<f32>,
    /// `set_image` に渡された画像のサイズ
    size: Resolution,
    /// `size` からエンコーダー座標への倍率
    scale: f32,
}

/// Segment-anything encoder/decoder pair exported to ONNX.
pub struct OnnxSam {
    encoder: Session,
    decoder: Session,
    encoder_input: String,
    automatic: AutomaticParams,
    image: Option<ImageState>,
}

impl OnnxSam {
    pub fn new(config: &OnnxSamConfig) -> Result<Self> {
        for path in [&config.encoder_path, &config.decoder_path] {
            if !path.is_file() {
                return Err(SegError::ModelUnavailable {
                    reason: format!("checkpoint not found: {}", path.display()),
                });
            }
        }

        let encoder = build_session(&config.encoder_path, config.device_id, config.num_threads)?;
        let decoder = build_session(&config.decoder_path, config.device_id, config.num_threads)?;
        let encoder_input = encoder
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| SegError::internal("エンコーダー入力取得", "encoder has no inputs"))?;

        info!(
            encoder = %config.encoder_path.display(),
            decoder = %config.decoder_path.display(),
            device_id = config.device_id,
            "loaded ONNX segmentation model"
        );

        Ok(Self {
            encoder,
            decoder,
            encoder_input,
            automatic: config.automatic.clone(),
            image: None,
        })
    }

    fn embed(&mut self, tensor: &Array4<f32>) -> Result<Array4<f32>> {
        let input_name = self.encoder_input.clone();
        let outputs = self
            .encoder
            .run(ort::inputs![input_name => TensorRef::from_array_view(tensor.view())?])
            .map_err(|e| model_error("エンコーダー実行", e))?;
        Ok(outputs["image_embeddings"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

fn model_error(operation: &str, err: ort::Error) -> SegError {
    SegError::Model {
        operation: operation.to_string(),
        source: Box::new(err),
    }
}

fn build_session(path: &Path, device_id: i32, num_threads: Option<usize>) -> Result<Session> {
    let mut builder = SessionBuilder::new()
        .map_err(|e| model_error("セッションビルダー初期化", e))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(|e| model_error("実行プロバイダー設定", e))?
        .with_memory_pattern(true)
        .map_err(|e| model_error("メモリパターン設定", e))?;

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)
            .map_err(|e| model_error("スレッド数設定", e))?;
    }

    builder.commit_from_file(path).map_err(|e| SegError::ModelUnavailable {
        reason: format!("failed to load {}: {e}", path.display()),
    })
}

/// 長辺1024にリサイズ、正規化し、正方形のCHWテンソルへゼロパディング
pub fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let size = Resolution::of_image(image);
    let target = size.fit_long_edge(MODEL_INPUT_LONG_EDGE);
    let resized = resize_image(image, target);
    let scale = target.width as f32 / size.width.max(1) as f32;

    let side = MODEL_INPUT_LONG_EDGE as usize;
    let (h, w) = (target.height as usize, target.width as usize);
    let planes = resized.as_ndarray3();
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for c in 0..3 {
        let (mean, std) = (PIXEL_MEAN[c], PIXEL_STD[c]);
        tensor
            .slice_mut(s![0, c, ..h, ..w])
            .assign(&planes.index_axis(Axis(0), c).mapv(|v| (f32::from(v) - mean) / std));
    }

    (tensor, scale)
}

/// エンコーダー座標系の点座標とラベル（ボックスの角は末尾）
fn prompt_points(prompt: &Prompt, scale: f32) -> Result<(Array3<f32>, Array2<f32>)> {
    let mut coords = Vec::new();
    let mut labels = Vec::new();

    for point in &prompt.points {
        coords.extend([point.x * scale, point.y * scale]);
        labels.push(if point.foreground {
            LABEL_FOREGROUND
        } else {
            LABEL_BACKGROUND
        });
    }

    match prompt.bbox {
        Some(bbox) => {
            let [x0, y0, x1, y1] = bbox.to_xyxy();
            coords.extend([x0 * scale, y0 * scale, x1 * scale, y1 * scale]);
            labels.extend([LABEL_BOX_TOP_LEFT, LABEL_BOX_BOTTOM_RIGHT]);
        }
        None => {
            coords.extend([0.0, 0.0]);
            labels.push(LABEL_PADDING);
        }
    }

    let n = labels.len();
    Ok((
        Array3::from_shape_vec((1, n, 2), coords)?,
        Array2::from_shape_vec((1, n), labels)?,
    ))
}

/// デコーダーの `mask_input` と `has_mask_input`（エクスポートは256x256の事前マスクのみ受け付ける）
fn prompt_mask_input(prompt: &Prompt) -> Result<(Array4<f32>, Array1<f32>)> {
    let side = LOW_RES_PROMPT_SIZE as usize;
    match &prompt.mask_prior {
        Some(prior) if prior.shape() == [1, 1, side, side] => {
            Ok((prior.clone(), Array1::from_vec(vec![1.0])))
        }
        Some(prior) => Err(SegError::Configuration {
            message: format!(
                "mask prior of shape {:?} does not match the decoder input [1, 1, {side}, {side}]",
                prior.shape()
            ),
        }),
        None => Ok((Array4::zeros((1, 1, side, side)), Array1::from_vec(vec![0.0]))),
    }
}

impl SegmentationModel for OnnxSam {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (tensor, scale) = preprocess(image);
        let embedding = self.embed(&tensor)?;
        debug!(width = image.width(), height = image.height(), "image embedded");

        self.image = Some(ImageState {
            embedding,
            size: Resolution::of_image(image),
            scale,
        });
        Ok(())
    }

    fn predict(&mut self, prompt: &Prompt, multimask: bool) -> Result<Vec<Candidate>> {
        let state = self
            .image
            .as_ref()
            .ok_or_else(|| SegError::internal("デコーダー実行", "predict called before set_image"))?;

        let (coords, labels) = prompt_points(prompt, state.scale)?;
        let (mask_input, has_mask_input) = prompt_mask_input(prompt)?;
        let orig_im_size =
            Array1::from_vec(vec![state.size.height as f32, state.size.width as f32]);

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embeddings" => TensorRef::from_array_view(state.embedding.view())?,
                "point_coords" => TensorRef::from_array_view(coords.view())?,
                "point_labels" => TensorRef::from_array_view(labels.view())?,
                "mask_input" => TensorRef::from_array_view(mask_input.view())?,
                "has_mask_input" => TensorRef::from_array_view(has_mask_input.view())?,
                "orig_im_size" => TensorRef::from_array_view(orig_im_size.view())?,
            ])
            .map_err(|e| model_error("デコーダー実行", e))?;

        let masks = outputs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let scores = outputs["iou_predictions"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect::<Vec<_>>();

        // 4出力の場合: 0番が単一マスク、1..4がマルチマスク
        let count = masks.shape()[1];
        let selected = match (count, multimask) {
            (4, true) => 1..4,
            (4, false) => 0..1,
            _ => 0..count,
        };

        let (height, width) = (masks.shape()[2], masks.shape()[3]);
        selected
            .map(|i| {
                let logits = masks.slice(s![0, i, .., ..]);
                let values: Vec<bool> = logits.iter().map(|&v| v > 0.0).collect();
                let mask = Mask::from_bools(width as u32, height as u32, &values)?;
                Ok(Candidate::new(mask, scores.get(i).copied().unwrap_or(0.0)))
            })
            .collect()
    }

    fn generate(&mut self, image: &RgbImage) -> Result<Vec<Candidate>> {
        let params = self.automatic.clone();
        generate_with_grid(self, image, &params)
    }
}
