use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::automatic::AutomaticParams;
use crate::binarize::DEFAULT_THRESHOLD;
use crate::errors::{Result, SegError};
use crate::refine::RefineParams;
use crate::transform::{LOW_RES_PROMPT_SIZE, MODEL_INPUT_LONG_EDGE};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output: PathBuf,

    /// Encoder ONNX checkpoint
    #[arg(short, long)]
    pub encoder: PathBuf,

    /// Decoder ONNX checkpoint
    #[arg(short = 'D', long)]
    pub decoder: PathBuf,

    /// Rough mask for a single input image; selects guided mode
    #[arg(short, long)]
    pub mask: Option<PathBuf>,

    /// In directory mode, `<stem><suffix>.png` next to an image is its mask
    #[arg(long, default_value = "_mask")]
    pub mask_suffix: String,

    /// JSON file overriding pipeline parameters
    #[arg(short, long)]
    pub pipeline_config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Also write the RGBA crops as PNG files
    #[arg(long)]
    pub save_crops: bool,

    #[arg(short, long)]
    pub num_threads: Option<usize>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Accepted for compatibility and ignored
    #[arg(long, hide = true)]
    pub bbox: Option<String>,
}

/// パイプラインの調整値
///
/// 全フィールドに既定値があるため、設定ファイルには変更する値だけを書けばよい。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_input_long_edge: u32,
    pub low_res_size: u32,
    pub multimask: bool,
    pub mask_threshold: u8,
    pub model_input_refine: RefineParams,
    pub original_refine: RefineParams,
    pub automatic: AutomaticParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_input_long_edge: MODEL_INPUT_LONG_EDGE,
            low_res_size: LOW_RES_PROMPT_SIZE,
            multimask: true,
            mask_threshold: DEFAULT_THRESHOLD,
            model_input_refine: RefineParams::model_input(),
            original_refine: RefineParams::original(),
            automatic: AutomaticParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SegError::FileSystem {
            path: path.to_path_buf(),
            operation: "パイプライン設定読み込み".to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_input_long_edge == 0 || self.low_res_size == 0 {
            return Err(SegError::Configuration {
                message: "model_input_long_edge and low_res_size must be positive".to_string(),
            });
        }
        if self.automatic.points_per_side == 0 {
            return Err(SegError::Configuration {
                message: "automatic.points_per_side must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"multimask": false, "original_refine": {{"fill_holes": false}}}}"#
        )?;

        let config = PipelineConfig::from_file(file.path())?;
        assert!(!config.multimask);
        assert!(!config.original_refine.fill_holes);
        assert_eq!(config.model_input_long_edge, 1024);
        assert_eq!(config.model_input_refine, RefineParams::model_input());
        assert_eq!(config.automatic.points_per_side, 32);
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = PipelineConfig {
            low_res_size: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::parse_from([
            "seg-refine",
            "photo.jpg",
            "--encoder",
            "enc.onnx",
            "--decoder",
            "dec.onnx",
            "--mask",
            "photo_mask.png",
            "--bbox",
            "1,2,3,4",
        ]);
        assert_eq!(config.output, PathBuf::from("output"));
        assert_eq!(config.mask, Some(PathBuf::from("photo_mask.png")));
        assert_eq!(config.mask_suffix, "_mask");
        assert_eq!(config.bbox.as_deref(), Some("1,2,3,4"));
        assert!(!config.save_crops);
    }
}
