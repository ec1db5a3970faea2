use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use seg_refine::batch::{self, BatchOptions};
use seg_refine::transform::LOW_RES_PROMPT_SIZE;
use seg_refine::{logging, Config, ModelService, OnnxSam, OnnxSamConfig, PipelineConfig, Segmenter};

fn main() -> Result<()> {
    let config = Config::parse();
    logging::init(config.verbose)?;

    ensure!(config.input.exists(), "Input path does not exist: {}", config.input.display());
    ensure!(
        config.encoder.is_file(),
        "Encoder checkpoint does not exist: {}",
        config.encoder.display()
    );
    ensure!(
        config.decoder.is_file(),
        "Decoder checkpoint does not exist: {}",
        config.decoder.display()
    );
    if let Some(mask) = &config.mask {
        ensure!(mask.is_file(), "Mask file does not exist: {}", mask.display());
        ensure!(config.input.is_file(), "--mask requires a single input image");
    }
    if let Some(bbox) = &config.bbox {
        debug!(bbox = %bbox, "ignoring legacy bounding box argument");
    }

    let pipeline = match &config.pipeline_config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load pipeline config: {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    ensure!(
        pipeline.low_res_size == LOW_RES_PROMPT_SIZE,
        "The ONNX decoder takes a {size}x{size} mask prior, got low_res_size {}",
        pipeline.low_res_size,
        size = LOW_RES_PROMPT_SIZE
    );

    if let Some(threads) = config.num_threads {
        ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    }

    let sam_config = OnnxSamConfig {
        encoder_path: config.encoder.clone(),
        decoder_path: config.decoder.clone(),
        device_id: config.device_id,
        num_threads: config.num_threads,
        automatic: pipeline.automatic.clone(),
    };
    let model = ModelService::lazy(move || OnnxSam::new(&sam_config));
    let segmenter = Segmenter::new(model, pipeline);

    if config.input.is_dir() {
        let options = BatchOptions {
            input_dir: config.input.clone(),
            output_dir: config.output.clone(),
            mask_suffix: config.mask_suffix.clone(),
            save_crops: config.save_crops,
            show_progress: true,
        };
        let summary = batch::process_directory(&segmenter, &options)?;
        ensure!(
            summary.failed == 0,
            "{} of {} images failed",
            summary.failed,
            summary.failed + summary.processed
        );
    } else {
        let json_path = single_output_path(&config.input, &config.output)?;
        let regions = batch::process_file(
            &segmenter,
            &config.input,
            config.mask.as_deref(),
            &json_path,
            config.save_crops,
        )
        .with_context(|| format!("Failed to segment {}", config.input.display()))?;
        info!(regions, output = %json_path.display(), "done");
    }

    Ok(())
}

/// 既存ディレクトリ（または拡張子なし）なら `<stem>.json` をその中に、それ以外はファイル名として使う
fn single_output_path(input: &Path, output: &Path) -> Result<PathBuf> {
    if output.is_dir() || output.extension().is_none() {
        fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory: {}", output.display()))?;
        let stem = input.file_stem().context("Input has no file name")?;
        return Ok(output.join(stem).with_extension("json"));
    }
    Ok(output.to_path_buf())
}
