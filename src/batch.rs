use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::codec::{encode_png, load_image, load_mask};
use crate::errors::{Result, SegError};
use crate::region::Region;
use crate::response::SegmentationResponse;
use crate::traits::SegmentationModel;
use crate::{SegmentRequest, Segmenter};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub mask_suffix: String,
    pub save_crops: bool,
    pub show_progress: bool,
}

impl BatchOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            mask_suffix: "_mask".to_string(),
            save_crops: false,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub regions: usize,
}

pub fn is_supported_image_format(path: &Path) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "avif"
        )
    } else {
        false
    }
}

/// `dir/photo.jpg` -> `dir/photo<suffix>.png`
pub fn mask_path_for(image_path: &Path, suffix: &str) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image_path.with_file_name(format!("{stem}{suffix}.png"))
}

pub fn is_mask_file(path: &Path, suffix: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| !suffix.is_empty() && stem.ends_with(suffix))
}

pub fn collect_image_files(input_dir: &Path, mask_suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_supported_image_format(p) && !is_mask_file(p, mask_suffix))
        .collect();
    files.sort();
    files
}

pub fn relative_path(input_file: &Path, input_dir: &Path) -> Result<PathBuf> {
    input_file
        .strip_prefix(input_dir)
        .map(Path::to_path_buf)
        .map_err(|_| SegError::FileSystem {
            path: input_file.to_path_buf(),
            operation: "相対パス取得".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "input file is not inside the input directory",
            ),
        })
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SegError::FileSystem {
            path: parent.to_path_buf(),
            operation: "出力ディレクトリ作成".to_string(),
            source: e,
        })?;
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    create_parent(path)?;
    fs::write(path, bytes).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "ファイル書き込み".to_string(),
        source: e,
    })
}

/// 切り抜き画像はJSONの隣に置く: `photo.json` -> `photo_0.png`, `photo_1.png`, ...
pub fn crop_path(json_path: &Path, index: usize) -> PathBuf {
    let stem = json_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    json_path.with_file_name(format!("{stem}_{index}.png"))
}

/// 画像一枚をセグメンテーションし、JSONレスポンス（と任意で切り抜き）を書き出す。
/// 書き出した領域数を返す。
pub fn process_file<M: SegmentationModel>(
    segmenter: &Segmenter<M>,
    image_path: &Path,
    mask_path: Option<&Path>,
    json_path: &Path,
    save_crops: bool,
) -> Result<usize> {
    let image = load_image(image_path)?;
    let request = match mask_path {
        Some(mask_path) => SegmentRequest::guided(image, load_mask(mask_path)?),
        None => SegmentRequest::automatic(image),
    };

    let regions = segmenter.segment(&request)?;
    write_outputs(&regions, json_path, save_crops)?;
    Ok(regions.len())
}

fn write_outputs(regions: &[Region], json_path: &Path, save_crops: bool) -> Result<()> {
    let response = SegmentationResponse::from_regions(regions)?;
    write_file(json_path, response.to_json()?.as_bytes())?;

    if save_crops {
        for (index, region) in regions.iter().enumerate() {
            write_file(&crop_path(json_path, index), &encode_png(&region.image)?)?;
        }
    }
    Ok(())
}

/// `options.input_dir` 以下の全画像を処理し、ディレクトリ構造を `options.output_dir` に再現する。
/// ファイル単位の失敗はログに記録して数えるだけで、全体は中断しない。
pub fn process_directory<M: SegmentationModel>(
    segmenter: &Segmenter<M>,
    options: &BatchOptions,
) -> Result<BatchSummary> {
    let input_dir = &options.input_dir;
    if !input_dir.is_dir() {
        return Err(SegError::FileSystem {
            path: input_dir.clone(),
            operation: "ディレクトリ存在確認".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "input directory does not exist",
            ),
        });
    }
    fs::create_dir_all(&options.output_dir).map_err(|e| SegError::FileSystem {
        path: options.output_dir.clone(),
        operation: "出力ディレクトリ作成".to_string(),
        source: e,
    })?;

    let image_files = collect_image_files(input_dir, &options.mask_suffix);
    if image_files.is_empty() {
        info!(input = %input_dir.display(), "no images to process");
        return Ok(BatchSummary::default());
    }

    let pb = if options.show_progress {
        ProgressBar::new(image_files.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )
        .map_err(|e| SegError::Configuration {
            message: format!("invalid progress template: {e}"),
        })?
        .progress_chars("#>-"),
    );

    let outcomes: Vec<Result<usize>> = image_files
        .par_iter()
        .map(|image_path| {
            let outcome = relative_path(image_path, input_dir).and_then(|relative| {
                let mask_path = mask_path_for(image_path, &options.mask_suffix);
                let mask = mask_path.is_file().then_some(mask_path.as_path());
                let json_path = options.output_dir.join(relative).with_extension("json");
                process_file(segmenter, image_path, mask, &json_path, options.save_crops)
            });
            if let Err(err) = &outcome {
                warn!(path = %image_path.display(), error = %err, "failed to process image");
            }
            pb.inc(1);
            outcome
        })
        .collect();
    pb.finish_and_clear();

    let summary = outcomes.iter().fold(BatchSummary::default(), |mut acc, outcome| {
        match outcome {
            Ok(regions) => {
                acc.processed += 1;
                acc.regions += regions;
            }
            Err(_) => acc.failed += 1,
        }
        acc
    });

    info!(
        processed = summary.processed,
        failed = summary.failed,
        regions = summary.regions,
        "batch finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.txt", false),
            ("test", false),
        ];
        for (filename, expected) in test_cases {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected);
        }
    }

    #[test]
    fn test_mask_pairing() {
        let image = Path::new("in/sub/cat.jpg");
        assert_eq!(mask_path_for(image, "_mask"), Path::new("in/sub/cat_mask.png"));
        assert!(is_mask_file(Path::new("in/sub/cat_mask.png"), "_mask"));
        assert!(!is_mask_file(image, "_mask"));
        assert!(!is_mask_file(image, ""));
    }

    #[test]
    fn test_relative_path_calculation() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let test_file = input_dir.join("subdir").join("test.jpg");

        assert_eq!(relative_path(&test_file, &input_dir)?, Path::new("subdir/test.jpg"));
        assert!(relative_path(Path::new("/elsewhere/x.jpg"), &input_dir).is_err());
        Ok(())
    }

    #[test]
    fn test_crop_path() {
        assert_eq!(crop_path(Path::new("out/a/cat.json"), 2), Path::new("out/a/cat_2.png"));
    }
}
