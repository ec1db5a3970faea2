use image::RgbImage;

use crate::automatic::{generate_with_grid, AutomaticParams};
use crate::errors::Result;
use crate::mask::Mask;
use crate::prompt::Prompt;

/// モデルが返すマスク候補
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub mask: Mask,
    /// モデルが予測した品質スコア（IoU推定値）
    pub score: f32,
}

impl Candidate {
    pub const fn new(mask: Mask, score: f32) -> Self {
        Self { mask, score }
    }
}

/// プロンプト可能なセグメンテーションモデルの抽象化
///
/// `set_image` と `predict` は状態を共有するため、呼び出し側は
/// 両者を一つの排他区間で実行する（[`crate::model::ModelService`] を参照）。
pub trait SegmentationModel: Send {
    /// 以降の `predict` が対象とする画像を設定
    fn set_image(&mut self, image: &RgbImage) -> Result<()>;

    /// 最後に設定した画像に対してプロンプトから候補マスクを予測
    ///
    /// マスクは `set_image` に渡した画像と同じ解像度で返す。
    fn predict(&mut self, prompt: &Prompt, multimask: bool) -> Result<Vec<Candidate>>;

    /// 画像全体の自動セグメンテーション
    ///
    /// 既定ではグリッド上の点プロンプトから候補を生成する。
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<Candidate>> {
        generate_with_grid(self, image, &AutomaticParams::default())
    }
}
