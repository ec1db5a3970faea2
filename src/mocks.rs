use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;

use crate::automatic::box_mask;
use crate::errors::{Result, SegError};
use crate::mask::{BoundingBox, Mask};
use crate::prompt::Prompt;
use crate::traits::{Candidate, SegmentationModel};
use crate::transform::Resolution;

/// モックの応答方法
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 常に候補なし
    Empty,
    /// ボックスプロンプトに対し、ボックス全体（低スコア）と
    /// 内接楕円にノイズを加えたもの（高スコア）を返す
    EchoBox,
    /// 点プロンプトを含むオブジェクトを返す
    Objects { masks: Vec<Mask>, score: f32 },
}

/// テスト用のモックセグメンテーションモデル
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    response: MockResponse,
    automatic: Option<Vec<Candidate>>,
    current: Option<Resolution>,
    set_image_calls: Arc<AtomicUsize>,
    predict_calls: Arc<AtomicUsize>,
}

impl MockSegmentationModel {
    pub fn new(response: MockResponse) -> Self {
        Self {
            response,
            automatic: None,
            current: None,
            set_image_calls: Arc::new(AtomicUsize::new(0)),
            predict_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn echo_box() -> Self {
        Self::new(MockResponse::EchoBox)
    }

    pub fn with_objects(masks: Vec<Mask>) -> Self {
        Self::new(MockResponse::Objects { masks, score: 0.95 })
    }

    /// `Objects` 応答のスコアを変更
    pub fn with_object_score(mut self, new_score: f32) -> Self {
        if let MockResponse::Objects { score, .. } = &mut self.response {
            *score = new_score;
        }
        self
    }

    /// `generate` がグリッド探索の代わりに返す固定の候補
    pub fn with_automatic(mut self, candidates: Vec<Candidate>) -> Self {
        self.automatic = Some(candidates);
        self
    }

    pub fn set_image_calls(&self) -> usize {
        self.set_image_calls.load(Ordering::SeqCst)
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    /// 呼び出し回数カウンタ（モデルを `ModelService` に渡した後も参照できる）
    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (
            Arc::clone(&self.set_image_calls),
            Arc::clone(&self.predict_calls),
        )
    }

    fn echo_box_candidates(resolution: Resolution, bbox: &BoundingBox) -> Vec<Candidate> {
        let full = box_mask(resolution, bbox);

        let cx = (bbox.x_min + bbox.x_max) as f32 / 2.0;
        let cy = (bbox.y_min + bbox.y_max) as f32 / 2.0;
        let rx = (bbox.width() as f32 / 2.0).max(1.0);
        let ry = (bbox.height() as f32 / 2.0).max(1.0);
        let mut ellipse = Mask::from_fn(resolution.width, resolution.height, |x, y| {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            dx * dx + dy * dy <= 1.0
        });

        // ピンホールと領域外のスペックル
        let (w, h) = (resolution.width, resolution.height);
        ellipse.set(cx as u32, cy as u32, false);
        ellipse.set(w - 1, h - 1, true);
        ellipse.set(0, h - 1, true);
        ellipse.set(w - 1, 0, true);

        vec![Candidate::new(full, 0.5), Candidate::new(ellipse, 0.9)]
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.set_image_calls.fetch_add(1, Ordering::SeqCst);
        self.current = Some(Resolution::of_image(image));
        Ok(())
    }

    fn predict(&mut self, prompt: &Prompt, multimask: bool) -> Result<Vec<Candidate>> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        let resolution = self
            .current
            .ok_or_else(|| SegError::internal("モック推論", "no image set"))?;

        let mut candidates = match &self.response {
            MockResponse::Empty => Vec::new(),
            MockResponse::EchoBox => prompt
                .bbox
                .map(|bbox| Self::echo_box_candidates(resolution, &bbox))
                .unwrap_or_default(),
            MockResponse::Objects { masks, score } => prompt
                .points
                .iter()
                .flat_map(|p| {
                    masks
                        .iter()
                        .filter(move |m| {
                            let (x, y) = (p.x as u32, p.y as u32);
                            x < m.width() && y < m.height() && m.get(x, y)
                        })
                        .map(|m| Candidate::new(m.clone(), *score))
                })
                .collect(),
        };

        if !multimask {
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            candidates.truncate(1);
        }
        Ok(candidates)
    }

    fn generate(&mut self, image: &RgbImage) -> Result<Vec<Candidate>> {
        match self.automatic.clone() {
            Some(candidates) => {
                self.set_image(image)?;
                Ok(candidates)
            }
            None => crate::automatic::generate_with_grid(self, image, &Default::default()),
        }
    }
}

/// テスト用のファクトリー関数
pub fn create_mock_model() -> MockSegmentationModel {
    MockSegmentationModel::echo_box()
}
