use parking_lot::Mutex;
use tracing::{info, warn};

use crate::errors::{Result, SegError};
use crate::traits::SegmentationModel;

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxSam, OnnxSamConfig};

type Loader<M> = Box<dyn Fn() -> Result<M> + Send + Sync>;

enum ModelState<M> {
    Unloaded,
    Ready(M),
}

/// 遅延ロードされる共有モデルハンドル
///
/// モデルは一つのミューテックスの中にあり、[`ModelService::with_model`] 内の
/// `set_image` と `predict` が他の呼び出しと交錯することはない。
pub struct ModelService<M> {
    state: Mutex<ModelState<M>>,
    loader: Option<Loader<M>>,
}

impl<M: SegmentationModel> ModelService<M> {
    /// 未ロード状態で開始。`loader` は初回使用時と [`ModelService::unload`] 後に実行される
    pub fn lazy(loader: impl Fn() -> Result<M> + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(ModelState::Unloaded),
            loader: Some(Box::new(loader)),
        }
    }

    /// ロード済みモデルをラップ（アンロード後は再ロードできない）
    pub fn ready(model: M) -> Self {
        Self {
            state: Mutex::new(ModelState::Ready(model)),
            loader: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), ModelState::Ready(_))
    }

    /// モデルへの排他アクセスで `f` を実行（必要ならロードする）
    ///
    /// ロード失敗は `ModelUnavailable` となり、状態は未ロードのまま残るため
    /// 次の呼び出しで再試行できる。
    pub fn with_model<T>(&self, f: impl FnOnce(&mut M) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();

        if let ModelState::Unloaded = *state {
            let loader = self.loader.as_ref().ok_or_else(|| SegError::ModelUnavailable {
                reason: "model has been unloaded".to_string(),
            })?;
            let model = loader().map_err(|err| {
                warn!(error = %err, "model load failed");
                match err {
                    SegError::ModelUnavailable { .. } => err,
                    other => SegError::ModelUnavailable {
                        reason: other.to_string(),
                    },
                }
            })?;
            info!("model loaded");
            *state = ModelState::Ready(model);
        }

        match &mut *state {
            ModelState::Ready(model) => f(model),
            ModelState::Unloaded => Err(SegError::internal("モデルアクセス", "model not loaded")),
        }
    }

    /// ロード済みモデルを破棄
    pub fn unload(&self) {
        let mut state = self.state.lock();
        if let ModelState::Ready(_) = *state {
            info!("model unloaded");
        }
        *state = ModelState::Unloaded;
    }
}
