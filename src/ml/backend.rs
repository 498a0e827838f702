//! 計算バックエンドの選択
//!
//! 設定の `device_type` に応じて推論エンジンの読み込みと学習を振り分けます。
//! GPU (WGPU) は `wgpu` feature を有効にしたときのみ使用可能。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use tracing::info;

use crate::ml::inference::{ImageScorer, InferenceEngine};
use crate::ml::training::{train_model, EpochStats, TrainingReport};
use crate::model::{AppConfig, DeviceType};

/// CPUバックエンド
pub type CpuBackend = NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = burn_wgpu::Wgpu;

/// 設定に従って推論エンジンを読み込む
pub fn load_scorer(config: &AppConfig) -> Result<Arc<dyn ImageScorer>> {
    let model_path = PathBuf::from(&config.model.model_path);
    info!("推論エンジンを初期化します: {} ({})", model_path.display(), config.device_type);

    match config.device_type {
        DeviceType::Cpu => {
            let engine = InferenceEngine::<CpuBackend>::load(&model_path, NdArrayDevice::Cpu)?;
            Ok(Arc::new(engine))
        }
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            let device = burn_wgpu::WgpuDevice::default();
            let engine = InferenceEngine::<GpuBackend>::load(&model_path, device)?;
            Ok(Arc::new(engine))
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            anyhow::bail!("WGPUバックエンドは無効です。`--features wgpu` を付けてビルドしてください")
        }
    }
}

/// 設定に従って学習を実行する
pub fn run_training<F>(config: &AppConfig, progress_callback: F) -> Result<TrainingReport>
where
    F: FnMut(&EpochStats),
{
    let backbone_weights = config.model.backbone_weights.as_deref().map(Path::new);
    info!("学習バックエンド: {}", config.device_type);

    match config.device_type {
        DeviceType::Cpu => train_model::<Autodiff<CpuBackend>, F>(
            &config.training,
            backbone_weights,
            NdArrayDevice::Cpu,
            progress_callback,
        ),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => train_model::<Autodiff<GpuBackend>, F>(
            &config.training,
            backbone_weights,
            burn_wgpu::WgpuDevice::default(),
            progress_callback,
        ),
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            anyhow::bail!("WGPUバックエンドは無効です。`--features wgpu` を付けてビルドしてください")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.model.model_path = dir.path().join("missing.tar.gz").to_string_lossy().to_string();
        assert!(load_scorer(&config).is_err());
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn test_wgpu_requires_feature() {
        let config = AppConfig {
            device_type: DeviceType::Wgpu,
            ..AppConfig::default()
        };
        assert!(load_scorer(&config).is_err());
    }
}
