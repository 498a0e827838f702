//! モデル推論機能

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use image::DynamicImage;
use tracing::info;

use crate::error::ClassifyError;
use crate::ml::ml_model::{ModelConfig, PokemonClassifier};
use crate::ml::preprocess::{preprocess, Normalization};
use crate::model::{load_model_with_metadata, log_metadata_info, ClassLabelSet, ModelMetadata};

/// 画像からクラスごとのスコアを返すもの
///
/// スコアの並びは `labels()` の順序と一致する。
pub trait ImageScorer: Send + Sync {
    fn score(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassifyError>;

    fn labels(&self) -> &ClassLabelSet;
}

/// 推論エンジン
///
/// モデルは起動時に一度だけ読み込み、以降は読み取り専用。
/// 順伝播は1件ずつ直列に実行する。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<PokemonClassifier<B>>,
    labels: ClassLabelSet,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// 学習済みモデル（tar.gz）を読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            anyhow::bail!("Model not found at: {}", model_path.display());
        }

        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        log_metadata_info(&metadata);

        let labels = metadata.label_set();
        let model_config = ModelConfig::new(labels.len())
            .with_image_size(metadata.image_size as usize)
            .with_hidden_size(metadata.hidden_size as usize);
        model_config.validate()?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model_config.init::<B>(&device).load_record(record);

        if model.num_classes() != labels.len() {
            anyhow::bail!(
                "モデルの出力数({})とクラス対応表({})が一致しません",
                model.num_classes(),
                labels.len()
            );
        }

        info!(
            "モデルを読み込みました: {} ({}クラス)",
            model_path.display(),
            labels.len()
        );

        Ok(Self {
            model: Mutex::new(model),
            labels,
            metadata,
            device,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn normalization(&self) -> Normalization {
        self.metadata.normalization
    }
}

impl<B: Backend> ImageScorer for InferenceEngine<B> {
    fn score(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassifyError> {
        let size = self.metadata.image_size;
        let data = preprocess(image, size, self.metadata.normalization);

        // Tensorに変換 [1, 3, size, size]
        let size = size as usize;
        let tensor = Tensor::<B, 1>::from_floats(data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        // 重みは読み取り専用なので、他のリクエストがパニックしても続行できる
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let probabilities = model.forward_probabilities(tensor);

        probabilities
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("推論結果の取得エラー: {:?}", e)))
    }

    fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }
}

/// 未学習（ランダム初期化）のモデルを成果物として書き出す
///
/// 学習を回さずに読み込み経路を確認したいときに使う。
#[cfg(test)]
pub(crate) fn write_untrained_artifact<B: Backend>(
    output_path: &Path,
    labels: &ClassLabelSet,
    image_size: u32,
    hidden_size: u32,
    device: &B::Device,
) -> Result<std::path::PathBuf> {
    let model_config = ModelConfig::new(labels.len())
        .with_image_size(image_size as usize)
        .with_hidden_size(hidden_size as usize);
    model_config.validate()?;

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = model_config.init::<B>(device).into_record();
    let model_binary = Recorder::<B>::record(&recorder, record, ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        labels,
        image_size,
        hidden_size,
        Normalization::default(),
        0,
    );
    crate::model::save_model_with_metadata(output_path, &metadata, &model_binary)
}
