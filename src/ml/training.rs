//! モデル学習機能
//!
//! クラスごとのサブディレクトリに分かれた画像データセットから、
//! 凍結バックボーン + 全結合ヘッドのモデルを学習して保存します。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Int, Tensor},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::ml::ml_model::{load_backbone, ModelConfig, PokemonClassifier};
use crate::ml::preprocess::{normalize_chw, resize_rgb, Normalization};
use crate::model::{
    save_class_indices, save_model_with_metadata, ClassLabelSet, ModelMetadata, TrainingSettings,
};

/// 学習に使う正規化（推論側はメタデータ経由で同じものを使う）
pub const TRAINING_NORMALIZATION: Normalization = Normalization::ImageNet;

/// 保存するモデルのファイル名（拡張子なし）
pub const MODEL_FILE_STEM: &str = "pokemon_model";

/// 保存するクラス対応表のファイル名
pub const CLASS_INDEX_FILE: &str = "class_names.json";

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// データセットアイテム（リサイズ済みRGB画素）
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub pixels: Vec<u8>,
    pub label: usize,
}

/// 学習データセット
pub struct ImageFolderDataset {
    samples: Vec<ImageItem>,
    labels: ClassLabelSet,
    image_size: u32,
}

impl ImageFolderDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// クラスIDはサブディレクトリ名のソート順。読み込めない画像は警告を出して除外する。
    pub fn from_directory(
        data_dir: &Path,
        image_size: u32,
        max_per_class: Option<usize>,
    ) -> Result<Self> {
        if !data_dir.exists() {
            anyhow::bail!("Dataset path not found: {}", data_dir.display());
        }

        let labels = ClassLabelSet::from_directory(data_dir)?;
        let mut samples = Vec::new();

        for (class_id, class_name) in labels.labels().iter().enumerate() {
            let class_dir = data_dir.join(class_name);

            let mut files: Vec<PathBuf> = std::fs::read_dir(&class_dir)
                .with_context(|| {
                    format!("Failed to read class directory: {}", class_dir.display())
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            files.sort();
            if let Some(max) = max_per_class {
                files.truncate(max);
            }

            let mut loaded = 0usize;
            for path in files {
                match image::open(&path) {
                    Ok(img) => {
                        samples.push(ImageItem {
                            pixels: resize_rgb(&img, image_size).into_raw(),
                            label: class_id,
                        });
                        loaded += 1;
                    }
                    Err(e) => {
                        warn!("画像読み込み失敗のため除外します {}: {}", path.display(), e);
                    }
                }
            }

            info!("  Class {}: {} ({} samples)", class_id, class_name, loaded);
        }

        if samples.is_empty() {
            anyhow::bail!("No training samples found in {}", data_dir.display());
        }

        info!("Loaded {} samples from {} classes", samples.len(), labels.len());

        Ok(Self {
            samples,
            labels,
            image_size,
        })
    }

    pub fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// データセットを学習用と検証用に分割
    ///
    /// 固定シードでシャッフルし、末尾 `validation_split` の割合を検証用にする。
    pub fn split(self, validation_split: f32, seed: u64) -> (Self, Self) {
        let mut samples = self.samples;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let total_len = samples.len();
        let val_len = ((total_len as f32 * validation_split.clamp(0.0, 1.0)) as usize)
            .min(total_len.saturating_sub(1));
        let val_samples = samples.split_off(total_len - val_len);

        let train = Self {
            samples,
            labels: self.labels.clone(),
            image_size: self.image_size,
        };
        let val = Self {
            samples: val_samples,
            labels: self.labels,
            image_size: self.image_size,
        };
        (train, val)
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    normalization: Normalization,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: usize, normalization: Normalization) -> Self {
        Self {
            device,
            image_size,
            normalization,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            let pixel_len = item.pixels.len();
            let rgb = match image::RgbImage::from_raw(size as u32, size as u32, item.pixels) {
                Some(rgb) => rgb,
                None => {
                    warn!(
                        "画素数が入力サイズ {}x{} と一致しません ({} バイト, クラス {})。黒画像で代用します",
                        size, size, pixel_len, item.label
                    );
                    image::RgbImage::new(size as u32, size as u32)
                }
            };
            all_pixels.extend(normalize_chw(&rgb, self.normalization));
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// 1エポック分の学習結果
#[derive(Debug, Clone, serde::Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// 検証データが無い場合はNone
    pub val_accuracy: Option<f64>,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub class_index_path: PathBuf,
    pub labels: ClassLabelSet,
    pub epochs: Vec<EpochStats>,
}

impl TrainingReport {
    pub fn final_val_accuracy(&self) -> Option<f64> {
        self.epochs.last().and_then(|e| e.val_accuracy)
    }
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = output.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// データセット全体の正解率（%）
pub fn evaluate<B: Backend>(
    model: &PokemonClassifier<B>,
    dataset: &ImageFolderDataset,
    batcher: &ImageBatcher<B>,
    batch_size: usize,
) -> Option<f64> {
    let len = dataset.len();
    if len == 0 {
        return None;
    }

    let mut correct = 0usize;
    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size.max(1)).min(len);
        let items: Vec<ImageItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let batch = batcher.batch(items, &batcher.device);
        let output = model.forward(batch.images);
        correct += count_correct(output, batch.targets);
    }

    Some(100.0 * correct as f64 / len as f64)
}

/// モデル学習を実行
///
/// 学習済みモデル `<output_dir>/pokemon_model.tar.gz` と
/// クラス対応表 `<output_dir>/class_names.json` を書き出す。
pub fn train_model<B, F>(
    settings: &TrainingSettings,
    backbone_weights: Option<&Path>,
    device: B::Device,
    mut progress_callback: F,
) -> Result<TrainingReport>
where
    B: AutodiffBackend,
    F: FnMut(&EpochStats),
{
    let data_dir = PathBuf::from(&settings.data_dir);
    let output_dir = PathBuf::from(&settings.output_dir);
    let image_size = settings.image_size as usize;
    let batch_size = settings.batch_size.max(1);

    info!("Loading dataset from: {}", data_dir.display());
    let dataset =
        ImageFolderDataset::from_directory(&data_dir, settings.image_size, settings.max_per_class)?;
    let labels = dataset.labels().clone();
    info!("Classes found: {:?}", labels.to_class_indices());

    // 学習/検証データに分割
    let (dataset_train, dataset_val) = dataset.split(settings.validation_split, settings.seed);
    info!("学習データ: {} 枚", dataset_train.len());
    info!("検証データ: {} 枚", dataset_val.len());

    let model_config = ModelConfig::new(labels.len())
        .with_image_size(image_size)
        .with_hidden_size(settings.hidden_size as usize);
    model_config.validate()?;

    let mut model: PokemonClassifier<B> = match backbone_weights {
        Some(path) => {
            info!("バックボーン重みを読み込みます: {}", path.display());
            let backbone = load_backbone::<B>(&model_config, path, &device)?;
            model_config.init_with_backbone(backbone, &device)
        }
        None => {
            warn!("バックボーン重みが指定されていません。ランダム初期化のまま凍結します");
            model_config.init::<B>(&device)
        }
    };
    info!(
        "モデル設定: {} クラス, 入力サイズ: {}x{}, 隠れ層: {}, パラメータ数: {}",
        labels.len(),
        image_size,
        image_size,
        settings.hidden_size,
        model.num_params()
    );

    let mut optimizer = AdamConfig::new().init::<B, PokemonClassifier<B>>();
    let batcher_train = ImageBatcher::<B>::new(device.clone(), image_size, TRAINING_NORMALIZATION);

    info!(
        "学習を開始します: エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, batch_size, settings.learning_rate
    );

    let mut rng = rand::rngs::StdRng::seed_from_u64(settings.seed);
    let mut history = Vec::with_capacity(settings.num_epochs);

    for epoch in 1..=settings.num_epochs {
        let mut indices: Vec<usize> = (0..dataset_train.len()).collect();
        indices.shuffle(&mut rng);

        let mut epoch_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut total = 0usize;

        for chunk in indices.chunks(batch_size) {
            let items: Vec<ImageItem> =
                chunk.iter().filter_map(|&i| dataset_train.get(i)).collect();
            if items.is_empty() {
                continue;
            }

            let batch = batcher_train.batch(items, &device);
            let item = model.forward_classification(batch.images, batch.targets);

            epoch_loss += item.loss.clone().into_scalar().elem::<f64>();
            num_batches += 1;
            total += item.targets.dims()[0];
            correct += count_correct(item.output.clone(), item.targets.clone());

            let grads = item.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);
        }

        // 検証
        let inner_model = model.valid();
        let inner_device = inner_model.devices().into_iter().next().unwrap_or_default();
        let batcher_val =
            ImageBatcher::<B::InnerBackend>::new(inner_device, image_size, TRAINING_NORMALIZATION);
        let val_accuracy = evaluate(&inner_model, &dataset_val, &batcher_val, batch_size);

        let stats = EpochStats {
            epoch,
            total_epochs: settings.num_epochs,
            train_loss: epoch_loss / num_batches.max(1) as f64,
            train_accuracy: 100.0 * correct as f64 / total.max(1) as f64,
            val_accuracy,
        };
        info!(
            "Epoch {}/{}: loss = {:.4}, acc = {:.2}%, val_acc = {}",
            stats.epoch,
            stats.total_epochs,
            stats.train_loss,
            stats.train_accuracy,
            stats
                .val_accuracy
                .map(|a| format!("{:.2}%", a))
                .unwrap_or_else(|| "-".to_string())
        );
        progress_callback(&stats);
        history.push(stats);
    }

    // モデルの重みをバイナリ化
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = model.valid().into_record();
    let model_binary = Recorder::<B::InnerBackend>::record(&recorder, record, ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;
    info!(
        "モデルバイナリサイズ: {} バイト ({:.2} MB)",
        model_binary.len(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    let mut metadata = ModelMetadata::new(
        &labels,
        settings.image_size,
        settings.hidden_size,
        TRAINING_NORMALIZATION,
        settings.num_epochs as u32,
    );
    metadata.backbone_weights = backbone_weights.map(|p| p.to_string_lossy().to_string());
    metadata.num_train_samples = dataset_train.len();
    metadata.num_val_samples = dataset_val.len();
    metadata.val_accuracy = history.last().and_then(|s| s.val_accuracy);

    let model_path =
        save_model_with_metadata(&output_dir.join(MODEL_FILE_STEM), &metadata, &model_binary)?;
    info!("MODEL SAVED AT: {}", model_path.display());

    let class_index_path = output_dir.join(CLASS_INDEX_FILE);
    save_class_indices(&class_index_path, &labels)?;
    info!("CLASS NAMES SAVED AT: {}", class_index_path.display());

    Ok(TrainingReport {
        model_path,
        class_index_path,
        labels,
        epochs: history,
    })
}
