//! 機械学習モデルの共通定義
//!
//! 凍結したバックボーン（特徴抽出CNN）の上に、全体平均プーリングと
//! 2層の全結合ヘッドを載せた分類モデルを提供します。

use std::path::Path;

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use tracing::debug;

/// バックボーン各層の出力チャネル数
pub const BACKBONE_CHANNELS: [usize; 3] = [32, 64, 128];

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    /// 隠れ層のユニット数
    #[config(default = 256)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// バックボーン最終層の特徴マップサイズ
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2): size -> size / 2 (切り捨て)
    pub fn feature_map_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(2);
        let after_pool1 = after_conv1 / 2;
        let after_conv2 = after_pool1.saturating_sub(2);
        let after_pool2 = after_conv2 / 2;
        after_pool2.saturating_sub(2)
    }

    /// 構成が成立するか検証
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            anyhow::bail!("クラス数が0です");
        }
        if self.feature_map_size() == 0 {
            anyhow::bail!("入力サイズが小さすぎます: {} (最小14x14が必要)", self.image_size);
        }
        if self.hidden_size == 0 {
            anyhow::bail!("隠れ層のユニット数が0です");
        }
        Ok(())
    }

    /// バックボーンを初期化（重みはランダム）
    pub fn init_backbone<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let [c1, c2, c3] = BACKBONE_CHANNELS;
        Backbone {
            conv1: Conv2dConfig::new([3, c1], [3, 3]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).init(),
            conv2: Conv2dConfig::new([c1, c2], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).init(),
            conv3: Conv2dConfig::new([c2, c3], [3, 3]).init(device),
            activation: Relu::new(),
        }
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> PokemonClassifier<B> {
        self.init_with_backbone(self.init_backbone(device), device)
    }

    /// 既存のバックボーンを凍結してヘッドを載せる
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: Backbone<B>,
        device: &B::Device,
    ) -> PokemonClassifier<B> {
        let features = BACKBONE_CHANNELS[2];
        let fm = self.feature_map_size();

        debug!("[Model] 入力サイズ: {}x{}", self.image_size, self.image_size);
        debug!("[Model] バックボーン出力: {} x {}x{}", features, fm, fm);
        debug!("[Model] GAP後の特徴次元: {}", features);
        debug!("[Model] FC1: {} -> {}", features, self.hidden_size);
        debug!("[Model] FC2: {} -> {}", self.hidden_size, self.num_classes);

        PokemonClassifier {
            backbone: backbone.no_grad(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(features, self.hidden_size).init(device),
            output: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 特徴抽出用のCNN
///
/// {Conv 3x3 (no padding) + ReLU + MaxPool} x 2, Conv 3x3 + ReLU
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // 32 -> 64
    pool2: MaxPool2d,
    conv3: Conv2d<B>, // 64 -> 128
    activation: Relu,
}

impl<B: Backend> Backbone<B> {
    /// `images`: [batch_size, 3, size, size] -> [batch_size, 128, h, w]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        self.activation.forward(x)
    }
}

/// 事前学習済みのバックボーン重みを読み込む（burnのNamedMpk形式）
pub fn load_backbone<B: Backend>(
    config: &ModelConfig,
    path: &Path,
    device: &B::Device,
) -> Result<Backbone<B>> {
    config
        .init_backbone::<B>(device)
        .load_file(path.to_path_buf(), &DefaultFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| anyhow::anyhow!("バックボーン重みの読み込みエラー ({}): {:?}", path.display(), e))
}

/// ポケモン分類モデル
///
/// # アーキテクチャ
/// - バックボーン（凍結、重みは更新しない）
/// - Global Average Pooling
/// - FC: 128 -> hidden + ReLU
/// - FC: hidden -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct PokemonClassifier<B: Backend> {
    backbone: Backbone<B>,
    pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> PokemonClassifier<B> {
    /// 順伝播
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.backbone.forward(images);
        let x = self.pool.forward(x);
        let [_, c, _, _] = x.dims();
        let x = x.reshape([batch_size, c]);

        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        self.output.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    pub fn num_classes(&self) -> usize {
        let [_, num_classes] = self.output.weight.dims();
        num_classes
    }
}
