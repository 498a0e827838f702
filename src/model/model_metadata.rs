//! 学習済みモデルのメタデータ
//!
//! tar.gz形式でモデルの重みと一緒に保存され、推論時にネットワーク構成と
//! クラス対応表・前処理を復元するために使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::preprocess::Normalization;
use crate::model::class_labels::ClassLabelSet;

/// モデルメタデータ
///
/// tar.gz内のファイル構成：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力インデックス順のクラス名
    /// 例: ["bulbasaur", "charmander", "squirtle"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常224）
    pub image_size: u32,

    /// 隠れ層のユニット数
    pub hidden_size: u32,

    /// 学習時に使用した正規化（推論時も同じものを使う）
    pub normalization: Normalization,

    /// バックボーンの初期重みファイル（指定された場合）
    #[serde(default)]
    pub backbone_weights: Option<String>,

    pub num_epochs: u32,

    pub num_train_samples: usize,
    pub num_val_samples: usize,

    /// 最終エポックの検証精度（%）
    #[serde(default)]
    pub val_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成（学習時刻は現在時刻）
    pub fn new(
        labels: &ClassLabelSet,
        image_size: u32,
        hidden_size: u32,
        normalization: Normalization,
        num_epochs: u32,
    ) -> Self {
        Self {
            class_labels: labels.labels().to_vec(),
            image_size,
            hidden_size,
            normalization,
            backbone_weights: None,
            num_epochs,
            num_train_samples: 0,
            num_val_samples: 0,
            val_accuracy: None,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn label_set(&self) -> ClassLabelSet {
        ClassLabelSet::new(self.class_labels.clone())
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
