//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやモデル・カタログ・学習・サーバ設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalogue_loader::DEFAULT_SPRITE_BASE_URL;

/// 信頼度の閾値（これ未満は「判別できず」として表示）
pub const CONFIDENCE_THRESHOLD: f32 = 0.45;

/// 上位予測の表示件数
pub const TOP_K: usize = 3;

/// モデル入力解像度
pub const IMAGE_SIZE: u32 = 224;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド（`wgpu` feature が必要）
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデル（tar.gz）のパス
    pub model_path: String,
    /// クラス対応表JSONのパス（推論時は存在すればモデル内の対応表と照合する）
    pub class_index_path: String,
    /// バックボーンの事前学習済み重み（burnのNamedMpk形式）
    #[serde(default)]
    pub backbone_weights: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "model/pokemon_model.tar.gz".to_string(),
            class_index_path: "model/class_names.json".to_string(),
            backbone_weights: None,
        }
    }
}

/// カタログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueSettings {
    pub path: String,
    pub sprite_base_url: String,
}

impl Default for CatalogueSettings {
    fn default() -> Self {
        Self {
            path: "pokedex.json".to_string(),
            sprite_base_url: DEFAULT_SPRITE_BASE_URL.to_string(),
        }
    }
}

/// 推論後処理の設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InferenceSettings {
    pub confidence_threshold: f32,
    pub top_k: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            top_k: TOP_K,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// クラスごとのサブディレクトリを持つデータセットのルート
    pub data_dir: String,
    /// 学習済みモデルと対応表の出力先
    pub output_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f32,
    /// クラスごとの最大画像数
    #[serde(default)]
    pub max_per_class: Option<usize>,
    /// 入力画像サイズ（正方形）
    pub image_size: u32,
    /// 隠れ層のユニット数
    pub hidden_size: u32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: "model/data/PokemonData".to_string(),
            output_dir: "model".to_string(),
            num_epochs: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
            max_per_class: None,
            image_size: IMAGE_SIZE,
            hidden_size: 256,
        }
    }
}

/// HTTPサーバ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// アップロードの最大サイズ（バイト）
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8501,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub catalogue: CatalogueSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("モデルパス: {}", self.model.model_path);
        info!("クラス対応表: {}", self.model.class_index_path);
        info!("カタログ: {}", self.catalogue.path);
        info!(
            "信頼度閾値: {} / 上位件数: {}",
            self.inference.confidence_threshold, self.inference.top_k
        );
        info!("待ち受け: {}:{}", self.server.host, self.server.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.inference.confidence_threshold, 0.45);
        assert_eq!(config.inference.top_k, 3);
        assert_eq!(config.training.image_size, 224);
        assert_eq!(config.training.num_epochs, 5);
        assert_eq!(config.training.batch_size, 32);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.inference, deserialized.inference);
        assert_eq!(config.model.model_path, deserialized.model.model_path);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"server": {"host": "127.0.0.1", "port": 9000, "max_upload_bytes": 1024}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.catalogue.path, "pokedex.json");
    }

    #[test]
    fn test_load_or_default_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.server.port, 8501);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
