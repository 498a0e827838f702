//! 1枚の画像の分類パイプライン
//!
//! 起動時に `AppContext::initialize` でカタログと推論エンジンを用意し、
//! 以降は読み取り専用のコンテキストとして共有します。

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalogue_loader::Catalogue;
use crate::error::ClassifyError;
use crate::ml::{load_scorer, postprocess, ImageScorer};
use crate::model::{load_class_indices, AppConfig, InferenceSettings};
use crate::types::PredictionResult;

/// 信頼度が低いときに利用者へ返す案内
pub const LOW_CONFIDENCE_NOTICE: &str = "Unable to identify with high confidence. \
Try uploading a clearer, well-lit image of the Pokémon for better results.";

/// アップロードされたバイト列をデコードする（JPEG/PNGのみ）
pub fn decode_upload(bytes: &[u8]) -> Result<DynamicImage, ClassifyError> {
    let format = image::guess_format(bytes).map_err(|_| ClassifyError::UnsupportedFormat)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(ClassifyError::UnsupportedFormat);
    }

    Ok(image::load_from_memory_with_format(bytes, format)?)
}

/// 1回の分類結果
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub prediction: PredictionResult,
    /// 確信が持てなかった場合の案内
    pub notice: Option<String>,
    /// カタログ読み込み時のエラー
    pub catalogue_warning: Option<String>,
}

/// アプリケーションコンテキスト（起動後は不変）
pub struct AppContext {
    catalogue: Catalogue,
    scorer: Arc<dyn ImageScorer>,
    settings: InferenceSettings,
}

impl AppContext {
    /// 起動時の初期化
    ///
    /// カタログが読めなくても続行するが、モデルが読めない場合はエラー。
    pub fn initialize(config: &AppConfig) -> Result<Self> {
        let catalogue = Catalogue::load_or_empty(
            Path::new(&config.catalogue.path),
            &config.catalogue.sprite_base_url,
        );

        let scorer = load_scorer(config)?;

        // 外部のクラス対応表がある場合はモデル内の対応表と一致している必要がある
        let class_index_path = Path::new(&config.model.class_index_path);
        if class_index_path.exists() {
            let external = load_class_indices(class_index_path)?;
            if &external != scorer.labels() {
                anyhow::bail!(
                    "クラス対応表 {} がモデルの対応表と一致しません",
                    class_index_path.display()
                );
            }
            debug!("クラス対応表を照合しました: {}", class_index_path.display());
        }

        Ok(Self::with_parts(catalogue, scorer, config.inference))
    }

    /// 構成要素から直接組み立てる
    pub fn with_parts(
        catalogue: Catalogue,
        scorer: Arc<dyn ImageScorer>,
        settings: InferenceSettings,
    ) -> Self {
        let labels = scorer.labels();
        if !catalogue.is_empty() {
            let (missing_metadata, unknown_to_model) = labels.diff_with_catalogue(&catalogue);
            if !missing_metadata.is_empty() {
                warn!(
                    "カタログに存在しないクラスが{}件あります: {:?}",
                    missing_metadata.len(),
                    missing_metadata
                );
            }
            if !unknown_to_model.is_empty() {
                debug!("モデルが分類しないカタログ項目: {}件", unknown_to_model.len());
            }
        }

        info!(
            "分類パイプライン準備完了: {}クラス, カタログ{}件, 閾値 {}",
            labels.len(),
            catalogue.len(),
            settings.confidence_threshold
        );

        Self {
            catalogue,
            scorer,
            settings,
        }
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn scorer(&self) -> &dyn ImageScorer {
        self.scorer.as_ref()
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    /// アップロードされたバイト列を分類する
    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Classification, ClassifyError> {
        let image = decode_upload(bytes)?;
        self.classify_image(&image)
    }

    /// デコード済み画像を分類する
    pub fn classify_image(&self, image: &DynamicImage) -> Result<Classification, ClassifyError> {
        let scores = self.scorer.score(image)?;
        let prediction =
            postprocess(&scores, self.scorer.labels(), &self.catalogue, &self.settings)?;

        debug!(
            "分類結果: {} ({:.3}) confident={}",
            prediction.label, prediction.confidence, prediction.confident
        );

        let notice = (!prediction.confident).then(|| LOW_CONFIDENCE_NOTICE.to_string());

        Ok(Classification {
            prediction,
            notice,
            catalogue_warning: self.catalogue.load_error().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::inference::write_untrained_artifact;
    use crate::ml::CpuBackend;
    use crate::model::{save_class_indices, ClassLabelSet};
    use burn_ndarray::NdArrayDevice;
    use crate::types::{BaseStats, CatalogueEntry};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    /// 常に同じスコアを返すスコアラー
    struct FakeScorer {
        labels: ClassLabelSet,
        scores: Vec<f32>,
    }

    impl ImageScorer for FakeScorer {
        fn score(&self, _image: &DynamicImage) -> Result<Vec<f32>, ClassifyError> {
            Ok(self.scores.clone())
        }

        fn labels(&self) -> &ClassLabelSet {
            &self.labels
        }
    }

    fn entry(id: u32, name: &str) -> CatalogueEntry {
        CatalogueEntry {
            id,
            name: name.to_string(),
            species: "Test".to_string(),
            types: vec!["Fire".to_string()],
            height_m: 0.6,
            weight_kg: 8.5,
            base_stats: BaseStats {
                hp: 39,
                attack: 52,
                defense: 43,
                speed: 65,
                sp_attack: Some(60),
                sp_defense: Some(50),
            },
            pokedex_entry: Some("Test entry".to_string()),
            sprite_url: None,
        }
    }

    fn context(scores: Vec<f32>, catalogue: Catalogue) -> AppContext {
        let labels = ClassLabelSet::new(vec![
            "bulbasaur".to_string(),
            "charmander".to_string(),
            "squirtle".to_string(),
        ]);
        let scorer = Arc::new(FakeScorer { labels, scores });
        AppContext::with_parts(catalogue, scorer, InferenceSettings::default())
    }

    fn starters() -> Catalogue {
        Catalogue::from_entries(vec![
            entry(1, "Bulbasaur"),
            entry(4, "Charmander"),
            entry(7, "Squirtle"),
        ])
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([250, 120, 40])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_confident_classification() {
        let ctx = context(vec![0.1, 0.8, 0.1], starters());
        let result = ctx.classify_bytes(&png_bytes()).unwrap();

        assert!(result.prediction.confident);
        assert_eq!(result.prediction.label, "charmander");
        assert_eq!(result.prediction.entry.as_ref().unwrap().display_number(), "#004");
        assert!(result.notice.is_none());
        assert!(result.catalogue_warning.is_none());
    }

    #[test]
    fn test_low_confidence_notice() {
        let ctx = context(vec![0.3, 0.3, 0.4], starters());
        let result = ctx.classify_bytes(&png_bytes()).unwrap();

        assert!(!result.prediction.confident);
        assert_eq!(result.notice.as_deref(), Some(LOW_CONFIDENCE_NOTICE));
    }

    #[test]
    fn test_empty_catalogue_is_never_confident() {
        let ctx = context(vec![0.0, 1.0, 0.0], Catalogue::empty());
        let result = ctx.classify_bytes(&png_bytes()).unwrap();

        assert_eq!(result.prediction.label, "charmander");
        assert!(!result.prediction.confident);
        assert!(result.notice.is_some());
    }

    #[test]
    fn test_catalogue_warning_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pokedex.json");
        std::fs::write(&path, "{ not json").unwrap();
        let catalogue = Catalogue::load_or_empty(&path, "https://example.com/sprites/");

        let ctx = context(vec![0.1, 0.8, 0.1], catalogue);
        let result = ctx.classify_bytes(&png_bytes()).unwrap();
        assert!(result
            .catalogue_warning
            .as_deref()
            .unwrap()
            .starts_with("Error loading JSON"));
    }

    #[test]
    fn test_unsupported_upload() {
        let ctx = context(vec![0.1, 0.8, 0.1], starters());

        let err = ctx.classify_bytes(b"plain text, not an image").unwrap_err();
        assert!(matches!(err, ClassifyError::UnsupportedFormat));
        assert!(err.is_client_error());

        // GIFは受け付けない
        let err = ctx.classify_bytes(b"GIF89a\x01\x00\x01\x00").unwrap_err();
        assert!(matches!(err, ClassifyError::UnsupportedFormat));
    }

    #[test]
    fn test_truncated_png() {
        let ctx = context(vec![0.1, 0.8, 0.1], starters());
        let bytes = png_bytes();
        let err = ctx.classify_bytes(&bytes[..24]).unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn test_scorer_length_mismatch() {
        let ctx = context(vec![0.5, 0.5], starters());
        let err = ctx.classify_bytes(&png_bytes()).unwrap_err();
        assert!(matches!(err, ClassifyError::LabelMismatch { .. }));
        assert!(!err.is_client_error());
    }

    /// 一時ディレクトリに未学習モデルを置いた設定を作る
    fn config_with_artifact(dir: &Path) -> AppConfig {
        let labels = ClassLabelSet::new(vec![
            "bulbasaur".to_string(),
            "charmander".to_string(),
            "squirtle".to_string(),
        ]);
        let model_path = write_untrained_artifact::<CpuBackend>(
            &dir.join("pokemon_model"),
            &labels,
            16,
            8,
            &NdArrayDevice::Cpu,
        )
        .unwrap();
        save_class_indices(&dir.join("class_names.json"), &labels).unwrap();

        let mut config = AppConfig::default();
        config.model.model_path = model_path.to_string_lossy().to_string();
        config.model.class_index_path = dir.join("class_names.json").to_string_lossy().to_string();
        config.catalogue.path = dir.join("pokedex.json").to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_initialize_with_matching_class_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_artifact(dir.path());

        // カタログファイルは存在しない
        let ctx = AppContext::initialize(&config).unwrap();
        assert!(ctx.catalogue().is_empty());
        assert!(ctx.catalogue().load_error().is_none());
        assert_eq!(ctx.scorer().labels().len(), 3);

        let result = ctx.classify_bytes(&png_bytes()).unwrap();
        assert_eq!(result.prediction.top_k.len(), 3);
        assert!(!result.prediction.confident);
        assert!(result.catalogue_warning.is_none());
    }

    #[test]
    fn test_initialize_rejects_reordered_class_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_artifact(dir.path());

        let reordered = r#"{"bulbasaur": 1, "charmander": 0, "squirtle": 2}"#;
        std::fs::write(&config.model.class_index_path, reordered).unwrap();
        assert!(AppContext::initialize(&config).is_err());
    }

    #[test]
    fn test_initialize_without_class_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_artifact(dir.path());
        let missing = dir.path().join("missing.json");
        config.model.class_index_path = missing.to_string_lossy().to_string();

        assert!(AppContext::initialize(&config).is_ok());
    }

    #[test]
    fn test_initialize_fails_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_artifact(dir.path());
        config.model.model_path = dir.path().join("missing.tar.gz").to_string_lossy().to_string();

        assert!(AppContext::initialize(&config).is_err());
    }

    #[test]
    fn test_initialize_with_malformed_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_artifact(dir.path());
        std::fs::write(&config.catalogue.path, "{ \"Pokedex\": [").unwrap();

        let ctx = AppContext::initialize(&config).unwrap();
        assert!(ctx.catalogue().is_empty());
        let result = ctx.classify_bytes(&png_bytes()).unwrap();
        assert!(result.catalogue_warning.is_some());
    }
}
