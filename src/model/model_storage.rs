//! 学習成果物の永続化
//!
//! モデルとメタデータをtar.gz形式で1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス対応表、入力サイズ、正規化など）
//! - model.bin       - モデルの重み（バイナリ）
//!
//! クラス対応表は `{クラス名: インデックス}` のJSONとしても別ファイルに書き出します。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::info;

use crate::model::class_labels::ClassLabelSet;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// `.tar.gz` で終わるパスに正規化
pub fn artifact_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存先のパスを返す。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = artifact_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで確実に書き切る
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// クラス対応表を `{クラス名: インデックス}` のJSONで保存
pub fn save_class_indices(path: &Path, labels: &ClassLabelSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(&labels.to_class_indices())?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write class index file: {}", path.display()))
}

/// クラス対応表を読み込む
pub fn load_class_indices(path: &Path) -> Result<ClassLabelSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read class index file: {}", path.display()))?;
    let indices: BTreeMap<String, usize> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse class index file: {}", path.display()))?;
    ClassLabelSet::from_class_indices(&indices)
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("クラス数: {}", metadata.num_classes());
    info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    info!("隠れ層: {}", metadata.hidden_size);
    info!("正規化: {:?}", metadata.normalization);
    info!("学習エポック数: {}", metadata.num_epochs);
    info!(
        "学習/検証サンプル数: {} / {}",
        metadata.num_train_samples, metadata.num_val_samples
    );
    if let Some(acc) = metadata.val_accuracy {
        info!("検証精度: {:.2}%", acc);
    }
    info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::preprocess::Normalization;

    fn sample_metadata() -> ModelMetadata {
        let labels = ClassLabelSet::new(vec!["bulbasaur".into(), "charmander".into()]);
        let mut metadata = ModelMetadata::new(&labels, 224, 256, Normalization::ImageNet, 5);
        metadata.val_accuracy = Some(87.5);
        metadata
    }

    #[test]
    fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_metadata();
        let binary = vec![1u8, 2, 3, 4, 5];

        let output = dir.path().join("pokemon_model");
        let saved = save_model_with_metadata(&output, &metadata, &binary).unwrap();
        assert!(saved.to_string_lossy().ends_with("pokemon_model.tar.gz"));

        let (loaded, loaded_binary) = load_model_with_metadata(&saved).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded_binary, binary);
    }

    #[test]
    fn test_class_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_names.json");
        let labels = ClassLabelSet::new(vec![
            "bulbasaur".into(),
            "charmander".into(),
            "squirtle".into(),
        ]);

        save_class_indices(&path, &labels).unwrap();
        let raw: BTreeMap<String, usize> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw["squirtle"], 2);

        assert_eq!(load_class_indices(&path).unwrap(), labels);
    }

    #[test]
    fn test_missing_artifact_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_model_with_metadata(&dir.path().join("nope.tar.gz")).is_err());
    }
}
