//! エラー型の定義
//!
//! 起動時の致命的なエラーは `anyhow` で伝播させ、
//! 劣化運転・リクエスト単位で回復可能なエラーはここで型として定義します。

use std::path::PathBuf;

use thiserror::Error;

/// カタログ読み込みエラー（起動時・劣化運転）
#[derive(Error, Debug)]
pub enum CatalogueError {
    #[error("カタログファイルが見つかりません: {0}")]
    NotFound(PathBuf),

    #[error("カタログファイルの読み込みエラー ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("カタログファイルの解析エラー ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("スプライトURLの組み立てエラー: {0}")]
    SpriteUrl(#[from] url::ParseError),
}

/// 1リクエスト分の分類処理で発生するエラー
///
/// いずれもそのリクエストの中で完結し、プロセス状態には影響しない。
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("対応していない画像形式です（JPEG/PNGのみ）")]
    UnsupportedFormat,

    #[error("画像のデコードに失敗しました: {0}")]
    Decode(#[from] image::ImageError),

    #[error("モデル出力が空です")]
    EmptyScores,

    #[error("モデル出力の長さ({scores})とクラス数({labels})が一致しません")]
    LabelMismatch { scores: usize, labels: usize },

    #[error("推論エラー: {0}")]
    Inference(String),
}

impl ClassifyError {
    /// 利用者側の入力に起因するエラーかどうか
    pub fn is_client_error(&self) -> bool {
        matches!(self, ClassifyError::UnsupportedFormat | ClassifyError::Decode(_))
    }
}
