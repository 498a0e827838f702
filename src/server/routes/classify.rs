//! 画像アップロードと分類

use std::io::Cursor;

use axum::{
    extract::{Multipart, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::{decode_upload, Classification};
use crate::server::{ApiError, SharedContext};

/// プレビュー画像の最大辺
pub const THUMBNAIL_SIZE: u32 = 256;

/// アップロードを受け付けるフィールド名
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    #[serde(flatten)]
    pub classification: Classification,
    /// アップロード画像のプレビュー（PNGのdata URL）
    pub image_data_url: Option<String>,
}

/// 画像を縮小してdata URLにする
pub fn thumbnail_data_url(image: &DynamicImage) -> Option<String> {
    let thumbnail = image.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    let mut buf = Cursor::new(Vec::new());
    if let Err(e) = thumbnail.write_to(&mut buf, ImageFormat::Png) {
        warn!("プレビュー画像の作成に失敗しました: {}", e);
        return None;
    }
    Some(format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner())))
}

/// POST /classify - multipartの `image` フィールドを分類する
pub async fn classify_upload(
    State(context): State<SharedContext>,
    mut multipart: Multipart,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload
        .ok_or_else(|| ApiError::bad_request(format!("Missing '{}' field", IMAGE_FIELD)))?;
    info!("画像を受信しました: {} バイト", bytes.len());

    // デコードと推論はブロッキング処理
    let response = tokio::task::spawn_blocking(move || -> Result<ClassifyResponse, ApiError> {
        let image = decode_upload(&bytes)?;
        let classification = context.classify_image(&image)?;
        Ok(ClassifyResponse {
            classification,
            image_data_url: thumbnail_data_url(&image),
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Classification task failed: {}", e)))??;

    Ok(Json(response))
}
