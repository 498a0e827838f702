//! アップロード用HTTPサーバー
//!
//! 画像をアップロードすると分類結果とカタログ情報をJSONで返します。

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ClassifyError;
use crate::model::ServerSettings;
use crate::pipeline::AppContext;

pub type SharedContext = Arc<AppContext>;

/// ルーターを構築
pub fn build_router(context: SharedContext, settings: &ServerSettings) -> Router {
    Router::new()
        .route("/", get(routes::index::upload_form))
        .route("/classify", post(routes::classify::classify_upload))
        .route("/health", get(routes::health::health_check))
        .route("/catalogue/:name", get(routes::catalogue::get_entry))
        .with_state(context)
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

/// サーバーを起動
pub async fn serve(context: SharedContext, settings: &ServerSettings) -> Result<()> {
    let app = build_router(context, settings);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// リクエスト単位のエラー応答（`{"error": ...}`）
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ClassifyError> for ApiError {
    fn from(e: ClassifyError) -> Self {
        let status = match &e {
            ClassifyError::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("分類処理エラー: {}", e);
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
