//! ヘルスチェック

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::SharedContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub num_classes: usize,
    pub catalogue_entries: usize,
    pub catalogue_warning: Option<String>,
    pub version: String,
}

/// GET /health
pub async fn health_check(State(context): State<SharedContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        num_classes: context.scorer().labels().len(),
        catalogue_entries: context.catalogue().len(),
        catalogue_warning: context.catalogue().load_error().map(str::to_string),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
