//! カタログ参照

use axum::{
    extract::{Path, State},
    Json,
};

use crate::server::{ApiError, SharedContext};
use crate::types::CatalogueEntry;

/// GET /catalogue/:name - 名前でカタログを引く（大文字小文字は区別しない）
pub async fn get_entry(
    State(context): State<SharedContext>,
    Path(name): Path<String>,
) -> Result<Json<CatalogueEntry>, ApiError> {
    context
        .catalogue()
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No entry for '{}'", name)))
}
