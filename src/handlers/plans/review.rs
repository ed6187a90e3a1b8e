use axum::extract::Path;
use axum::response::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::services::plan_service;

/// GET /api/plans/:id/review - Read-only plan summary
pub async fn review(Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let data = plan_service::review_context(&pool, id).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// GET /api/plans/delete-context/:ids - Confirmation context for deleting
/// one or more plans. `ids` is comma-separated.
pub async fn delete_context(Path(ids): Path<String>) -> Result<Json<Value>, ApiError> {
    let ids = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Uuid>()
                .map_err(|_| ApiError::bad_request(format!("Invalid plan id: {}", s)))
        })
        .collect::<Result<Vec<Uuid>, ApiError>>()?;

    if ids.is_empty() {
        return Err(ApiError::bad_request("No plan ids given"));
    }

    let pool = DatabaseManager::pool().await?;
    let data = plan_service::delete_context(&pool, &ids).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}
