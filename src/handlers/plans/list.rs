use axum::extract::{Path, Query};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::services::plan_service;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// true = templates only, false = planned runs only, absent = both
    pub reusable: Option<bool>,
}

/// GET /api/plans - List plans and templates, newest first
pub async fn list(Query(query): Query<ListQuery>) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let plans = plan_service::list_plans(&pool, query.reusable).await?;
    Ok(Json(json!({ "success": true, "data": plans })))
}

/// GET /api/plans/:id - Fetch a single plan row
pub async fn get(Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let plan = plan_service::get_plan(&pool, id).await?;
    Ok(Json(json!({ "success": true, "data": plan })))
}

/// DELETE /api/plans/:id - Delete a plan; satellites go with it via FK cascade
pub async fn delete(Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;

    let result = sqlx::query("DELETE FROM planned_runs WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("Plan {} not found", id)));
    }

    Ok(Json(json!({ "success": true, "data": { "deleted": id } })))
}
