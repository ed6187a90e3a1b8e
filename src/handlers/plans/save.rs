use axum::extract::Path;
use axum::response::Json;
use axum::Extension;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::plan::input::SavePlanRequest;
use crate::plan::save::prepare;
use crate::services::plan_service;

/// POST /api/plans/save/:id - Save a plan or template; id `0` creates.
///
/// Validation happens entirely before any row is written; a multi-sample
/// request fans out to one plan per sample.
pub async fn save(
    Path(id): Path<String>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<SavePlanRequest>,
) -> Result<Json<Value>, ApiError> {
    let existing = match id.as_str() {
        "0" => None,
        other => Some(
            other
                .parse::<Uuid>()
                .map_err(|_| ApiError::bad_request(format!("Invalid plan id: {}", other)))?,
        ),
    };

    let pool = DatabaseManager::pool().await?;

    let ir_autorun = plan_service::ir_autorun_active(&pool).await?;
    let prepared = prepare(request.clone(), ir_autorun)?;
    let label = prepared.label;

    let saved = plan_service::persist_save(&pool, existing, &request, &prepared, &user.user).await?;

    tracing::info!(user = %user.user, count = saved.len(), "{} saved", label);

    Ok(Json(json!({
        "success": true,
        "data": {
            "ids": saved,
            "count": saved.len(),
            "message": format!("{} saved.", label),
        }
    })))
}
