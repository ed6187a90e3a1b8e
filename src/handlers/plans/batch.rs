use axum::extract::{Multipart, Path, Query};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config;
use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::plan::csv;
use crate::services::plan_service::{self, BatchOutcome, PlanError};

#[derive(Debug, Deserialize)]
pub struct BatchCsvQuery {
    pub count: Option<usize>,
}

/// GET /api/plans/:template_id/batch-csv - Download a batch planning sheet
/// pre-filled from the template, one row per requested plan.
pub async fn batch_csv(
    Path(template_id): Path<Uuid>,
    Query(query): Query<BatchCsvQuery>,
) -> Result<Response, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let (template, qc_names) = plan_service::batch_template_data(&pool, template_id).await?;

    let count = query
        .count
        .unwrap_or(1)
        .clamp(1, config::config().planning.max_batch_rows);

    let body = csv::write_batch_csv(&template, &qc_names, count).map_err(|e| {
        tracing::error!("batch CSV serialization failed: {}", e);
        ApiError::internal_server_error("Could not generate batch planning file")
    })?;

    let filename = format!(
        "batchPlanning_{}.csv",
        chrono::Local::now().format("%Y_%m_%d_%H_%M_%S")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /api/plans/batch-upload - Create one plan per CSV row. All rows must
/// validate before anything is written; the import itself is a single
/// transaction.
pub async fn batch_upload(
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart upload: {}", e)))?
    {
        if file_bytes.is_none() {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid multipart upload: {}", e)))?;
            file_bytes = Some(bytes.to_vec());
        }
    }

    let Some(bytes) = file_bytes else {
        return Err(ApiError::validation_error(
            "Error: batch planning file is empty",
            None,
        ));
    };

    let pool = DatabaseManager::pool().await?;

    let qc_names: Vec<String> = sqlx::query_scalar("SELECT qc_name FROM qc_types ORDER BY qc_name")
        .fetch_all(&pool)
        .await?;

    let rows =
        csv::parse(&bytes, &qc_names).map_err(|e| ApiError::validation_error(e.to_string(), None))?;

    match plan_service::import_batch(&pool, rows, &user.user).await {
        Ok(BatchOutcome::Saved(count)) => {
            tracing::info!(user = %user.user, count, "batch plans uploaded");
            Ok(Json(json!({
                "success": true,
                "data": {
                    "status": "Plans Uploaded! The plans will be listed on the planned run page.",
                    "count": count,
                }
            })))
        }
        Ok(BatchOutcome::Failed(failed)) => Ok(Json(json!({
            "success": false,
            "status": "Plan validation failed. The plans have not been saved.",
            "failed": failed,
        }))),
        Err(PlanError::Database(e)) => {
            tracing::error!("batch import failed: {}", e);
            Err(ApiError::internal_server_error("Error saving plans to database!"))
        }
        Err(e) => Err(e.into()),
    }
}
