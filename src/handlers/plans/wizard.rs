use axum::extract::{Path, Query};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::services::{catalog_service, plan_service};

#[derive(Debug, Deserialize)]
pub struct NewWizardQuery {
    /// "template" (default) or "plan"
    #[serde(rename = "for")]
    pub target: Option<String>,
}

/// GET /api/plans/wizard/new/:code - Wizard context for a fresh template or
/// plan. `code` is the application shortcut (1..6, anything else = generic
/// sequencing).
pub async fn wizard_new(
    Path(code): Path<String>,
    Query(query): Query<NewWizardQuery>,
) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let for_template = query.target.as_deref() != Some("plan");
    let data = catalog_service::wizard_new_context(&pool, &code, for_template).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

#[derive(Debug, Deserialize)]
pub struct WizardQuery {
    pub intent: Option<String>,
}

/// GET /api/plans/:id/wizard - Wizard context for editing or cloning an
/// existing plan/template, or planning a run from a template.
pub async fn wizard_existing(
    Path(id): Path<Uuid>,
    Query(query): Query<WizardQuery>,
) -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let plan = plan_service::get_plan(&pool, id).await?;

    let intent = query.intent.as_deref().unwrap_or("edit");
    let (for_template, label) = match (intent, plan.is_reusable) {
        ("plan-from-template", _) => (false, "Plan Run"),
        ("edit", true) => (true, "Edit"),
        ("edit", false) => (false, "EditPlan"),
        ("copy", true) => (true, "Copy"),
        ("copy", false) => (false, "CopyPlan"),
        (other, _) => {
            return Err(ApiError::bad_request(format!("Unknown wizard intent: {}", other)));
        }
    };

    let data = plan_service::wizard_plan_context(&pool, id, for_template, label).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// GET /api/plans/presets - Per-application default product settings
pub async fn presets() -> Result<Json<Value>, ApiError> {
    let pool = DatabaseManager::pool().await?;
    let data = catalog_service::appl_product_defaults(&pool).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}
