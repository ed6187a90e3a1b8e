//! Plan persistence and context assembly: wizard edit/copy contexts, plan
//! review, the save pipeline, and batch CSV import. All multi-row writes go
//! through explicit transactions; a failure anywhere rolls the whole plan
//! family back.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::database::models::{
    Chip, DnaBarcode, Experiment, ExperimentAnalysisSettings, PlannedRun, Project, QcType, RunType,
    Sample,
};
use crate::plan::csv::{BatchTemplateData, CsvPlanRow};
use crate::plan::input::SavePlanRequest;
use crate::plan::save::PreparedSave;
use crate::plan::strip_chip_type;
use crate::services::catalog_service;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Pool(#[from] crate::database::manager::DatabaseError),
}

fn opt(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

// ---------------------------------------------------------------------------
// Fetch helpers
// ---------------------------------------------------------------------------

pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<PlannedRun, PlanError> {
    sqlx::query_as::<_, PlannedRun>("SELECT * FROM planned_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| PlanError::NotFound(format!("Plan {} not found", id)))
}

async fn find_template_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<PlannedRun>, sqlx::Error> {
    sqlx::query_as::<_, PlannedRun>(
        "SELECT * FROM planned_runs WHERE plan_displayed_name = $1 AND is_reusable LIMIT 1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}

async fn experiment_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Experiment, PlanError> {
    sqlx::query_as::<_, Experiment>("SELECT * FROM experiments WHERE plan_id = $1")
        .bind(plan_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| PlanError::NotFound(format!("Experiment for plan {} not found", plan_id)))
}

async fn eas_for_experiment(
    pool: &PgPool,
    experiment_id: Uuid,
) -> Result<Option<ExperimentAnalysisSettings>, sqlx::Error> {
    sqlx::query_as::<_, ExperimentAnalysisSettings>(
        "SELECT * FROM experiment_analysis_settings WHERE experiment_id = $1",
    )
    .bind(experiment_id)
    .fetch_optional(pool)
    .await
}

/// The historical 3-character chip prefix, or None when the name is already
/// that short. Taken in characters, not bytes; chip types are stored
/// unvalidated and may carry multibyte garbage.
fn chip_name_prefix(name: &str) -> Option<String> {
    let prefix: String = name.chars().take(3).collect();
    (prefix.len() < name.len()).then_some(prefix)
}

/// Resolve a chip by exact name, then by the 3-character prefix historical
/// runs recorded.
async fn find_chip(pool: &PgPool, name: &str) -> Result<Option<Chip>, sqlx::Error> {
    let exact = sqlx::query_as::<_, Chip>("SELECT * FROM chips WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if exact.is_some() {
        return Ok(exact);
    }
    let Some(prefix) = chip_name_prefix(name) else {
        return Ok(None);
    };

    sqlx::query_as::<_, Chip>("SELECT * FROM chips WHERE name = $1")
        .bind(prefix)
        .fetch_optional(pool)
        .await
}

async fn first_sample_for_experiment(
    pool: &PgPool,
    experiment_id: Uuid,
) -> Result<Option<Sample>, sqlx::Error> {
    sqlx::query_as::<_, Sample>(
        "SELECT s.* FROM samples s \
         JOIN experiment_samples es ON es.sample_id = s.id \
         WHERE es.experiment_id = $1 ORDER BY s.name LIMIT 1",
    )
    .bind(experiment_id)
    .fetch_optional(pool)
    .await
}

async fn project_names_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT p.name FROM projects p \
         JOIN plan_projects pp ON pp.project_id = p.id \
         WHERE pp.planned_run_id = $1 ORDER BY p.name",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
}

/// True when any non-legacy IonReporter uploader is set to auto-run; an
/// auto-run uploader counts as selected even when the user picked nothing.
pub async fn ir_autorun_active(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM plugins \
         WHERE name ILIKE '%IonReporter%' AND selected AND active AND autorun \
         AND name <> 'IonReporterUploader_V1_0'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn list_plans(
    pool: &PgPool,
    reusable: Option<bool>,
) -> Result<Vec<PlannedRun>, PlanError> {
    let plans = match reusable {
        Some(reusable) => {
            sqlx::query_as::<_, PlannedRun>(
                "SELECT * FROM planned_runs WHERE is_reusable = $1 ORDER BY date DESC",
            )
            .bind(reusable)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, PlannedRun>("SELECT * FROM planned_runs ORDER BY date DESC")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(plans)
}

// ---------------------------------------------------------------------------
// Read contexts: review, wizard, delete confirmation
// ---------------------------------------------------------------------------

/// Flatten the experiment and EAS attributes onto the serialized plan, the
/// shape the wizard and review clients consume.
fn flatten_plan(
    plan: &PlannedRun,
    experiment: &Experiment,
    eas: Option<&ExperimentAnalysisSettings>,
) -> Value {
    let mut value = serde_json::to_value(plan).unwrap_or_else(|_| json!({}));

    value["auto_analyze"] = json!(experiment.auto_analyze);
    value["flows"] = json!(experiment.flows);
    value["notes"] = json!(experiment.notes);
    value["sequence_kit_name"] = json!(experiment.sequence_kit_name);
    value["chip_type"] = json!(experiment.chip_type);

    match eas {
        Some(eas) => {
            value["barcoded_samples"] = eas.barcoded_samples.clone();
            value["barcode_kit_name"] = json!(eas.barcode_kit_name);
            value["target_region_bed_file"] = json!(eas.target_region_bed_file);
            value["hot_spot_region_bed_file"] = json!(eas.hot_spot_region_bed_file);
            value["three_prime_adapter"] = json!(eas.three_prime_adapter);
            value["library_key"] = json!(eas.library_key);
            value["library_kit_name"] = json!(eas.library_kit_name);
            value["selected_plugins"] = eas.selected_plugins.clone();
            value["variant_frequency"] = json!(eas.variant_frequency);
            // "none" is a placeholder reference, presented as unset
            value["library"] = match eas.reference.as_deref() {
                Some("none") | None => json!(""),
                Some(reference) => json!(reference),
            };
        }
        None => {
            value["library"] = json!("");
        }
    }

    value
}

/// Review payload: the full plan plus its run type, barcode set, and chip.
pub async fn review_context(pool: &PgPool, id: Uuid) -> Result<Value, PlanError> {
    let plan = get_plan(pool, id).await?;
    let experiment = experiment_for_plan(pool, plan.id).await?;
    let eas = eas_for_experiment(pool, experiment.id).await?;

    let run_type = sqlx::query_as::<_, RunType>("SELECT * FROM run_types WHERE run_type = $1")
        .bind(&plan.run_type)
        .fetch_optional(pool)
        .await?;

    let barcodes = match eas.as_ref().and_then(|e| e.barcode_kit_name.as_deref()) {
        Some(kit) if !kit.is_empty() => {
            let rows = sqlx::query_as::<_, DnaBarcode>(
                "SELECT * FROM dna_barcodes WHERE name = $1 ORDER BY \"index\"",
            )
            .bind(kit)
            .fetch_all(pool)
            .await?;
            json!(rows)
        }
        _ => json!([]),
    };

    let chip = match experiment.chip_type.as_deref().map(strip_chip_type) {
        Some(chip_type) if !chip_type.is_empty() => {
            match find_chip(pool, &chip_type).await? {
                Some(chip) => json!(chip),
                None => {
                    tracing::error!(
                        plan_id = %plan.id,
                        plan_name = %plan.plan_name,
                        chip_type = %chip_type,
                        "plan has invalid chip type"
                    );
                    json!("INVALID")
                }
            }
        }
        _ => Value::Null,
    };

    let view = if plan.is_reusable { "template" } else { "Planned Run" };

    Ok(json!({
        "plan": flatten_plan(&plan, &experiment, eas.as_ref()),
        "run_type": run_type,
        "barcodes": barcodes,
        "chip": chip,
        "view": view,
    }))
}

/// Mark catalog plugins/uploaders as selected on a saved plan and surface
/// the stored IonReporter configuration. Legacy plans stored uploader
/// user_input as a bare object; it is normalized to a one-element list.
fn mark_selected_plugins(catalog: &mut Value, selected_plugins: &Value) -> Option<(Value, Value)> {
    let selected = selected_plugins.as_object().cloned().unwrap_or_default();
    let mut ir_saved = None;

    if let Some(plugins) = catalog.get_mut("plugins").and_then(Value::as_array_mut) {
        for plugin in plugins {
            let name = plugin["name"].as_str().unwrap_or_default().to_string();
            match selected.get(&name) {
                Some(saved) => {
                    plugin["selected"] = json!(true);
                    plugin["user_input"] = saved.get("userInput").cloned().unwrap_or(Value::Null);
                }
                None => {
                    plugin["selected"] = json!(false);
                }
            }
        }
    }

    if let Some(uploaders) = catalog.get_mut("uploaders").and_then(Value::as_array_mut) {
        for uploader in uploaders {
            let name = uploader["name"].as_str().unwrap_or_default().to_string();
            match selected.get(&name) {
                Some(saved) => {
                    uploader["selected"] = json!(true);

                    let mut user_input =
                        saved.get("userInput").cloned().unwrap_or(Value::Null);
                    if user_input.is_object() {
                        user_input = json!([user_input]);
                    }
                    uploader["user_input"] = user_input.clone();

                    if name.contains("IonReporter") {
                        let version = if name == "IonReporterUploader_V1_0" {
                            json!(1.0)
                        } else {
                            uploader["version"].clone()
                        };
                        ir_saved = Some((user_input, version));
                    }
                }
                None => {
                    uploader["selected"] = json!(false);
                }
            }
        }
    }

    ir_saved
}

/// Wizard context for editing, cloning, or planning from an existing
/// plan/template.
pub async fn wizard_plan_context(
    pool: &PgPool,
    id: Uuid,
    for_template: bool,
    intent: &str,
) -> Result<Value, PlanError> {
    let plan = get_plan(pool, id).await?;

    let run_type = sqlx::query_as::<_, RunType>("SELECT * FROM run_types WHERE run_type = $1")
        .bind(&plan.run_type)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| PlanError::NotFound(format!("Run type {} not found", plan.run_type)))?;

    let mut experiment = experiment_for_plan(pool, plan.id).await?;
    let eas = eas_for_experiment(pool, experiment.id).await?;

    // Chip names degraded over time; fall back to the 3-character prefix
    // when the stored name no longer resolves exactly.
    if let Some(chip_type) = experiment.chip_type.clone() {
        if let Some(prefix) = chip_name_prefix(&chip_type) {
            let exact = sqlx::query_as::<_, Chip>("SELECT * FROM chips WHERE name = $1")
                .bind(&chip_type)
                .fetch_optional(pool)
                .await?;
            if exact.is_none() && find_chip(pool, &chip_type).await?.is_some() {
                experiment.chip_type = Some(prefix);
            }
        }
    }

    let mut selected_plan = flatten_plan(&plan, &experiment, eas.as_ref());

    if let Some(sample) = first_sample_for_experiment(pool, experiment.id).await? {
        selected_plan["sample"] = json!(sample.name);
        selected_plan["sample_displayed_name"] = json!(sample.displayed_name);
    }

    // Ion Chef plans pick their templating kit from the chef kit list.
    let is_ion_chef = match plan.templating_kit_name.as_deref() {
        Some(kit) if !kit.is_empty() => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM kit_infos \
                 WHERE kit_type = 'IonChefPrepKit' AND name = $1",
            )
            .bind(kit)
            .fetch_one(pool)
            .await?;
            count > 0
        }
        _ => false,
    };
    selected_plan["is_ion_chef"] = json!(is_ion_chef);

    let chip_type_details = match selected_plan["chip_type"].as_str() {
        Some(chip_type) if !chip_type.is_empty() => {
            json!(find_chip(pool, &strip_chip_type(chip_type)).await?)
        }
        _ => Value::Null,
    };

    let selected_project_names = project_names_for_plan(pool, plan.id).await?;

    let mut catalog = catalog_service::base_catalog(pool, for_template).await?;
    let defaults = catalog_service::appl_product_defaults(pool).await?;
    catalog_service::attach_appl_product_defaults(&mut catalog, defaults);

    let selected_plugins = eas
        .as_ref()
        .map(|e| e.selected_plugins.clone())
        .unwrap_or(Value::Null);
    let ir_saved = mark_selected_plugins(&mut catalog, &selected_plugins);

    if let Some((ir_config_saved, version)) = ir_saved {
        if let Some(map) = catalog.as_object_mut() {
            map.insert("ir_config_saved".into(), ir_config_saved);
            map.insert("ir_config_saved_version".into(), version);
        }
    }

    Ok(json!({
        "intent": intent,
        "plan_template_data": catalog,
        "selected_appl_product_data": "",
        "selected_plan_template": selected_plan,
        "selected_run_type": run_type,
        "selected_project_names": selected_project_names,
        "selected_chip_type_details": chip_type_details,
    }))
}

/// Confirmation context for deleting one or more plans/templates.
pub async fn delete_context(pool: &PgPool, ids: &[Uuid]) -> Result<Value, PlanError> {
    let plans = sqlx::query_as::<_, PlannedRun>(
        "SELECT * FROM planned_runs WHERE id = ANY($1) ORDER BY date DESC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    if plans.is_empty() {
        return Err(PlanError::NotFound("No plans found for the given ids".to_string()));
    }

    Ok(delete_payload(&plans, ids))
}

/// Confirmation payload. `name` and `names` both carry the joined stored
/// plan names; clients historically read either key.
fn delete_payload(plans: &[PlannedRun], ids: &[Uuid]) -> Value {
    let names = plans
        .iter()
        .map(|p| p.plan_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let type_label = if plans[0].is_reusable { "Template" } else { "Planned Run" };
    let actions: Vec<String> = ids.iter().map(|id| format!("/api/plans/{}", id)).collect();

    json!({
        "id": ids[0],
        "ids": ids,
        "name": names,
        "names": names,
        "method": "DELETE",
        "method_description": "Delete",
        "readonly": false,
        "type": type_label,
        "action": actions[0],
        "actions": actions,
    })
}

// ---------------------------------------------------------------------------
// Write pipeline
// ---------------------------------------------------------------------------

struct PlanColumns<'a> {
    plan_name: &'a str,
    plan_displayed_name: &'a str,
    run_type: &'a str,
    run_mode: &'a str,
    is_reusable: bool,
    is_plan_group: bool,
    is_system: bool,
    is_favorite: bool,
    plan_status: &'a str,
    username: &'a str,
    templating_kit_name: &'a str,
    control_sequence_kit_name: &'a str,
    sample_prep_kit_name: &'a str,
    paired_end_library_adapter_name: &'a str,
    use_pre_beadfind: bool,
    use_post_beadfind: bool,
    notes: &'a str,
}

struct ExperimentColumns<'a> {
    chip_type: &'a str,
    flows: Option<i32>,
    auto_analyze: bool,
    sequence_kit_name: &'a str,
    notes: &'a str,
}

struct EasColumns<'a> {
    barcode_kit_name: &'a str,
    barcoded_samples: &'a Value,
    target_region_bed_file: &'a str,
    hot_spot_region_bed_file: &'a str,
    three_prime_adapter: &'a str,
    library_key: &'a str,
    library_kit_name: &'a str,
    reference: &'a str,
    selected_plugins: &'a Value,
    variant_frequency: &'a str,
}

async fn insert_plan_row(
    conn: &mut PgConnection,
    columns: &PlanColumns<'_>,
) -> Result<(Uuid, Uuid), sqlx::Error> {
    let id = Uuid::new_v4();
    let plan_guid = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO planned_runs \
         (id, plan_guid, plan_name, plan_displayed_name, run_type, run_mode, \
          is_reusable, is_plan_group, is_system, is_favorite, plan_status, username, \
          templating_kit_name, control_sequence_kit_name, sample_prep_kit_name, \
          paired_end_library_adapter_name, use_pre_beadfind, use_post_beadfind, \
          pre_analysis, notes, date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17, $18, true, $19, now())",
    )
    .bind(id)
    .bind(plan_guid)
    .bind(columns.plan_name)
    .bind(columns.plan_displayed_name)
    .bind(columns.run_type)
    .bind(columns.run_mode)
    .bind(columns.is_reusable)
    .bind(columns.is_plan_group)
    .bind(columns.is_system)
    .bind(columns.is_favorite)
    .bind(columns.plan_status)
    .bind(opt(columns.username))
    .bind(opt(columns.templating_kit_name))
    .bind(opt(columns.control_sequence_kit_name))
    .bind(opt(columns.sample_prep_kit_name))
    .bind(opt(columns.paired_end_library_adapter_name))
    .bind(columns.use_pre_beadfind)
    .bind(columns.use_post_beadfind)
    .bind(opt(columns.notes))
    .execute(&mut *conn)
    .await?;

    Ok((id, plan_guid))
}

async fn update_plan_row(
    conn: &mut PgConnection,
    id: Uuid,
    columns: &PlanColumns<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE planned_runs SET \
         plan_name = $2, plan_displayed_name = $3, run_type = $4, run_mode = $5, \
         is_reusable = $6, is_plan_group = $7, is_system = $8, is_favorite = $9, \
         plan_status = $10, username = $11, templating_kit_name = $12, \
         control_sequence_kit_name = $13, sample_prep_kit_name = $14, \
         paired_end_library_adapter_name = $15, use_pre_beadfind = $16, \
         use_post_beadfind = $17, notes = $18 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(columns.plan_name)
    .bind(columns.plan_displayed_name)
    .bind(columns.run_type)
    .bind(columns.run_mode)
    .bind(columns.is_reusable)
    .bind(columns.is_plan_group)
    .bind(columns.is_system)
    .bind(columns.is_favorite)
    .bind(columns.plan_status)
    .bind(opt(columns.username))
    .bind(opt(columns.templating_kit_name))
    .bind(opt(columns.control_sequence_kit_name))
    .bind(opt(columns.sample_prep_kit_name))
    .bind(opt(columns.paired_end_library_adapter_name))
    .bind(columns.use_pre_beadfind)
    .bind(columns.use_post_beadfind)
    .bind(opt(columns.notes))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Insert or update the experiment row for a plan, returning its id.
/// New experiments are named after the plan GUID.
async fn upsert_experiment(
    conn: &mut PgConnection,
    plan_id: Uuid,
    plan_guid: Uuid,
    columns: &ExperimentColumns<'_>,
) -> Result<Uuid, sqlx::Error> {
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM experiments WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some(id) = existing {
        sqlx::query(
            "UPDATE experiments SET chip_type = $2, flows = $3, auto_analyze = $4, \
             sequence_kit_name = $5, notes = $6 WHERE id = $1",
        )
        .bind(id)
        .bind(opt(columns.chip_type))
        .bind(columns.flows)
        .bind(columns.auto_analyze)
        .bind(opt(columns.sequence_kit_name))
        .bind(opt(columns.notes))
        .execute(&mut *conn)
        .await?;
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let guid = plan_guid.to_string();
    sqlx::query(
        "INSERT INTO experiments \
         (id, plan_id, exp_name, display_name, unique_name, chip_type, flows, \
          auto_analyze, sequence_kit_name, notes) \
         VALUES ($1, $2, $3, $3, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id)
    .bind(plan_id)
    .bind(&guid)
    .bind(opt(columns.chip_type))
    .bind(columns.flows)
    .bind(columns.auto_analyze)
    .bind(opt(columns.sequence_kit_name))
    .bind(opt(columns.notes))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

async fn upsert_eas(
    conn: &mut PgConnection,
    experiment_id: Uuid,
    columns: &EasColumns<'_>,
) -> Result<(), sqlx::Error> {
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM experiment_analysis_settings WHERE experiment_id = $1",
    )
    .bind(experiment_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = existing {
        sqlx::query(
            "UPDATE experiment_analysis_settings SET \
             is_editable = true, barcode_kit_name = $2, barcoded_samples = $3, \
             target_region_bed_file = $4, hot_spot_region_bed_file = $5, \
             three_prime_adapter = $6, library_key = $7, library_kit_name = $8, \
             reference = $9, selected_plugins = $10, variant_frequency = $11 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(opt(columns.barcode_kit_name))
        .bind(columns.barcoded_samples)
        .bind(opt(columns.target_region_bed_file))
        .bind(opt(columns.hot_spot_region_bed_file))
        .bind(opt(columns.three_prime_adapter))
        .bind(opt(columns.library_key))
        .bind(opt(columns.library_kit_name))
        .bind(opt(columns.reference))
        .bind(columns.selected_plugins)
        .bind(opt(columns.variant_frequency))
        .execute(&mut *conn)
        .await?;
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO experiment_analysis_settings \
         (id, experiment_id, is_editable, barcode_kit_name, barcoded_samples, \
          target_region_bed_file, hot_spot_region_bed_file, three_prime_adapter, \
          library_key, library_kit_name, reference, selected_plugins, variant_frequency) \
         VALUES ($1, $2, true, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(Uuid::new_v4())
    .bind(experiment_id)
    .bind(opt(columns.barcode_kit_name))
    .bind(columns.barcoded_samples)
    .bind(opt(columns.target_region_bed_file))
    .bind(opt(columns.hot_spot_region_bed_file))
    .bind(opt(columns.three_prime_adapter))
    .bind(opt(columns.library_key))
    .bind(opt(columns.library_kit_name))
    .bind(opt(columns.reference))
    .bind(columns.selected_plugins)
    .bind(opt(columns.variant_frequency))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get-or-create a sample by (name, external_id) and attach it to the
/// experiment.
async fn attach_sample(
    conn: &mut PgConnection,
    experiment_id: Uuid,
    name: &str,
    displayed_name: &str,
    status: &str,
) -> Result<(), sqlx::Error> {
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM samples WHERE name = $1 AND external_id IS NULL",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    let sample_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO samples (id, name, displayed_name, external_id, status, date) \
                 VALUES ($1, $2, $3, NULL, $4, now())",
            )
            .bind(id)
            .bind(name)
            .bind(displayed_name)
            .bind(status)
            .execute(&mut *conn)
            .await?;
            id
        }
    };

    sqlx::query(
        "INSERT INTO experiment_samples (experiment_id, sample_id) VALUES ($1, $2) \
         ON CONFLICT (experiment_id, sample_id) DO NOTHING",
    )
    .bind(experiment_id)
    .bind(sample_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Update-or-insert QC thresholds named in the payload. Unknown QC names
/// are ignored, matching the original iteration over configured QC types.
async fn upsert_qc_thresholds(
    conn: &mut PgConnection,
    plan_id: Uuid,
    thresholds: &BTreeMap<String, i32>,
) -> Result<(), sqlx::Error> {
    for (qc_name, threshold) in thresholds {
        let qc_type_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM qc_types WHERE qc_name = $1")
                .bind(qc_name)
                .fetch_optional(&mut *conn)
                .await?;
        let Some(qc_type_id) = qc_type_id else {
            continue;
        };

        let updated = sqlx::query(
            "UPDATE planned_run_qc SET threshold = $3 \
             WHERE planned_run_id = $1 AND qc_type_id = $2",
        )
        .bind(plan_id)
        .bind(qc_type_id)
        .bind(threshold)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO planned_run_qc (id, planned_run_id, qc_type_id, threshold) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(plan_id)
            .bind(qc_type_id)
            .bind(threshold)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Reconcile plan/project membership: drop memberships no longer wanted,
/// add the rest. An empty list clears all memberships.
async fn sync_projects(
    conn: &mut PgConnection,
    plan_id: Uuid,
    project_ids: &[Uuid],
) -> Result<(), sqlx::Error> {
    if project_ids.is_empty() {
        sqlx::query("DELETE FROM plan_projects WHERE planned_run_id = $1")
            .bind(plan_id)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    sqlx::query(
        "DELETE FROM plan_projects WHERE planned_run_id = $1 AND NOT (project_id = ANY($2))",
    )
    .bind(plan_id)
    .bind(project_ids)
    .execute(&mut *conn)
    .await?;

    for project_id in project_ids {
        sqlx::query(
            "INSERT INTO plan_projects (planned_run_id, project_id) VALUES ($1, $2) \
             ON CONFLICT (planned_run_id, project_id) DO NOTHING",
        )
        .bind(plan_id)
        .bind(project_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Resolve the requested project associations: existing projects by name,
/// plus new public projects created on the fly for the requesting user.
pub async fn resolve_projects(
    pool: &PgPool,
    names: &[String],
    new_names: &[String],
    username: &str,
) -> Result<Vec<Project>, PlanError> {
    let mut projects = Vec::new();

    for name in names {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        if let Some(project) = project {
            projects.push(project);
        }
    }

    for name in new_names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        crate::plan::validate::validate_project_name(name)
            .map_err(|e| PlanError::Invalid(e.0))?;

        let existing = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        let project = match existing {
            Some(project) => project,
            None => {
                sqlx::query_as::<_, Project>(
                    "INSERT INTO projects (id, name, creator, public) \
                     VALUES ($1, $2, $3, true) RETURNING *",
                )
                .bind(Uuid::new_v4())
                .bind(name)
                .bind(username)
                .fetch_one(pool)
                .await?
            }
        };
        projects.push(project);
    }

    Ok(projects)
}

/// Persist a prepared save: one transaction per plan in the fan-out.
/// Editing consumes the existing plan id on the first iteration; the
/// remaining samples become new plans.
pub async fn persist_save(
    pool: &PgPool,
    existing: Option<Uuid>,
    request: &SavePlanRequest,
    prepared: &PreparedSave,
    username: &str,
) -> Result<Vec<Uuid>, PlanError> {
    let projects =
        resolve_projects(pool, &request.projects, &request.new_projects, username).await?;
    let project_ids: Vec<Uuid> = projects.iter().map(|p| p.id).collect();

    let mut existing = existing;
    let mut saved = Vec::with_capacity(prepared.plans.len());

    for plan in &prepared.plans {
        let columns = PlanColumns {
            plan_name: &plan.plan_name,
            plan_displayed_name: &plan.plan_displayed_name,
            run_type: &request.run_type,
            run_mode: &request.run_mode,
            is_reusable: prepared.is_reusable,
            is_plan_group: prepared.is_plan_group,
            is_system: request.is_system,
            is_favorite: request.is_favorite,
            plan_status: "planned",
            username,
            templating_kit_name: request.selected_templating_kit(),
            control_sequence_kit_name: &request.control_sequence_kit_name,
            sample_prep_kit_name: &request.sample_prep_kit_name,
            paired_end_library_adapter_name: &request.paired_end_library_adapter_name,
            use_pre_beadfind: request.use_pre_beadfind,
            use_post_beadfind: request.use_post_beadfind,
            notes: &request.notes,
        };
        let experiment = ExperimentColumns {
            chip_type: &request.chip_type,
            flows: request.flows,
            auto_analyze: true,
            sequence_kit_name: &request.sequence_kit_name,
            notes: &request.notes,
        };
        let eas = EasColumns {
            barcode_kit_name: &request.barcode_kit_name,
            barcoded_samples: &plan.barcoded_samples,
            target_region_bed_file: &request.target_region_bed_file,
            hot_spot_region_bed_file: &request.hot_spot_region_bed_file,
            three_prime_adapter: &request.forward_3_prime_adapter,
            library_key: &request.library_key,
            library_kit_name: &request.library_kit_name,
            reference: &request.library,
            selected_plugins: &plan.selected_plugins,
            variant_frequency: &request.variant_frequency,
        };

        let mut tx = pool.begin().await?;

        let (plan_id, plan_guid) = match existing.take() {
            Some(id) => {
                let current = sqlx::query_as::<_, PlannedRun>(
                    "SELECT * FROM planned_runs WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| PlanError::NotFound(format!("Plan {} not found", id)))?;

                update_plan_row(&mut tx, id, &columns).await?;
                (id, current.plan_guid)
            }
            None => insert_plan_row(&mut tx, &columns).await?,
        };

        let experiment_id = upsert_experiment(&mut tx, plan_id, plan_guid, &experiment).await?;
        upsert_eas(&mut tx, experiment_id, &eas).await?;

        if !plan.sample_name.is_empty() {
            attach_sample(
                &mut tx,
                experiment_id,
                &plan.sample_name,
                &plan.sample_displayed_name,
                "planned",
            )
            .await?;
        }

        upsert_qc_thresholds(&mut tx, plan_id, &request.qc_thresholds).await?;
        sync_projects(&mut tx, plan_id, &project_ids).await?;

        tx.commit().await?;
        saved.push(plan_id);
    }

    Ok(saved)
}

// ---------------------------------------------------------------------------
// Batch planning
// ---------------------------------------------------------------------------

/// Pre-filled CSV values for a template, plus the QC column names.
pub async fn batch_template_data(
    pool: &PgPool,
    template_id: Uuid,
) -> Result<(BatchTemplateData, Vec<String>), PlanError> {
    let plan = get_plan(pool, template_id).await?;
    let experiment = experiment_for_plan(pool, plan.id).await?;
    let eas = eas_for_experiment(pool, experiment.id).await?;

    let qc_types = sqlx::query_as::<_, QcType>("SELECT * FROM qc_types ORDER BY qc_name")
        .fetch_all(pool)
        .await?;
    let qc_names: Vec<String> = qc_types.iter().map(|q| q.qc_name.clone()).collect();

    let overrides: Vec<(Uuid, i32)> = sqlx::query_as(
        "SELECT qc_type_id, threshold FROM planned_run_qc WHERE planned_run_id = $1",
    )
    .bind(plan.id)
    .fetch_all(pool)
    .await?;

    let mut qc_defaults = BTreeMap::new();
    for qc_type in &qc_types {
        let threshold = overrides
            .iter()
            .find(|(id, _)| *id == qc_type.id)
            .map(|(_, t)| *t)
            .unwrap_or(qc_type.default_threshold);
        qc_defaults.insert(qc_type.qc_name.clone(), threshold.to_string());
    }

    let eas = eas.unwrap_or_else(|| ExperimentAnalysisSettings {
        id: Uuid::nil(),
        experiment_id: experiment.id,
        is_editable: true,
        barcode_kit_name: None,
        barcoded_samples: json!({}),
        target_region_bed_file: None,
        hot_spot_region_bed_file: None,
        three_prime_adapter: None,
        library_key: None,
        library_kit_name: None,
        reference: None,
        selected_plugins: json!({}),
        variant_frequency: None,
    });

    let data = BatchTemplateData {
        template_name: plan.plan_displayed_name.clone(),
        sample: String::new(),
        barcode_kit: eas.barcode_kit_name.unwrap_or_default(),
        reference: eas.reference.unwrap_or_default(),
        target_bed: eas.target_region_bed_file.unwrap_or_default(),
        hotspot_bed: eas.hot_spot_region_bed_file.unwrap_or_default(),
        flows: experiment.flows.map(|f| f.to_string()).unwrap_or_default(),
        sequencing_kit: experiment.sequence_kit_name.unwrap_or_default(),
        notes: plan.notes.unwrap_or_default(),
        qc_defaults,
    };

    Ok((data, qc_names))
}

/// Result of a batch upload: either every row saved, or the per-row
/// failure map with nothing written.
#[derive(Debug)]
pub enum BatchOutcome {
    Saved(usize),
    Failed(BTreeMap<usize, Vec<String>>),
}

struct ValidatedRow {
    row: CsvPlanRow,
    template: PlannedRun,
    template_experiment: Experiment,
    template_eas: Option<ExperimentAnalysisSettings>,
}

/// Import a parsed batch sheet: validate every row first, then write all
/// plans in a single transaction. Saving is all-or-nothing.
pub async fn import_batch(
    pool: &PgPool,
    rows: Vec<CsvPlanRow>,
    username: &str,
) -> Result<BatchOutcome, PlanError> {
    let limits = &config::config().planning;
    if rows.len() > limits.max_batch_rows {
        return Err(PlanError::Invalid(format!(
            "Error: batch planning is limited to {} plans per upload",
            limits.max_batch_rows
        )));
    }

    let mut failed: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut validated: Vec<ValidatedRow> = Vec::new();
    let mut processed = 0usize;

    for row in rows {
        if row.is_blank() {
            tracing::info!(row = row.row_number, "skipping blank batch row");
            continue;
        }
        processed += 1;

        let mut errors = row.validate();

        let mut family = None;
        if !row.template_name.is_empty() {
            match find_template_by_name(pool, &row.template_name).await? {
                Some(template) => {
                    let experiment = experiment_for_plan(pool, template.id).await?;
                    let eas = eas_for_experiment(pool, experiment.id).await?;

                    let template_barcoded = eas
                        .as_ref()
                        .and_then(|e| e.barcode_kit_name.as_deref())
                        .map(|k| !k.is_empty())
                        .unwrap_or(false);
                    if !template_barcoded && row.barcode_kit.is_empty() && row.sample.is_empty() {
                        errors.push("Sample is required".to_string());
                    }

                    family = Some((template, experiment, eas));
                }
                None => {
                    errors.push(format!("Template name not found: {}", row.template_name));
                }
            }
        }

        if !errors.is_empty() {
            tracing::info!(row = row.row_number, ?errors, "batch row failed validation");
            failed.insert(row.row_number, errors);
            continue;
        }

        // validate() rejects rows without a template name, so a clean row
        // always resolved its family above.
        if let Some((template, template_experiment, template_eas)) = family {
            validated.push(ValidatedRow {
                row,
                template,
                template_experiment,
                template_eas,
            });
        }
    }

    if processed == 0 {
        return Err(PlanError::Invalid(
            "Error: There must be at least one plan! Please reload the page and try again with more plans."
                .to_string(),
        ));
    }

    if !failed.is_empty() {
        return Ok(BatchOutcome::Failed(failed));
    }

    // Saving to the database is the last thing that happens; one bad row
    // rolls back every plan in the sheet.
    let mut tx = pool.begin().await?;
    let count = validated.len();

    for item in &validated {
        save_batch_row(&mut tx, item, username).await?;
    }

    tx.commit().await?;
    Ok(BatchOutcome::Saved(count))
}

async fn save_batch_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    item: &ValidatedRow,
    username: &str,
) -> Result<(), PlanError> {
    let row = &item.row;
    let template = &item.template;

    let plan_name = crate::plan::input::normalize_name(&row.plan_name);
    let template_eas = item.template_eas.as_ref();

    // Row values override the template's where present.
    let pick = |row_value: &str, template_value: Option<&str>| -> String {
        if row_value.is_empty() {
            template_value.unwrap_or_default().to_string()
        } else {
            row_value.to_string()
        }
    };

    let notes = pick(&row.notes, template.notes.as_deref());
    let sequencing_kit = pick(
        &row.sequencing_kit,
        item.template_experiment.sequence_kit_name.as_deref(),
    );
    let barcode_kit = pick(
        &row.barcode_kit,
        template_eas.and_then(|e| e.barcode_kit_name.as_deref()),
    );
    let reference = pick(&row.reference, template_eas.and_then(|e| e.reference.as_deref()));
    let target_bed = pick(
        &row.target_bed,
        template_eas.and_then(|e| e.target_region_bed_file.as_deref()),
    );
    let hotspot_bed = pick(
        &row.hotspot_bed,
        template_eas.and_then(|e| e.hot_spot_region_bed_file.as_deref()),
    );

    let columns = PlanColumns {
        plan_name: &plan_name,
        plan_displayed_name: &row.plan_name,
        run_type: &template.run_type,
        run_mode: &template.run_mode,
        is_reusable: false,
        is_plan_group: false,
        is_system: false,
        is_favorite: false,
        plan_status: "planned",
        username,
        templating_kit_name: template.templating_kit_name.as_deref().unwrap_or_default(),
        control_sequence_kit_name: template
            .control_sequence_kit_name
            .as_deref()
            .unwrap_or_default(),
        sample_prep_kit_name: template.sample_prep_kit_name.as_deref().unwrap_or_default(),
        paired_end_library_adapter_name: template
            .paired_end_library_adapter_name
            .as_deref()
            .unwrap_or_default(),
        use_pre_beadfind: template.use_pre_beadfind,
        use_post_beadfind: template.use_post_beadfind,
        notes: &notes,
    };

    let (plan_id, plan_guid) = insert_plan_row(tx, &columns).await?;

    let experiment = ExperimentColumns {
        chip_type: item.template_experiment.chip_type.as_deref().unwrap_or_default(),
        flows: row.flows_value().or(item.template_experiment.flows),
        auto_analyze: true,
        sequence_kit_name: &sequencing_kit,
        notes: &notes,
    };
    let experiment_id = upsert_experiment(tx, plan_id, plan_guid, &experiment).await?;

    let empty = json!({});
    let eas = EasColumns {
        barcode_kit_name: &barcode_kit,
        barcoded_samples: template_eas.map(|e| &e.barcoded_samples).unwrap_or(&empty),
        target_region_bed_file: &target_bed,
        hot_spot_region_bed_file: &hotspot_bed,
        three_prime_adapter: template_eas
            .and_then(|e| e.three_prime_adapter.as_deref())
            .unwrap_or_default(),
        library_key: template_eas
            .and_then(|e| e.library_key.as_deref())
            .unwrap_or_default(),
        library_kit_name: template_eas
            .and_then(|e| e.library_kit_name.as_deref())
            .unwrap_or_default(),
        reference: &reference,
        selected_plugins: template_eas.map(|e| &e.selected_plugins).unwrap_or(&empty),
        variant_frequency: template_eas
            .and_then(|e| e.variant_frequency.as_deref())
            .unwrap_or_default(),
    };
    upsert_eas(tx, experiment_id, &eas).await?;

    // Multiple samples per row are separated like projects.
    for displayed in row.sample.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let name = crate::plan::input::normalize_name(displayed);
        attach_sample(tx, experiment_id, &name, displayed, "planned").await?;
    }

    upsert_qc_thresholds(tx, plan_id, &row.qc_thresholds()).await?;

    let projects = resolve_projects_tx(tx, &row.project_names(), username).await?;
    for project_id in projects {
        sqlx::query(
            "INSERT INTO plan_projects (planned_run_id, project_id) VALUES ($1, $2) \
             ON CONFLICT (planned_run_id, project_id) DO NOTHING",
        )
        .bind(plan_id)
        .bind(project_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Get-or-create projects by name inside the batch transaction.
async fn resolve_projects_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    names: &[String],
    username: &str,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let mut ids = Vec::new();
    for name in names {
        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM projects WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        let id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO projects (id, name, creator, public) VALUES ($1, $2, $3, true)",
                )
                .bind(id)
                .bind(name)
                .bind(username)
                .execute(&mut **tx)
                .await?;
                id
            }
        };
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(plugins: Value, uploaders: Value) -> Value {
        json!({ "plugins": plugins, "uploaders": uploaders })
    }

    #[test]
    fn unselected_plugins_are_marked_false() {
        let mut catalog = catalog_with(
            json!([{"name": "variantCaller", "version": "4.0"}]),
            json!([]),
        );
        let ir = mark_selected_plugins(&mut catalog, &json!({}));
        assert!(ir.is_none());
        assert_eq!(catalog["plugins"][0]["selected"], json!(false));
    }

    #[test]
    fn selected_plugin_carries_user_input() {
        let mut catalog = catalog_with(
            json!([{"name": "variantCaller", "version": "4.0"}]),
            json!([]),
        );
        let saved = json!({
            "variantCaller": {"name": "variantCaller", "userInput": {"freq": "0.1"}}
        });
        mark_selected_plugins(&mut catalog, &saved);
        assert_eq!(catalog["plugins"][0]["selected"], json!(true));
        assert_eq!(catalog["plugins"][0]["user_input"]["freq"], "0.1");
    }

    #[test]
    fn legacy_uploader_input_normalized_to_list() {
        let mut catalog = catalog_with(
            json!([]),
            json!([{"name": "IonReporterUploader_V1_2", "version": "1.2"}]),
        );
        let saved = json!({
            "IonReporterUploader_V1_2": {"userInput": {"setid": "1"}}
        });
        let ir = mark_selected_plugins(&mut catalog, &saved).unwrap();
        assert!(catalog["uploaders"][0]["user_input"].is_array());
        assert_eq!(ir.0[0]["setid"], "1");
        assert_eq!(ir.1, json!("1.2"));
    }

    #[test]
    fn legacy_v1_uploader_reports_version_one() {
        let mut catalog = catalog_with(
            json!([]),
            json!([{"name": "IonReporterUploader_V1_0", "version": "0.9"}]),
        );
        let saved = json!({
            "IonReporterUploader_V1_0": {"userInput": [{"setid": "1"}]}
        });
        let ir = mark_selected_plugins(&mut catalog, &saved).unwrap();
        assert_eq!(ir.1, json!(1.0));
    }

    #[test]
    fn chip_prefix_counts_characters_not_bytes() {
        assert_eq!(chip_name_prefix("314R v2").as_deref(), Some("314"));
        // already at or below 3 characters, nothing shorter to try
        assert_eq!(chip_name_prefix("318"), None);
        assert_eq!(chip_name_prefix("P1"), None);
        assert_eq!(chip_name_prefix(""), None);
        // multibyte chip types must not split a char boundary
        assert_eq!(chip_name_prefix("üü"), None);
        assert_eq!(chip_name_prefix("üüüü").as_deref(), Some("üüü"));
    }

    fn plan_row(displayed_name: &str, reusable: bool) -> PlannedRun {
        PlannedRun {
            id: Uuid::new_v4(),
            plan_guid: Uuid::new_v4(),
            plan_name: displayed_name.replace(' ', "_"),
            plan_displayed_name: displayed_name.to_string(),
            run_type: "AMPS".into(),
            run_mode: "single".into(),
            is_reusable: reusable,
            is_plan_group: false,
            is_system: false,
            is_favorite: false,
            plan_status: "planned".into(),
            username: None,
            templating_kit_name: None,
            control_sequence_kit_name: None,
            sample_prep_kit_name: None,
            paired_end_library_adapter_name: None,
            use_pre_beadfind: false,
            use_post_beadfind: false,
            pre_analysis: true,
            notes: None,
            date: chrono::Utc::now(),
        }
    }

    #[test]
    fn delete_payload_joins_stored_names_under_both_keys() {
        let plans = vec![plan_row("Exome Study", false), plan_row("Panel Run", false)];
        let ids: Vec<Uuid> = plans.iter().map(|p| p.id).collect();

        let payload = delete_payload(&plans, &ids);
        assert_eq!(payload["name"], "Exome_Study, Panel_Run");
        assert_eq!(payload["name"], payload["names"]);
        assert_eq!(payload["type"], "Planned Run");
        assert_eq!(payload["action"], format!("/api/plans/{}", ids[0]));
        assert_eq!(payload["actions"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn delete_payload_labels_templates() {
        let plans = vec![plan_row("Exome Template", true)];
        let ids = vec![plans[0].id];
        let payload = delete_payload(&plans, &ids);
        assert_eq!(payload["type"], "Template");
    }
}
