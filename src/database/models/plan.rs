use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A planned run or plan template. `is_reusable = true` marks a template.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlannedRun {
    pub id: Uuid,
    pub plan_guid: Uuid,
    pub plan_name: String,
    pub plan_displayed_name: String,
    pub run_type: String,
    pub run_mode: String,
    pub is_reusable: bool,
    pub is_plan_group: bool,
    pub is_system: bool,
    pub is_favorite: bool,
    pub plan_status: String,
    pub username: Option<String>,
    pub templating_kit_name: Option<String>,
    pub control_sequence_kit_name: Option<String>,
    pub sample_prep_kit_name: Option<String>,
    pub paired_end_library_adapter_name: Option<String>,
    pub use_pre_beadfind: bool,
    pub use_post_beadfind: bool,
    pub pre_analysis: bool,
    pub notes: Option<String>,
    pub date: DateTime<Utc>,
}

/// The experiment row backing a plan. One per plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Experiment {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub exp_name: String,
    pub display_name: String,
    pub unique_name: String,
    pub chip_type: Option<String>,
    pub flows: Option<i32>,
    pub auto_analyze: bool,
    pub sequence_kit_name: Option<String>,
    pub notes: Option<String>,
}

/// Experiment analysis settings ("EAS"). One per experiment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExperimentAnalysisSettings {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub is_editable: bool,
    pub barcode_kit_name: Option<String>,
    pub barcoded_samples: Value,
    pub target_region_bed_file: Option<String>,
    pub hot_spot_region_bed_file: Option<String>,
    pub three_prime_adapter: Option<String>,
    pub library_key: Option<String>,
    pub library_kit_name: Option<String>,
    pub reference: Option<String>,
    pub selected_plugins: Value,
    pub variant_frequency: Option<String>,
}

/// Per-plan QC threshold override.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlannedRunQc {
    pub id: Uuid,
    pub planned_run_id: Uuid,
    pub qc_type_id: Uuid,
    pub threshold: i32,
}
