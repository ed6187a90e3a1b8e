//! Input types for the save-plan pipeline.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// JSON body accepted by POST /api/plans/save/{id}.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SavePlanRequest {
    pub submit_intent: String,
    pub run_mode: String,
    pub plan_displayed_name: String,
    pub notes: String,
    pub run_type: String,
    pub is_system: bool,
    pub is_favorite: bool,
    pub use_pre_beadfind: bool,
    pub use_post_beadfind: bool,

    pub template_kit_name: String,
    /// Used instead of `template_kit_name` when the Ion Chef prep
    /// instrument is selected.
    pub template_kit_ion_chef_name: String,
    pub sample_prep_instrument_type: String,
    pub control_sequence_kit_name: String,
    pub sample_prep_kit_name: String,
    pub paired_end_library_adapter_name: String,

    pub chip_type: String,
    pub flows: Option<i32>,
    pub sequence_kit_name: String,
    pub library_kit_name: String,
    pub library_key: String,
    pub forward_3_prime_adapter: String,
    /// Reference genome short name.
    pub library: String,
    pub target_region_bed_file: String,
    pub hot_spot_region_bed_file: String,
    pub variant_frequency: String,

    pub barcode_kit_name: String,
    pub barcoded_samples: Vec<BarcodeSampleAssignment>,
    pub samples: Vec<String>,
    /// Sample names coming from the IonReporter configuration panel;
    /// takes precedence over `samples` when an IR uploader is selected.
    pub ir_samples: Vec<String>,

    pub selected_plugins: BTreeMap<String, SelectedPlugin>,
    pub ir_config_list: Vec<Value>,

    /// Names of existing projects to associate.
    pub projects: Vec<String>,
    /// Names of projects to create on the fly.
    pub new_projects: Vec<String>,

    /// QC thresholds keyed by qc_name.
    pub qc_thresholds: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarcodeSampleAssignment {
    pub barcode: String,
    pub sample: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectedPlugin {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub user_input: Value,
}

impl SavePlanRequest {
    /// savePlan / updatePlan produce a planned run; every other intent a
    /// reusable template.
    pub fn is_reusable(&self) -> bool {
        !(self.submit_intent == "savePlan" || self.submit_intent == "updatePlan")
    }

    pub fn is_paired_end(&self) -> bool {
        self.run_mode == "pe"
    }

    /// The templating kit, honoring the Ion Chef instrument selection.
    pub fn selected_templating_kit(&self) -> &str {
        if self.sample_prep_instrument_type == "ionChef" {
            &self.template_kit_ion_chef_name
        } else {
            &self.template_kit_name
        }
    }
}

/// True when any selected plugin is an IonReporter uploader other than the
/// legacy V1_0 plugin.
pub fn ir_uploader_selected<'a>(names: impl Iterator<Item = &'a str>) -> bool {
    names.into_iter().any(|name| {
        name.to_lowercase().contains("ionreporteruploader") && name != "IonReporterUploader_V1_0"
    })
}

/// Rewrite IonReporter `setid` values so every distinct setid in this save
/// gets a globally unique suffix. Entries sharing a setid keep sharing the
/// rewritten one.
pub fn suffix_ir_set_ids(ir_config_list: &mut [Value]) {
    let mut id_uuid: BTreeMap<String, String> = BTreeMap::new();

    for config in ir_config_list.iter() {
        if let Some(setid) = config.get("setid").and_then(Value::as_str) {
            if !setid.is_empty() {
                id_uuid
                    .entry(setid.to_string())
                    .or_insert_with(|| Uuid::new_v4().to_string());
            }
        }
    }

    for config in ir_config_list.iter_mut() {
        let suffixed = match config.get("setid").and_then(Value::as_str) {
            Some(setid) if !setid.is_empty() => {
                format!("{}__{}", setid, id_uuid[setid])
            }
            _ => continue,
        };
        config["setid"] = Value::String(suffixed);
    }
}

/// Fold per-barcode assignments into the stored shape:
/// `{sample: {"barcodes": [id_str, ...]}}`. Assignments with an empty
/// barcode or sample are ignored, matching the form semantics.
pub fn fold_barcoded_samples(assignments: &[BarcodeSampleAssignment]) -> Map<String, Value> {
    let mut folded: Map<String, Value> = Map::new();

    for assignment in assignments {
        let sample = assignment.sample.trim();
        if assignment.barcode.is_empty() || sample.is_empty() {
            continue;
        }

        let entry = folded
            .entry(sample.to_string())
            .or_insert_with(|| json!({ "barcodes": [] }));
        if let Some(barcodes) = entry.get_mut("barcodes").and_then(Value::as_array_mut) {
            barcodes.push(Value::String(assignment.barcode.clone()));
        }
    }

    folded
}

/// Sample and plan names are stored with spaces collapsed to underscores.
pub fn normalize_name(displayed: &str) -> String {
    displayed.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reusable_tracks_submit_intent() {
        let mut req = SavePlanRequest::default();
        req.submit_intent = "savePlan".into();
        assert!(!req.is_reusable());
        req.submit_intent = "updatePlan".into();
        assert!(!req.is_reusable());
        req.submit_intent = "saveTemplate".into();
        assert!(req.is_reusable());
    }

    #[test]
    fn ion_chef_switches_templating_kit() {
        let mut req = SavePlanRequest::default();
        req.template_kit_name = "Ion PGM Template OT2 200 Kit".into();
        req.template_kit_ion_chef_name = "Ion PI IC 200 Kit".into();
        assert_eq!(req.selected_templating_kit(), "Ion PGM Template OT2 200 Kit");

        req.sample_prep_instrument_type = "ionChef".into();
        assert_eq!(req.selected_templating_kit(), "Ion PI IC 200 Kit");
    }

    #[test]
    fn ir_selection_skips_v1_plugin() {
        assert!(!ir_uploader_selected(
            ["IonReporterUploader_V1_0"].into_iter()
        ));
        assert!(ir_uploader_selected(
            ["IonReporterUploader_V1_2"].into_iter()
        ));
        assert!(!ir_uploader_selected(["variantCaller"].into_iter()));
    }

    #[test]
    fn set_ids_share_suffix_within_a_set() {
        let mut configs = vec![
            json!({"setid": "1", "workflow": "a"}),
            json!({"setid": "1", "workflow": "b"}),
            json!({"setid": "2", "workflow": "c"}),
            json!({"workflow": "no-setid"}),
            json!({"setid": "", "workflow": "empty"}),
        ];
        suffix_ir_set_ids(&mut configs);

        let s0 = configs[0]["setid"].as_str().unwrap();
        let s1 = configs[1]["setid"].as_str().unwrap();
        let s2 = configs[2]["setid"].as_str().unwrap();
        assert_eq!(s0, s1);
        assert_ne!(s0, s2);
        assert!(s0.starts_with("1__"));
        assert!(s2.starts_with("2__"));
        assert!(configs[3].get("setid").is_none());
        assert_eq!(configs[4]["setid"], "");
    }

    #[test]
    fn barcoded_samples_fold_by_sample() {
        let assignments = vec![
            BarcodeSampleAssignment { barcode: "IonXpress_001".into(), sample: "s1".into() },
            BarcodeSampleAssignment { barcode: "IonXpress_002".into(), sample: "s1".into() },
            BarcodeSampleAssignment { barcode: "IonXpress_003".into(), sample: "s2".into() },
            BarcodeSampleAssignment { barcode: "".into(), sample: "dropped".into() },
            BarcodeSampleAssignment { barcode: "IonXpress_004".into(), sample: "  ".into() },
        ];
        let folded = fold_barcoded_samples(&assignments);

        assert_eq!(folded.len(), 2);
        assert_eq!(
            folded["s1"]["barcodes"],
            json!(["IonXpress_001", "IonXpress_002"])
        );
        assert_eq!(folded["s2"]["barcodes"], json!(["IonXpress_003"]));
    }

    #[test]
    fn names_normalize_spaces() {
        assert_eq!(normalize_name("My Plan 1"), "My_Plan_1");
    }
}
