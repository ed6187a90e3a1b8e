//! Pre-persistence pipeline for saving a plan or template: validation,
//! sample fan-out, and per-plan plugin configuration. No I/O here; the
//! service layer owns the transaction.

use serde_json::{json, Map, Value};

use super::input::{
    fold_barcoded_samples, ir_uploader_selected, normalize_name, suffix_ir_set_ids,
    SavePlanRequest,
};
use super::validate::{validate_notes, validate_plan_name, SampleValidation, ValidationFailure};

/// One planned_runs row (plus satellites) to write. Editing a plan that now
/// fans out to several samples updates the existing row first and creates
/// the rest.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    pub plan_displayed_name: String,
    pub plan_name: String,
    pub sample_displayed_name: String,
    pub sample_name: String,
    pub barcoded_samples: Value,
    pub selected_plugins: Value,
}

#[derive(Debug, Clone)]
pub struct PreparedSave {
    pub is_reusable: bool,
    pub is_plan_group: bool,
    pub label: &'static str,
    pub plans: Vec<PreparedPlan>,
}

/// Validate the request and expand it into the per-sample plan rows.
///
/// `ir_autorun_active` reports whether any non-V1 IonReporter uploader is
/// configured to auto-run (queried by the caller); auto-run counts as an
/// implicit uploader selection.
pub fn prepare(
    mut request: SavePlanRequest,
    ir_autorun_active: bool,
) -> Result<PreparedSave, ValidationFailure> {
    let is_reusable = request.is_reusable();
    let is_plan_group = request.is_paired_end() && !is_reusable;
    let label = if is_reusable { "Template" } else { "Run Plan" };

    if request.is_paired_end() {
        return Err(ValidationFailure(format!(
            "Error, paired-end plan is no longer supported. {} will not be saved.",
            label
        )));
    }

    let plan_displayed_name = request.plan_displayed_name.trim().to_string();
    validate_plan_name(&plan_displayed_name, label)?;
    validate_notes(&request.notes, label)?;

    // IonReporter: explicit uploader selection, or any auto-run uploader.
    let ir_selected = ir_uploader_selected(
        request.selected_plugins.values().map(|p| p.name.as_str()),
    ) || ir_autorun_active;

    if ir_selected {
        suffix_ir_set_ids(&mut request.ir_config_list);
        if ir_autorun_active && request.ir_samples.is_empty() {
            // Auto-run without an explicit IR sample list falls back to the
            // plain sample entries.
            request.ir_samples = request.samples.clone();
        }
    }

    let barcoded = !request.barcode_kit_name.is_empty();

    // One plan per entry; barcoded plans carry samples in barcoded_samples
    // instead, so the list holds a single empty slot.
    let mut sample_list: Vec<String> = Vec::new();
    let mut validation = SampleValidation::default();
    let mut barcoded_samples = Value::Object(Map::new());

    if is_reusable {
        // Samples are entered only when saving a planned run, not a template.
        sample_list.push(String::new());
    } else if barcoded {
        for assignment in &request.barcoded_samples {
            let sample = assignment.sample.trim();
            if !assignment.barcode.is_empty() && !sample.is_empty() {
                validation.check(sample);
            }
        }
        let folded = fold_barcoded_samples(&request.barcoded_samples);
        if folded.is_empty() {
            return Err(ValidationFailure(
                "Error, please enter at least one barcode sample name.".to_string(),
            ));
        }
        barcoded_samples = Value::Object(folded);
        sample_list.push(String::new());
    } else {
        let source = if ir_selected {
            &request.ir_samples
        } else {
            &request.samples
        };
        for sample in source {
            let sample = sample.trim();
            if sample.is_empty() {
                continue;
            }
            if validation.check(sample) {
                sample_list.push(sample.to_string());
            }
        }
        if sample_list.is_empty() && validation.is_clean() {
            return Err(ValidationFailure(
                "Error, please enter a sample name for the run plan.".to_string(),
            ));
        }
    }

    if let Some(err) = validation.into_error() {
        return Err(err);
    }

    let multi_sample = sample_list.len() > 1;
    let mut plans = Vec::with_capacity(sample_list.len());

    for (i, sample) in sample_list.iter().enumerate() {
        let selected_plugins = plugins_for_sample(&request, i, barcoded);

        let displayed = if multi_sample {
            format!("{}_{}", plan_displayed_name, sample)
        } else {
            plan_displayed_name.clone()
        };

        plans.push(PreparedPlan {
            plan_name: normalize_name(&displayed),
            plan_displayed_name: displayed,
            sample_displayed_name: sample.clone(),
            sample_name: normalize_name(sample),
            barcoded_samples: barcoded_samples.clone(),
            selected_plugins,
        });
    }

    Ok(PreparedSave {
        is_reusable,
        is_plan_group,
        label,
        plans,
    })
}

/// Serialize the selected plugins for the i-th plan, assigning IonReporter
/// uploader user input. Multiple IR configs on a non-barcoded run are
/// distributed one per sample; otherwise every plan carries the full list.
fn plugins_for_sample(request: &SavePlanRequest, i: usize, barcoded: bool) -> Value {
    let mut plugins = Map::new();

    for (key, plugin) in &request.selected_plugins {
        let mut user_input = plugin.user_input.clone();

        if !request.ir_config_list.is_empty()
            && plugin.name.to_lowercase().contains("ionreporteruploader")
        {
            user_input = if request.ir_config_list.len() > 1 && !barcoded {
                match request.ir_config_list.get(i) {
                    Some(config) => json!([config]),
                    None => json!(request.ir_config_list),
                }
            } else {
                json!(request.ir_config_list)
            };
        }

        plugins.insert(
            key.clone(),
            json!({
                "name": plugin.name,
                "version": plugin.version,
                "userInput": user_input,
            }),
        );
    }

    Value::Object(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::input::{BarcodeSampleAssignment, SelectedPlugin};

    fn base_request() -> SavePlanRequest {
        let mut req = SavePlanRequest::default();
        req.submit_intent = "savePlan".into();
        req.run_mode = "single".into();
        req.plan_displayed_name = "Exome Study".into();
        req.run_type = "AMPS".into();
        req
    }

    #[test]
    fn paired_end_is_rejected() {
        let mut req = base_request();
        req.run_mode = "pe".into();
        let err = prepare(req, false).unwrap_err();
        assert_eq!(
            err.0,
            "Error, paired-end plan is no longer supported. Run Plan will not be saved."
        );
    }

    #[test]
    fn template_gets_single_empty_sample_slot() {
        let mut req = base_request();
        req.submit_intent = "saveTemplate".into();
        let prepared = prepare(req, false).unwrap();
        assert!(prepared.is_reusable);
        assert_eq!(prepared.plans.len(), 1);
        assert_eq!(prepared.plans[0].sample_displayed_name, "");
        assert_eq!(prepared.plans[0].plan_name, "Exome_Study");
    }

    #[test]
    fn run_plan_requires_a_sample() {
        let req = base_request();
        let err = prepare(req, false).unwrap_err();
        assert_eq!(err.0, "Error, please enter a sample name for the run plan.");
    }

    #[test]
    fn multi_sample_fans_out_with_suffix() {
        let mut req = base_request();
        req.samples = vec!["Blood 1".into(), "Blood 2".into()];
        let prepared = prepare(req, false).unwrap();

        assert_eq!(prepared.plans.len(), 2);
        assert_eq!(prepared.plans[0].plan_displayed_name, "Exome Study_Blood 1");
        assert_eq!(prepared.plans[0].plan_name, "Exome_Study_Blood_1");
        assert_eq!(prepared.plans[0].sample_name, "Blood_1");
        assert_eq!(prepared.plans[1].sample_displayed_name, "Blood 2");
    }

    #[test]
    fn single_sample_keeps_plain_plan_name() {
        let mut req = base_request();
        req.samples = vec!["Blood 1".into()];
        let prepared = prepare(req, false).unwrap();
        assert_eq!(prepared.plans[0].plan_displayed_name, "Exome Study");
    }

    #[test]
    fn barcoded_plan_requires_assignments() {
        let mut req = base_request();
        req.barcode_kit_name = "IonXpress".into();
        let err = prepare(req, false).unwrap_err();
        assert_eq!(err.0, "Error, please enter at least one barcode sample name.");
    }

    #[test]
    fn barcoded_plan_folds_samples() {
        let mut req = base_request();
        req.barcode_kit_name = "IonXpress".into();
        req.barcoded_samples = vec![
            BarcodeSampleAssignment { barcode: "IonXpress_001".into(), sample: "s1".into() },
            BarcodeSampleAssignment { barcode: "IonXpress_002".into(), sample: "s2".into() },
        ];
        let prepared = prepare(req, false).unwrap();

        assert_eq!(prepared.plans.len(), 1);
        let folded = &prepared.plans[0].barcoded_samples;
        assert_eq!(folded["s1"]["barcodes"], json!(["IonXpress_001"]));
        assert_eq!(folded["s2"]["barcodes"], json!(["IonXpress_002"]));
    }

    #[test]
    fn bad_sample_names_reported_together() {
        let mut req = base_request();
        req.samples = vec!["ok".into(), "bad/one".into(), "_leading".into()];
        let err = prepare(req, false).unwrap_err();
        assert!(err.0.contains("bad/one"));
        assert!(err.0.contains("_leading"));
    }

    #[test]
    fn ir_configs_distributed_per_sample() {
        let mut req = base_request();
        req.samples = vec!["s1".into(), "s2".into()];
        req.ir_samples = vec!["s1".into(), "s2".into()];
        req.selected_plugins.insert(
            "IonReporterUploader_V1_2".into(),
            SelectedPlugin {
                name: "IonReporterUploader_V1_2".into(),
                version: Some("1.2".into()),
                user_input: Value::Null,
            },
        );
        req.ir_config_list = vec![
            json!({"setid": "1", "workflow": "w1"}),
            json!({"setid": "2", "workflow": "w2"}),
        ];

        let prepared = prepare(req, false).unwrap();
        assert_eq!(prepared.plans.len(), 2);

        let first = &prepared.plans[0].selected_plugins["IonReporterUploader_V1_2"]["userInput"];
        let second = &prepared.plans[1].selected_plugins["IonReporterUploader_V1_2"]["userInput"];
        assert_eq!(first.as_array().unwrap().len(), 1);
        assert_eq!(second.as_array().unwrap().len(), 1);
        assert_eq!(first[0]["workflow"], "w1");
        assert_eq!(second[0]["workflow"], "w2");
        // setids were rewritten with unique suffixes
        assert!(first[0]["setid"].as_str().unwrap().starts_with("1__"));
    }

    #[test]
    fn autorun_counts_as_ir_selection() {
        let mut req = base_request();
        req.samples = vec!["s1".into()];
        req.ir_config_list = vec![json!({"setid": "7"})];
        let prepared = prepare(req, true).unwrap();
        // ir_samples fell back to samples, so the plan still fans out
        assert_eq!(prepared.plans.len(), 1);
        assert_eq!(prepared.plans[0].sample_displayed_name, "s1");
    }
}
