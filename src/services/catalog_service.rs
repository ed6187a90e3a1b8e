//! Lookup-data assembly for the plan wizard: run types, kits, barcodes,
//! references, chips, QC types, projects, and the plugin/uploader split.

use serde_json::{json, Map, Value};
use sqlx::PgPool;

use crate::config;
use crate::database::manager::DatabaseError;
use crate::database::models::{
    ApplProduct, BedFile, Chip, DnaBarcode, KitInfo, LibraryKey, Plugin, Project, QcType,
    ReferenceGenome, RunType, ThreePrimeAdapter, VariantFrequency,
};
use crate::plan::run_type_for_code;

/// The plugin/uploader split plus surfaced IonReporter configuration.
#[derive(Debug, Default)]
pub struct PluginCatalog {
    pub plugins: Vec<Plugin>,
    pub uploaders: Vec<Plugin>,
    pub ir_config_selection: Value,
    pub ir_config_selection_1: Value,
}

/// Classify enabled plugins: a plugin whose `features` include "export"
/// (any case) is an uploader. Template contexts skip IonReporter plugins in
/// the classification pass but still list them as uploaders; their config
/// is not surfaced there since templates do not configure IonReporter.
pub fn split_plugins(enabled: Vec<Plugin>, for_template: bool) -> PluginCatalog {
    let mut catalog = PluginCatalog {
        ir_config_selection: Value::Null,
        ir_config_selection_1: Value::Null,
        ..Default::default()
    };

    let mut ir_uploaders = Vec::new();

    for plugin in enabled {
        let is_ion_reporter = plugin.name.to_lowercase().contains("ionreporter");

        if for_template && is_ion_reporter {
            ir_uploaders.push(plugin);
            continue;
        }

        if plugin.name.to_lowercase() == "ionreporteruploader_v1_0" {
            if !plugin.config.is_null() {
                catalog.ir_config_selection_1 = plugin.config.clone();
            }
        } else if plugin.name.to_lowercase().contains("ionreporteruploader")
            && !plugin.config.is_null()
        {
            catalog.ir_config_selection = plugin.config.clone();
        }

        if has_export_feature(&plugin.features) {
            catalog.uploaders.push(plugin);
        } else {
            catalog.plugins.push(plugin);
        }
    }

    catalog.uploaders.extend(ir_uploaders);
    catalog
}

/// Split published BED content into target-region and hotspot listings.
pub fn split_bed_files(content: Vec<BedFile>) -> (Vec<BedFile>, Vec<BedFile>) {
    content.into_iter().partition(|f| !f.is_hotspot)
}

/// Attach the per-application defaults map onto an assembled catalog.
pub fn attach_appl_product_defaults(catalog: &mut Value, defaults: Value) {
    if let Some(map) = catalog.as_object_mut() {
        map.insert("appl_product_defaults".into(), defaults);
    }
}

fn has_export_feature(features: &Value) -> bool {
    features
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .any(|f| f.eq_ignore_ascii_case("export"))
        })
        .unwrap_or(false)
}

async fn kits_of_type(pool: &PgPool, kit_type: &str) -> Result<Vec<KitInfo>, DatabaseError> {
    let kits = sqlx::query_as::<_, KitInfo>(
        "SELECT * FROM kit_infos WHERE kit_type = $1 AND is_active ORDER BY name",
    )
    .bind(kit_type)
    .fetch_all(pool)
    .await?;
    Ok(kits)
}

async fn enabled_plugins(pool: &PgPool) -> Result<Vec<Plugin>, DatabaseError> {
    // selected + active = plugin enabled
    let plugins = sqlx::query_as::<_, Plugin>(
        "SELECT * FROM plugins WHERE selected AND active ORDER BY name, version DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(plugins)
}

/// Everything the wizard offers for selection, independent of any specific
/// plan: one payload so the client round-trips once.
pub async fn base_catalog(pool: &PgPool, for_template: bool) -> Result<Value, DatabaseError> {
    let mut data = Map::new();

    // Generic Sequencing is displayed last, so it ships as a separate list.
    let run_types = sqlx::query_as::<_, RunType>(
        "SELECT * FROM run_types WHERE run_type <> 'GENS' ORDER BY nucleotide_type, run_type",
    )
    .fetch_all(pool)
    .await?;
    let secondary_run_types =
        sqlx::query_as::<_, RunType>("SELECT * FROM run_types WHERE run_type = 'GENS'")
            .fetch_all(pool)
            .await?;
    data.insert("run_types".into(), json!(run_types));
    data.insert("secondary_run_types".into(), json!(secondary_run_types));

    let barcode_names: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT name FROM dna_barcodes ORDER BY name")
            .fetch_all(pool)
            .await?;
    let barcode_kit_info = sqlx::query_as::<_, DnaBarcode>(
        "SELECT * FROM dna_barcodes ORDER BY name, \"index\"",
    )
    .fetch_all(pool)
    .await?;
    data.insert("barcodes".into(), json!(barcode_names));
    data.insert("barcode_kit_info".into(), json!(barcode_kit_info));

    let references = sqlx::query_as::<_, ReferenceGenome>(
        "SELECT * FROM reference_genomes WHERE index_version = $1 ORDER BY short_name",
    )
    .bind(&config::config().planning.reference_index_version)
    .fetch_all(pool)
    .await?;
    let reference_short_names: Vec<&str> =
        references.iter().map(|r| r.short_name.as_str()).collect();
    data.insert("reference_short_names".into(), json!(reference_short_names));
    data.insert("references".into(), json!(references));

    data.insert("seq_kits".into(), json!(kits_of_type(pool, "SequencingKit").await?));
    data.insert("lib_kits".into(), json!(kits_of_type(pool, "LibraryKit").await?));
    data.insert("template_kits".into(), json!(kits_of_type(pool, "TemplatingKit").await?));
    data.insert(
        "control_seq_kits".into(),
        json!(kits_of_type(pool, "ControlSequenceKit").await?),
    );
    data.insert("ion_chef_kits".into(), json!(kits_of_type(pool, "IonChefPrepKit").await?));
    data.insert(
        "sample_prep_kits".into(),
        json!(kits_of_type(pool, "SamplePrepKit").await?),
    );

    let variant_frequencies = sqlx::query_as::<_, VariantFrequency>(
        "SELECT * FROM variant_frequencies ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    data.insert("variant_frequencies".into(), json!(variant_frequencies));

    // The default entry sorts first in each selection list.
    let forward_lib_keys = sqlx::query_as::<_, LibraryKey>(
        "SELECT * FROM library_keys WHERE direction = 'Forward' AND run_mode = 'single' \
         ORDER BY is_default DESC, name",
    )
    .fetch_all(pool)
    .await?;
    let forward_3_adapters = sqlx::query_as::<_, ThreePrimeAdapter>(
        "SELECT * FROM three_prime_adapters WHERE direction = 'Forward' AND run_mode = 'single' \
         ORDER BY is_default DESC, name",
    )
    .fetch_all(pool)
    .await?;
    data.insert("forward_lib_keys".into(), json!(forward_lib_keys));
    data.insert("forward_3_adapters".into(), json!(forward_3_adapters));

    // Paired-end selections are only offered while an active paired-end
    // library kit still exists.
    let pe_lib_kits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM kit_infos \
         WHERE kit_type = 'LibraryKit' AND run_mode = 'pe' AND is_active",
    )
    .fetch_one(pool)
    .await?;

    if pe_lib_kits > 0 {
        let pe_forward_lib_keys = sqlx::query_as::<_, LibraryKey>(
            "SELECT * FROM library_keys WHERE direction = 'Forward' \
             ORDER BY is_default DESC, name",
        )
        .fetch_all(pool)
        .await?;
        let pe_forward_3_adapters = sqlx::query_as::<_, ThreePrimeAdapter>(
            "SELECT * FROM three_prime_adapters WHERE direction = 'Forward' AND run_mode = 'pe' \
             ORDER BY is_default DESC, name",
        )
        .fetch_all(pool)
        .await?;
        let reverse_lib_keys = sqlx::query_as::<_, LibraryKey>(
            "SELECT * FROM library_keys WHERE direction = 'Reverse' \
             ORDER BY is_default DESC, name",
        )
        .fetch_all(pool)
        .await?;
        let reverse_3_adapters = sqlx::query_as::<_, ThreePrimeAdapter>(
            "SELECT * FROM three_prime_adapters WHERE direction = 'Reverse' \
             ORDER BY is_default DESC, name",
        )
        .fetch_all(pool)
        .await?;
        let pe_adapter_kits = sqlx::query_as::<_, KitInfo>(
            "SELECT * FROM kit_infos \
             WHERE kit_type = 'AdapterKit' AND run_mode = 'pe' AND is_active ORDER BY name",
        )
        .fetch_all(pool)
        .await?;

        data.insert("pe_forward_lib_keys".into(), json!(pe_forward_lib_keys));
        data.insert("pe_forward_3_adapters".into(), json!(pe_forward_3_adapters));
        data.insert("reverse_lib_keys".into(), json!(reverse_lib_keys));
        data.insert("reverse_3_adapters".into(), json!(reverse_3_adapters));
        data.insert("paired_end_lib_adapters".into(), json!(pe_adapter_kits));
    } else {
        data.insert("pe_forward_lib_keys".into(), Value::Null);
        data.insert("pe_forward_3_adapters".into(), Value::Null);
        data.insert("reverse_lib_keys".into(), Value::Null);
        data.insert("reverse_3_adapters".into(), Value::Null);
        data.insert("paired_end_lib_adapters".into(), Value::Null);
    }

    // Customer-facing chip names are not unique; dedupe on description.
    let chips = sqlx::query_as::<_, Chip>(
        "SELECT DISTINCT ON (description) * FROM chips WHERE is_active \
         ORDER BY description, name",
    )
    .fetch_all(pool)
    .await?;
    data.insert("chip_types".into(), json!(chips));

    let qc_types =
        sqlx::query_as::<_, QcType>("SELECT * FROM qc_types ORDER BY qc_name")
            .fetch_all(pool)
            .await?;
    data.insert("qc_types".into(), json!(qc_types));

    let projects =
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE public ORDER BY name")
            .fetch_all(pool)
            .await?;
    data.insert("projects".into(), json!(projects));

    // Selectable target/hotspot region files come from published BED
    // content; only the detail entries are offered.
    let bed_content = sqlx::query_as::<_, BedFile>(
        "SELECT * FROM bed_files WHERE path LIKE '%/unmerged/detail/%' ORDER BY path",
    )
    .fetch_all(pool)
    .await?;
    let (bed_files, hotspot_files) = split_bed_files(bed_content);
    data.insert(
        "bed_file_paths".into(),
        json!(bed_files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>()),
    );
    data.insert(
        "hotspot_paths".into(),
        json!(hotspot_files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>()),
    );
    data.insert("bed_files".into(), json!(bed_files));
    data.insert("hotspot_files".into(), json!(hotspot_files));

    let plugin_catalog = split_plugins(enabled_plugins(pool).await?, for_template);
    data.insert("plugins".into(), json!(plugin_catalog.plugins));
    data.insert("uploaders".into(), json!(plugin_catalog.uploaders));
    data.insert("ir_config_selection".into(), plugin_catalog.ir_config_selection);
    data.insert("ir_config_selection_1".into(), plugin_catalog.ir_config_selection_1);

    Ok(Value::Object(data))
}

/// Per-run-type default product settings; run types without an active
/// default product map to the string "none".
pub async fn appl_product_defaults(pool: &PgPool) -> Result<Value, DatabaseError> {
    let run_types = sqlx::query_as::<_, RunType>("SELECT * FROM run_types").fetch_all(pool).await?;

    let mut defaults = Map::new();
    for run_type in run_types {
        // One default per application is expected; take the first either way.
        let product = sqlx::query_as::<_, ApplProduct>(
            "SELECT * FROM appl_products \
             WHERE is_active AND is_default AND appl_type = $1 ORDER BY id LIMIT 1",
        )
        .bind(&run_type.run_type)
        .fetch_optional(pool)
        .await?;

        let entry = match product {
            Some(product) => {
                let chip_details = match &product.default_chip_type {
                    Some(chip_type) => {
                        let chip = sqlx::query_as::<_, Chip>("SELECT * FROM chips WHERE name = $1")
                            .bind(chip_type)
                            .fetch_optional(pool)
                            .await?;
                        json!(chip)
                    }
                    None => Value::Null,
                };

                let mut entry = serde_json::to_value(&product).unwrap_or(Value::Null);
                entry["run_type"] = json!(product.appl_type);
                entry["chip_type_details"] = chip_details;
                entry
            }
            None => json!("none"),
        };

        defaults.insert(run_type.run_type, entry);
    }

    Ok(Value::Object(defaults))
}

/// Wizard context for creating a new template or planned run from an
/// application shortcut code.
pub async fn wizard_new_context(
    pool: &PgPool,
    code: &str,
    for_template: bool,
) -> Result<Value, DatabaseError> {
    let mut data = base_catalog(pool, for_template).await?;
    let defaults = appl_product_defaults(pool).await?;

    let product_code = run_type_for_code(code);
    let selected = defaults.get(product_code).cloned().unwrap_or(Value::Null);

    attach_appl_product_defaults(&mut data, defaults);

    Ok(json!({
        "intent": if for_template { "New" } else { "Plan Run New" },
        "plan_template_data": data,
        "selected_plan_template": Value::Null,
        "selected_appl_product_data": selected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn plugin(name: &str, features: Value, config: Value) -> Plugin {
        Plugin {
            id: Uuid::new_v4(),
            name: name.to_string(),
            version: "1.0".to_string(),
            selected: true,
            active: true,
            autorun: false,
            features,
            config,
        }
    }

    #[test]
    fn export_feature_marks_uploader() {
        let catalog = split_plugins(
            vec![
                plugin("variantCaller", json!(["analysis"]), Value::Null),
                plugin("FileExporter", json!(["Export"]), Value::Null),
                plugin("noFeatures", Value::Null, Value::Null),
            ],
            false,
        );
        assert_eq!(catalog.plugins.len(), 2);
        assert_eq!(catalog.uploaders.len(), 1);
        assert_eq!(catalog.uploaders[0].name, "FileExporter");
    }

    #[test]
    fn ion_reporter_config_is_surfaced_for_plans() {
        let catalog = split_plugins(
            vec![
                plugin(
                    "IonReporterUploader_V1_0",
                    json!(["export"]),
                    json!({"workflows": ["a"]}),
                ),
                plugin(
                    "IonReporterUploader_V1_2",
                    json!(["export"]),
                    json!({"workflows": ["b"]}),
                ),
            ],
            false,
        );
        assert_eq!(catalog.ir_config_selection_1["workflows"], json!(["a"]));
        assert_eq!(catalog.ir_config_selection["workflows"], json!(["b"]));
        assert_eq!(catalog.uploaders.len(), 2);
    }

    #[test]
    fn templates_defer_ion_reporter_but_keep_uploaders() {
        let catalog = split_plugins(
            vec![
                plugin(
                    "IonReporterUploader_V1_2",
                    json!(["export"]),
                    json!({"workflows": ["b"]}),
                ),
                plugin("variantCaller", json!([]), Value::Null),
            ],
            true,
        );
        // config is not fetched for template contexts
        assert!(catalog.ir_config_selection.is_null());
        // but the uploader is still listed
        assert_eq!(catalog.uploaders.len(), 1);
        assert_eq!(catalog.uploaders[0].name, "IonReporterUploader_V1_2");
        assert_eq!(catalog.plugins.len(), 1);
    }

    #[test]
    fn bed_content_splits_on_hotspot_flag() {
        let bed = |path: &str, is_hotspot: bool| BedFile {
            id: Uuid::new_v4(),
            file: format!("/results/uploads{}", path),
            path: path.to_string(),
            is_hotspot,
        };
        let (bed_files, hotspot_files) = split_bed_files(vec![
            bed("/unmerged/detail/exome.bed", false),
            bed("/unmerged/detail/hotspots.bed", true),
            bed("/unmerged/detail/panel.bed", false),
        ]);

        assert_eq!(bed_files.len(), 2);
        assert_eq!(hotspot_files.len(), 1);
        assert!(hotspot_files[0].path.contains("hotspots"));
    }

    #[test]
    fn appl_defaults_land_in_catalog() {
        let mut catalog = json!({ "plugins": [] });
        attach_appl_product_defaults(&mut catalog, json!({ "AMPS": "none" }));
        assert_eq!(catalog["appl_product_defaults"]["AMPS"], "none");
    }
}
