use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Sequencing application (AMPS, TARS, WGNM, ...).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunType {
    pub id: Uuid,
    pub run_type: String,
    pub description: Option<String>,
    pub nucleotide_type: Option<String>,
}

/// Default product configuration for one application.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplProduct {
    pub id: Uuid,
    pub appl_type: String,
    pub is_active: bool,
    pub is_default: bool,
    pub default_genome_ref_name: Option<String>,
    pub default_target_region_bed_file: Option<String>,
    pub default_hot_spot_region_bed_file: Option<String>,
    pub default_sequencing_kit: Option<String>,
    pub default_library_kit: Option<String>,
    pub default_paired_end_sequencing_kit: Option<String>,
    pub default_paired_end_library_kit: Option<String>,
    pub default_paired_end_adapter_kit: Option<String>,
    pub default_chip_type: Option<String>,
    pub default_flow_count: Option<i32>,
    pub default_template_kit: Option<String>,
    pub default_control_seq_kit: Option<String>,
    pub default_ion_chef_prep_kit: Option<String>,
    pub default_sample_prep_kit: Option<String>,
    pub default_variant_frequency: Option<String>,
    pub default_barcode_kit_name: Option<String>,
    pub is_paired_end_supported: bool,
    pub is_default_paired_end: bool,
    pub is_default_barcoded: bool,
    pub is_hot_spot_region_bed_file_supported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferenceGenome {
    pub id: Uuid,
    pub short_name: String,
    pub name: String,
    pub index_version: String,
}

/// One barcode within a barcode set; sets share a `name`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DnaBarcode {
    pub id: Uuid,
    pub name: String,
    pub id_str: String,
    pub sequence: String,
    pub index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chip {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub slots: Option<i32>,
    pub is_active: bool,
}

/// Reagent kit of any type (sequencing, library, templating, ...).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KitInfo {
    pub id: Uuid,
    pub kit_type: String,
    pub name: String,
    pub description: Option<String>,
    pub flow_count: Option<i32>,
    pub run_mode: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LibraryKey {
    pub id: Uuid,
    pub name: String,
    pub sequence: String,
    pub direction: String,
    pub run_mode: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThreePrimeAdapter {
    pub id: Uuid,
    pub name: String,
    pub sequence: String,
    pub direction: String,
    pub run_mode: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QcType {
    pub id: Uuid,
    pub qc_name: String,
    pub description: Option<String>,
    pub min_threshold: i32,
    pub max_threshold: i32,
    pub default_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub creator: Option<String>,
    pub public: bool,
}

/// Analysis plugin. `features` and `config` are jsonb metadata blobs; a
/// plugin whose features include "export" is treated as an uploader.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plugin {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub selected: bool,
    pub active: bool,
    pub autorun: bool,
    pub features: Value,
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VariantFrequency {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Published BED content selectable in the wizard. `file` is the full path
/// on disk, `path` the published detail path; hotspot files are flagged.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BedFile {
    pub id: Uuid,
    pub file: String,
    pub path: String,
    pub is_hotspot: bool,
}
