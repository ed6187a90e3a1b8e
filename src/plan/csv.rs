//! Batch planning CSV schema: the downloadable pre-filled sheet and the
//! upload parser/validator. Column order is part of the contract with the
//! sheet users fill in.

use std::collections::BTreeMap;

use thiserror::Error;

use super::validate::{
    invalid_length_msg, is_invalid_leading_chars, is_valid_chars, is_valid_length,
    validate_project_name, ERROR_MSG_INVALID_CHARS, ERROR_MSG_INVALID_LEADING_CHARS,
};
use crate::config;

pub const COL_TEMPLATE_NAME: &str = "Template name to copy";
pub const COL_PLAN_NAME: &str = "Plan name";
pub const COL_SAMPLE: &str = "Sample";
pub const COL_BARCODE_KIT: &str = "Barcode kit";
pub const COL_REFERENCE: &str = "Reference library";
pub const COL_TARGET_BED: &str = "Target regions BED file";
pub const COL_HOTSPOT_BED: &str = "Hotspot regions BED file";
pub const COL_FLOWS: &str = "Flows";
pub const COL_SEQ_KIT: &str = "Sequencing kit";
pub const COL_NOTES: &str = "Notes";
pub const COL_PROJECTS: &str = "Projects";

const BASE_COLUMNS: [&str; 11] = [
    COL_TEMPLATE_NAME,
    COL_PLAN_NAME,
    COL_SAMPLE,
    COL_BARCODE_KIT,
    COL_REFERENCE,
    COL_TARGET_BED,
    COL_HOTSPOT_BED,
    COL_FLOWS,
    COL_SEQ_KIT,
    COL_NOTES,
    COL_PROJECTS,
];

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("Error: batch planning file is empty")]
    Empty,

    #[error("batch planning file is missing required column: {0}")]
    MissingColumn(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Full header: the fixed columns followed by one column per QC type.
pub fn header(qc_names: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(qc_names.iter().cloned());
    columns
}

/// Pre-filled values from the source template, repeated once per requested
/// plan in the downloaded sheet.
#[derive(Debug, Clone, Default)]
pub struct BatchTemplateData {
    pub template_name: String,
    pub sample: String,
    pub barcode_kit: String,
    pub reference: String,
    pub target_bed: String,
    pub hotspot_bed: String,
    pub flows: String,
    pub sequencing_kit: String,
    pub notes: String,
    pub qc_defaults: BTreeMap<String, String>,
}

impl BatchTemplateData {
    fn row(&self, qc_names: &[String]) -> Vec<String> {
        let mut row = vec![
            self.template_name.clone(),
            String::new(), // plan name is filled in by the user
            self.sample.clone(),
            self.barcode_kit.clone(),
            self.reference.clone(),
            self.target_bed.clone(),
            self.hotspot_bed.clone(),
            self.flows.clone(),
            self.sequencing_kit.clone(),
            self.notes.clone(),
            String::new(), // projects
        ];
        for qc in qc_names {
            row.push(self.qc_defaults.get(qc).cloned().unwrap_or_default());
        }
        row
    }
}

/// Serialize the downloadable batch sheet: header plus `count` copies of the
/// template row.
pub fn write_batch_csv(
    template: &BatchTemplateData,
    qc_names: &[String],
    count: usize,
) -> Result<String, CsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header(qc_names))?;

    let row = template.row(qc_names);
    for _ in 0..count {
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CsvError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// One parsed upload row. `row_number` is 1-based over data rows, matching
/// the failure map the client shows.
#[derive(Debug, Clone, Default)]
pub struct CsvPlanRow {
    pub row_number: usize,
    pub template_name: String,
    pub plan_name: String,
    pub sample: String,
    pub barcode_kit: String,
    pub reference: String,
    pub target_bed: String,
    pub hotspot_bed: String,
    pub flows: String,
    pub sequencing_kit: String,
    pub notes: String,
    pub projects: String,
    pub qc: BTreeMap<String, String>,
}

impl CsvPlanRow {
    /// Rows with no values at all are skipped rather than failed.
    pub fn is_blank(&self) -> bool {
        self.template_name.is_empty()
            && self.plan_name.is_empty()
            && self.sample.is_empty()
            && self.projects.is_empty()
            && self.qc.values().all(|v| v.is_empty())
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn flows_value(&self) -> Option<i32> {
        self.flows.trim().parse().ok()
    }

    /// QC thresholds that parsed; malformed values are reported by
    /// `validate` instead.
    pub fn qc_thresholds(&self) -> BTreeMap<String, i32> {
        self.qc
            .iter()
            .filter_map(|(name, value)| {
                value.trim().parse::<i32>().ok().map(|v| (name.clone(), v))
            })
            .collect()
    }

    /// All validation problems for this row. Template existence is checked
    /// against the database by the import service.
    pub fn validate(&self) -> Vec<String> {
        let limits = &config::config().planning;
        let mut errors = Vec::new();

        if self.template_name.is_empty() {
            errors.push("Template name is required".to_string());
        }

        if self.plan_name.is_empty() {
            errors.push("Plan name is required".to_string());
        } else if !is_valid_chars(&self.plan_name) {
            errors.push(format!("Plan name{}", ERROR_MSG_INVALID_CHARS));
        } else if !is_valid_length(&self.plan_name, limits.max_length_plan_name) {
            errors.push(format!(
                "Plan name{}",
                invalid_length_msg(limits.max_length_plan_name)
            ));
        }

        if !self.sample.is_empty() {
            if !is_valid_chars(&self.sample) {
                errors.push(format!("Sample name{}", ERROR_MSG_INVALID_CHARS));
            } else if is_invalid_leading_chars(&self.sample) {
                errors.push(format!("Sample name{}", ERROR_MSG_INVALID_LEADING_CHARS));
            } else if !is_valid_length(&self.sample, limits.max_length_sample_name) {
                errors.push(format!(
                    "Sample name{}",
                    invalid_length_msg(limits.max_length_sample_name)
                ));
            }
        }

        if !self.notes.is_empty() {
            if !is_valid_chars(&self.notes) {
                errors.push(format!("Notes{}", ERROR_MSG_INVALID_CHARS));
            } else if !is_valid_length(&self.notes, limits.max_length_notes) {
                errors.push(format!("Notes{}", invalid_length_msg(limits.max_length_notes)));
            }
        }

        if !self.flows.trim().is_empty() && self.flows_value().is_none() {
            errors.push("Flows must be a whole number".to_string());
        }

        for name in self.project_names() {
            if let Err(err) = validate_project_name(&name) {
                errors.push(err.0);
            }
        }

        for (qc_name, value) in &self.qc {
            if !value.trim().is_empty() && value.trim().parse::<i32>().is_err() {
                errors.push(format!("{} must be a whole number", qc_name));
            }
        }

        errors
    }
}

/// Parse an uploaded batch sheet. Blank rows are kept (the caller decides
/// whether to skip them); a file without the required columns or with no
/// rows at all is an error.
pub fn parse(bytes: &[u8], qc_names: &[String]) -> Result<Vec<CsvPlanRow>, CsvError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(CsvError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let column_index = |name: &str| -> Option<usize> {
        headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    };

    for required in [COL_TEMPLATE_NAME, COL_PLAN_NAME] {
        if column_index(required).is_none() {
            return Err(CsvError::MissingColumn(required.to_string()));
        }
    }

    let field = |record: &csv::StringRecord, name: &str| -> String {
        column_index(name)
            .and_then(|i| record.get(i))
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;

        let mut qc = BTreeMap::new();
        for qc_name in qc_names {
            qc.insert(qc_name.clone(), field(&record, qc_name));
        }

        rows.push(CsvPlanRow {
            row_number: index + 1,
            template_name: field(&record, COL_TEMPLATE_NAME),
            plan_name: field(&record, COL_PLAN_NAME),
            sample: field(&record, COL_SAMPLE),
            barcode_kit: field(&record, COL_BARCODE_KIT),
            reference: field(&record, COL_REFERENCE),
            target_bed: field(&record, COL_TARGET_BED),
            hotspot_bed: field(&record, COL_HOTSPOT_BED),
            flows: field(&record, COL_FLOWS),
            sequencing_kit: field(&record, COL_SEQ_KIT),
            notes: field(&record, COL_NOTES),
            projects: field(&record, COL_PROJECTS),
            qc,
        });
    }

    if rows.is_empty() {
        return Err(CsvError::Empty);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qc_names() -> Vec<String> {
        vec!["Bead Loading (%)".to_string(), "Usable Sequence (%)".to_string()]
    }

    #[test]
    fn header_appends_qc_columns() {
        let h = header(&qc_names());
        assert_eq!(h[0], COL_TEMPLATE_NAME);
        assert_eq!(h[h.len() - 2], "Bead Loading (%)");
        assert_eq!(h.len(), BASE_COLUMNS.len() + 2);
    }

    #[test]
    fn batch_sheet_repeats_template_row() {
        let template = BatchTemplateData {
            template_name: "Proton Exome".into(),
            barcode_kit: "IonXpress".into(),
            flows: "500".into(),
            ..Default::default()
        };
        let sheet = write_batch_csv(&template, &qc_names(), 3).unwrap();
        let lines: Vec<&str> = sheet.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("Proton Exome,"));
        assert_eq!(lines[1], lines[3]);
    }

    #[test]
    fn parse_reads_rows_by_header_name() {
        let csv_data = format!(
            "{},{},{},Bead Loading (%)\nProton Exome,plan one,s1,30\n",
            COL_TEMPLATE_NAME, COL_PLAN_NAME, COL_SAMPLE
        );
        let rows = parse(csv_data.as_bytes(), &qc_names()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_number, 1);
        assert_eq!(rows[0].template_name, "Proton Exome");
        assert_eq!(rows[0].plan_name, "plan one");
        assert_eq!(rows[0].qc["Bead Loading (%)"], "30");
        assert_eq!(rows[0].qc["Usable Sequence (%)"], "");
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(parse(b"", &[]), Err(CsvError::Empty)));
        assert!(matches!(parse(b"  \n ", &[]), Err(CsvError::Empty)));
    }

    #[test]
    fn header_only_file_is_empty() {
        let csv_data = format!("{},{}\n", COL_TEMPLATE_NAME, COL_PLAN_NAME);
        assert!(matches!(
            parse(csv_data.as_bytes(), &[]),
            Err(CsvError::Empty)
        ));
    }

    #[test]
    fn missing_template_column_is_rejected() {
        let csv_data = format!("{},{}\nx,y\n", COL_PLAN_NAME, COL_SAMPLE);
        assert!(matches!(
            parse(csv_data.as_bytes(), &[]),
            Err(CsvError::MissingColumn(c)) if c == COL_TEMPLATE_NAME
        ));
    }

    #[test]
    fn blank_rows_are_detected() {
        let csv_data = format!(
            "{},{},{}\n,,\nProton Exome,p1,s1\n",
            COL_TEMPLATE_NAME, COL_PLAN_NAME, COL_SAMPLE
        );
        let rows = parse(csv_data.as_bytes(), &[]).unwrap();
        assert!(rows[0].is_blank());
        assert!(!rows[1].is_blank());
    }

    #[test]
    fn validate_flags_each_problem() {
        let row = CsvPlanRow {
            row_number: 1,
            template_name: String::new(),
            plan_name: "bad/plan".into(),
            sample: "_lead".into(),
            flows: "many".into(),
            projects: "ok;bad/project".into(),
            qc: [("Bead Loading (%)".to_string(), "abc".to_string())].into(),
            ..Default::default()
        };
        let errors = row.validate();
        assert!(errors.iter().any(|e| e == "Template name is required"));
        assert!(errors.iter().any(|e| e.starts_with("Plan name")));
        assert!(errors.iter().any(|e| e.starts_with("Sample name")));
        assert!(errors.iter().any(|e| e == "Flows must be a whole number"));
        assert!(errors.iter().any(|e| e.starts_with("Error, project name")));
        assert!(errors
            .iter()
            .any(|e| e == "Bead Loading (%) must be a whole number"));
    }

    #[test]
    fn valid_row_has_no_errors() {
        let row = CsvPlanRow {
            row_number: 1,
            template_name: "Proton Exome".into(),
            plan_name: "Plan 1".into(),
            sample: "s1".into(),
            flows: "500".into(),
            projects: "cancer panel".into(),
            ..Default::default()
        };
        assert!(row.validate().is_empty());
        assert_eq!(row.flows_value(), Some(500));
        assert_eq!(row.project_names(), vec!["cancer panel"]);
    }
}
