//! Server-side validation for plan, sample, project, and note fields.
//!
//! These rules are deliberately conservative: names travel into file paths,
//! report headers, and instrument consoles downstream.

use thiserror::Error;

use crate::config;

pub const ERROR_MSG_INVALID_CHARS: &str =
    " should contain only numbers, letters, spaces, and the following: . - _";
pub const ERROR_MSG_INVALID_LEADING_CHARS: &str = " should only start with numbers or letters. ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationFailure(pub String);

pub fn invalid_length_msg(max: usize) -> String {
    format!(" length should be {} characters maximum. ", max)
}

/// Letters, numbers, spaces, and `. - _` only.
pub fn is_valid_chars(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '.' || c == '-' || c == '_')
}

/// Names may not start with punctuation or whitespace.
pub fn is_invalid_leading_chars(value: &str) -> bool {
    match value.chars().next() {
        Some(c) => !c.is_ascii_alphanumeric(),
        None => false,
    }
}

pub fn is_valid_length(value: &str, max: usize) -> bool {
    value.chars().count() <= max
}

/// Validate the displayed plan/template name. `label` is "Run Plan" or
/// "Template" and is interpolated into the client-facing message.
pub fn validate_plan_name(name: &str, label: &str) -> Result<(), ValidationFailure> {
    let limits = &config::config().planning;

    if name.is_empty() {
        return Err(ValidationFailure(format!(
            "Error, please enter a {} Name.",
            label
        )));
    }
    if !is_valid_chars(name) {
        return Err(ValidationFailure(format!(
            "Error, {} Name{}",
            label, ERROR_MSG_INVALID_CHARS
        )));
    }
    if !is_valid_length(name, limits.max_length_plan_name) {
        return Err(ValidationFailure(format!(
            "Error, {} Name{}",
            label,
            invalid_length_msg(limits.max_length_plan_name)
        )));
    }
    Ok(())
}

pub fn validate_notes(notes: &str, label: &str) -> Result<(), ValidationFailure> {
    let limits = &config::config().planning;

    if notes.is_empty() {
        return Ok(());
    }
    if !is_valid_chars(notes) {
        return Err(ValidationFailure(format!(
            "Error, {} note{}",
            label, ERROR_MSG_INVALID_CHARS
        )));
    }
    if !is_valid_length(notes, limits.max_length_notes) {
        return Err(ValidationFailure(format!(
            "Error, Note{}",
            invalid_length_msg(limits.max_length_notes)
        )));
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<(), ValidationFailure> {
    let limits = &config::config().planning;

    if !is_valid_chars(name) {
        return Err(ValidationFailure(format!(
            "Error, project name{}",
            ERROR_MSG_INVALID_CHARS
        )));
    }
    if !is_valid_length(name, limits.max_length_project_name) {
        return Err(ValidationFailure(format!(
            "Error, project name{}",
            invalid_length_msg(limits.max_length_project_name)
        )));
    }
    Ok(())
}

/// Accumulates offending sample names across the three failure classes so
/// one response can report every bad name at once.
#[derive(Debug, Default, Clone)]
pub struct SampleValidation {
    pub invalid_chars: Vec<String>,
    pub invalid_leading: Vec<String>,
    pub too_long: Vec<String>,
}

impl SampleValidation {
    /// Check one sample name, recording it in the matching bucket.
    /// Returns true when the name passed all checks.
    pub fn check(&mut self, sample: &str) -> bool {
        let limits = &config::config().planning;

        if !is_valid_chars(sample) {
            self.invalid_chars.push(sample.to_string());
            false
        } else if is_invalid_leading_chars(sample) {
            self.invalid_leading.push(sample.to_string());
            false
        } else if !is_valid_length(sample, limits.max_length_sample_name) {
            self.too_long.push(sample.to_string());
            false
        } else {
            true
        }
    }

    pub fn is_clean(&self) -> bool {
        self.invalid_chars.is_empty() && self.invalid_leading.is_empty() && self.too_long.is_empty()
    }

    /// Compose the combined error message, or None when everything passed.
    pub fn into_error(self) -> Option<ValidationFailure> {
        if self.is_clean() {
            return None;
        }

        let limits = &config::config().planning;
        let mut message = String::new();

        if !self.invalid_chars.is_empty() {
            message.push_str("Error, sample name");
            message.push_str(ERROR_MSG_INVALID_CHARS);
            message.push_str(" Please fix: ");
            message.push_str(&self.invalid_chars.join(", "));
            message.push('\n');
        }
        if !self.invalid_leading.is_empty() {
            message.push_str("Error, sample name");
            message.push_str(ERROR_MSG_INVALID_LEADING_CHARS);
            message.push_str("Please fix: ");
            message.push_str(&self.invalid_leading.join(", "));
            message.push('\n');
        }
        if !self.too_long.is_empty() {
            message.push_str("Error, sample name");
            message.push_str(&invalid_length_msg(limits.max_length_sample_name));
            message.push_str("Please fix: ");
            message.push_str(&self.too_long.join(", "));
        }

        Some(ValidationFailure(message.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_allows_word_punctuation() {
        assert!(is_valid_chars("Proton Exome v2.1_test-A"));
        assert!(!is_valid_chars("bad/name"));
        assert!(!is_valid_chars("semi;colon"));
        assert!(!is_valid_chars("uni\u{00e9}code"));
    }

    #[test]
    fn leading_char_must_be_alphanumeric() {
        assert!(!is_invalid_leading_chars("sample1"));
        assert!(!is_invalid_leading_chars("1sample"));
        assert!(is_invalid_leading_chars("_sample"));
        assert!(is_invalid_leading_chars(" sample"));
        assert!(is_invalid_leading_chars(".sample"));
    }

    #[test]
    fn plan_name_required() {
        let err = validate_plan_name("", "Run Plan").unwrap_err();
        assert_eq!(err.0, "Error, please enter a Run Plan Name.");
    }

    #[test]
    fn plan_name_charset_message_names_the_label() {
        let err = validate_plan_name("bad/name", "Template").unwrap_err();
        assert!(err.0.starts_with("Error, Template Name"));
        assert!(err.0.contains("numbers, letters, spaces"));
    }

    #[test]
    fn plan_name_length_cap() {
        let long = "a".repeat(513);
        let err = validate_plan_name(&long, "Run Plan").unwrap_err();
        assert!(err.0.contains("512 characters maximum"));
        assert!(validate_plan_name(&"a".repeat(512), "Run Plan").is_ok());
    }

    #[test]
    fn empty_notes_pass() {
        assert!(validate_notes("", "Run Plan").is_ok());
    }

    #[test]
    fn sample_buckets_compose_one_message() {
        let mut v = SampleValidation::default();
        assert!(v.check("good_sample"));
        assert!(!v.check("bad/sample"));
        assert!(!v.check("_leading"));
        assert!(!v.check(&"s".repeat(128)));

        let msg = v.into_error().unwrap().0;
        assert!(msg.contains("bad/sample"));
        assert!(msg.contains("_leading"));
        assert!(msg.contains("127 characters maximum"));
    }

    #[test]
    fn clean_samples_produce_no_error() {
        let mut v = SampleValidation::default();
        v.check("s1");
        v.check("s2");
        assert!(v.into_error().is_none());
    }
}
