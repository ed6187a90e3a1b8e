//! Plan domain logic: request shapes, validation rules, the save fan-out
//! pipeline, and the batch planning CSV schema. Everything here is pure;
//! persistence lives in the service layer.

pub mod csv;
pub mod input;
pub mod save;
pub mod validate;

/// Wizard application codes as used by the plan creation shortcuts.
/// Unknown codes fall back to generic sequencing.
pub fn run_type_for_code(code: &str) -> &'static str {
    match code {
        "1" => "AMPS",
        "2" => "TARS",
        "3" => "WGNM",
        "4" => "RNA",
        "5" => "AMPS_RNA",
        "6" => "AMPS_EXOME",
        _ => "GENS",
    }
}

/// Some historical runs carry chip types polluted with backslashes or
/// doubled quotes; strip them before lookup.
pub fn strip_chip_type(chip_type: &str) -> String {
    chip_type.replace(['\\', '"'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_run_types() {
        assert_eq!(run_type_for_code("1"), "AMPS");
        assert_eq!(run_type_for_code("6"), "AMPS_EXOME");
        assert_eq!(run_type_for_code("9"), "GENS");
        assert_eq!(run_type_for_code(""), "GENS");
    }

    #[test]
    fn chip_type_stripping() {
        assert_eq!(strip_chip_type("\\\"314R\\\""), "314R");
        assert_eq!(strip_chip_type("318B"), "318B");
    }
}
