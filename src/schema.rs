// src/schema.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One field of the destination table, as declared in the schema JSON file.
///
/// `name` and `type` are required; `mode` defaults to `NULLABLE`. File order
/// is preserved because the CSV columns are matched positionally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_mode() -> String {
    "NULLABLE".to_string()
}

impl FieldSpec {
    pub fn is_required(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REQUIRED")
    }

    pub fn is_repeated(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REPEATED")
    }
}

/// Load the ordered field definitions from a JSON schema file.
pub fn load_table_schema(path: &Path) -> Result<Vec<FieldSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading schema file '{}'", path.display()))?;
    let fields: Vec<FieldSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing schema file '{}'", path.display()))?;
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn preserves_field_order_and_attributes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("schema.json");
        fs::write(
            &path,
            r#"[
                {"name": "employee_id", "type": "INTEGER", "mode": "REQUIRED", "description": "Primary key"},
                {"name": "first_name", "type": "STRING"},
                {"name": "salary", "type": "FLOAT", "mode": "NULLABLE"}
            ]"#,
        )
        .unwrap();

        let fields = load_table_schema(&path).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "employee_id");
        assert_eq!(fields[0].field_type, "INTEGER");
        assert!(fields[0].is_required());
        assert_eq!(fields[0].description.as_deref(), Some("Primary key"));
        assert_eq!(fields[1].name, "first_name");
        assert_eq!(fields[1].mode, "NULLABLE");
        assert_eq!(fields[1].description, None);
        assert_eq!(fields[2].name, "salary");
    }

    #[test]
    fn missing_name_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("schema.json");
        fs::write(&path, r#"[{"type": "STRING"}]"#).unwrap();
        assert!(load_table_schema(&path).is_err());
    }

    #[test]
    fn missing_type_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("schema.json");
        fs::write(&path, r#"[{"name": "x"}]"#).unwrap();
        assert!(load_table_schema(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(load_table_schema(&tmp.path().join("nope.json")).is_err());
    }
}
