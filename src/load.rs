// src/load.rs
//
// Dataset creation and the CSV load itself. Everything here is fail-fast: a
// half-created dataset or a partially loaded table is unacceptable, so any
// error propagates and aborts the run.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::schema::{self, FieldSpec};
use crate::warehouse::{InsertRow, Warehouse};

/// Description attached to datasets this pipeline creates.
pub const DATASET_DESCRIPTION: &str = "Dataset created by CI/CD pipeline";

/// Rows per streaming insert request.
const INSERT_BATCH_SIZE: usize = 500;

/// Counts reported after a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Data rows read from the CSV file (header excluded).
    pub rows_read: u64,
    /// Row count reported by the table after the load.
    pub table_rows: i64,
    /// Byte size reported by the table after the load.
    pub table_bytes: i64,
}

/// Create the destination dataset if it does not exist yet. Idempotent: an
/// existing dataset is left untouched and no create call is made.
pub async fn ensure_dataset(warehouse: &dyn Warehouse, config: &Config) -> Result<()> {
    if warehouse.dataset_exists(&config.dataset_id).await? {
        info!(dataset = %config.dataset_id, "dataset already exists");
        return Ok(());
    }

    info!(
        dataset = %config.dataset_id,
        location = %config.location,
        "creating dataset"
    );
    warehouse
        .create_dataset(&config.dataset_id, &config.location, DATASET_DESCRIPTION)
        .await
        .with_context(|| format!("creating dataset '{}'", config.dataset_id))?;
    Ok(())
}

/// Load the configured CSV file into the destination table, replacing all
/// existing rows, and report the resulting table counts.
pub async fn run_load(
    warehouse: &dyn Warehouse,
    config: &Config,
    data_dir: &Path,
) -> Result<LoadReport> {
    let schema_path = data_dir.join("schemas").join(&config.schema_file);
    let fields = schema::load_table_schema(&schema_path)?;
    info!(fields = fields.len(), file = %config.schema_file, "loaded table schema");

    // Full overwrite: every run replaces the table and all of its rows.
    warehouse
        .replace_table(&config.dataset_id, &config.table_id, &fields)
        .await?;

    let csv_path = data_dir.join(&config.data_file);
    let rows = read_csv_rows(&csv_path, &fields)?;
    let rows_read = rows.len() as u64;
    info!(rows = rows_read, file = %config.data_file, "read data file");

    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        warehouse
            .insert_rows(&config.dataset_id, &config.table_id, batch)
            .await?;
    }

    let stats = warehouse
        .table_stats(&config.dataset_id, &config.table_id)
        .await?
        .ok_or_else(|| anyhow!("table '{}' missing after load", config.qualified_table()))?;

    Ok(LoadReport {
        rows_read,
        table_rows: stats.row_count,
        table_bytes: stats.size_bytes,
    })
}

/// Read the CSV file into insert rows keyed by schema field name. The first
/// row is a header and is skipped; the remaining columns are matched to the
/// schema positionally.
pub fn read_csv_rows(csv_path: &Path, fields: &[FieldSpec]) -> Result<Vec<InsertRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(csv_path)
        .with_context(|| format!("opening data file '{}'", csv_path.display()))?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading CSV record {}", index + 1))?;
        if record.len() != fields.len() {
            bail!(
                "CSV row {} has {} column(s), schema expects {}",
                index + 1,
                record.len(),
                fields.len()
            );
        }

        let mut row = InsertRow::new();
        for (field, raw) in fields.iter().zip(record.iter()) {
            if let Some(value) = coerce_value(field, raw)
                .with_context(|| format!("CSV row {}, field '{}'", index + 1, field.name))?
            {
                row.insert(field.name.clone(), value);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Coerce a raw CSV cell into a typed JSON value. An empty cell becomes NULL
/// for a nullable field and an error for a required one.
fn coerce_value(field: &FieldSpec, raw: &str) -> Result<Option<Value>> {
    if raw.is_empty() {
        if field.is_required() {
            bail!("empty value for required field");
        }
        return Ok(None);
    }

    let value = match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => Value::from(
            raw.parse::<i64>()
                .with_context(|| format!("'{raw}' is not a valid integer"))?,
        ),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => Value::from(
            raw.parse::<f64>()
                .with_context(|| format!("'{raw}' is not a valid number"))?,
        ),
        "BOOLEAN" | "BOOL" => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::from(true),
            "false" | "0" => Value::from(false),
            _ => bail!("'{raw}' is not a valid boolean"),
        },
        // Dates, timestamps and everything else go through as strings; the
        // warehouse parses them against the column type.
        _ => Value::from(raw),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::mock::MockWarehouse;
    use std::fs;
    use tempfile::tempdir;

    fn test_config() -> Config {
        serde_yaml::from_str(
            "gcp_project_id: p\n\
             dataset_id: d\n\
             table_id: employees\n\
             schema_file: employee_schema.json\n\
             data_file: employees.csv\n\
             location: EU\n",
        )
        .unwrap()
    }

    fn write_fixtures(data_dir: &Path, csv_body: &str) {
        fs::create_dir_all(data_dir.join("schemas")).unwrap();
        fs::write(
            data_dir.join("schemas/employee_schema.json"),
            r#"[
                {"name": "employee_id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "name", "type": "STRING"},
                {"name": "salary", "type": "FLOAT"}
            ]"#,
        )
        .unwrap();
        fs::write(data_dir.join("employees.csv"), csv_body).unwrap();
    }

    #[tokio::test]
    async fn ensure_dataset_is_idempotent() {
        let warehouse = MockWarehouse::new().with_dataset("d");
        ensure_dataset(&warehouse, &test_config()).await.unwrap();
        assert!(warehouse.created_datasets().is_empty());
    }

    #[tokio::test]
    async fn ensure_dataset_creates_missing_dataset_once() {
        let warehouse = MockWarehouse::new();
        let config = test_config();
        ensure_dataset(&warehouse, &config).await.unwrap();
        ensure_dataset(&warehouse, &config).await.unwrap();
        assert_eq!(
            warehouse.created_datasets(),
            vec![("d".to_string(), "EU".to_string())]
        );
    }

    #[tokio::test]
    async fn load_reports_row_counts() {
        let tmp = tempdir().unwrap();
        write_fixtures(
            tmp.path(),
            "employee_id,name,salary\n1,Ada,100.5\n2,Grace,200.0\n",
        );
        let warehouse = MockWarehouse::new().with_dataset("d");

        let report = run_load(&warehouse, &test_config(), tmp.path())
            .await
            .unwrap();
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.table_rows, 2);
        assert!(report.table_bytes > 0);

        let rows = warehouse.rows_in("d", "employees");
        assert_eq!(rows[0].get("employee_id"), Some(&Value::from(1)));
        assert_eq!(rows[1].get("name"), Some(&Value::from("Grace")));
    }

    #[tokio::test]
    async fn second_load_replaces_first_runs_rows() {
        let tmp = tempdir().unwrap();
        let warehouse = MockWarehouse::new().with_dataset("d");
        let config = test_config();

        write_fixtures(
            tmp.path(),
            "employee_id,name,salary\n1,Ada,100.0\n2,Grace,200.0\n3,Edsger,300.0\n",
        );
        run_load(&warehouse, &config, tmp.path()).await.unwrap();

        write_fixtures(tmp.path(), "employee_id,name,salary\n9,Barbara,400.0\n");
        let report = run_load(&warehouse, &config, tmp.path()).await.unwrap();

        assert_eq!(report.table_rows, 1);
        let rows = warehouse.rows_in("d", "employees");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("employee_id"), Some(&Value::from(9)));
    }

    #[tokio::test]
    async fn missing_data_file_is_fatal() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("schemas")).unwrap();
        fs::write(
            tmp.path().join("schemas/employee_schema.json"),
            r#"[{"name": "x", "type": "STRING"}]"#,
        )
        .unwrap();
        let warehouse = MockWarehouse::new();
        assert!(run_load(&warehouse, &test_config(), tmp.path())
            .await
            .is_err());
    }

    #[test]
    fn empty_nullable_cell_becomes_null() {
        let field = FieldSpec {
            name: "salary".to_string(),
            field_type: "FLOAT".to_string(),
            mode: "NULLABLE".to_string(),
            description: None,
        };
        assert_eq!(coerce_value(&field, "").unwrap(), None);
        assert_eq!(
            coerce_value(&field, "12.5").unwrap(),
            Some(Value::from(12.5))
        );
    }

    #[test]
    fn empty_required_cell_is_an_error() {
        let field = FieldSpec {
            name: "employee_id".to_string(),
            field_type: "INTEGER".to_string(),
            mode: "REQUIRED".to_string(),
            description: None,
        };
        assert!(coerce_value(&field, "").is_err());
        assert!(coerce_value(&field, "not-a-number").is_err());
    }

    #[test]
    fn short_csv_row_is_an_error() {
        let tmp = tempdir().unwrap();
        write_fixtures(tmp.path(), "employee_id,name,salary\n1,Ada\n");
        let fields = schema::load_table_schema(
            &tmp.path().join("schemas/employee_schema.json"),
        )
        .unwrap();
        assert!(read_csv_rows(&tmp.path().join("employees.csv"), &fields).is_err());
    }
}
