// src/warehouse/mod.rs
//
// The warehouse trait is the seam between the orchestration code and the
// BigQuery API, so the loaders and the transformation runner can be exercised
// against an in-memory mock.

pub mod bigquery;
pub mod mock;

use crate::schema::FieldSpec;
use anyhow::Result;
use async_trait::async_trait;

/// Row and byte counts of an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub row_count: i64,
    pub size_bytes: i64,
}

/// Metrics reported for a single executed statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub total_bytes_processed: i64,
    /// Only present for DML statements.
    pub affected_rows: Option<i64>,
}

/// One row of the department summary verification query.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub department: String,
    pub employee_count: i64,
    pub avg_salary: f64,
    pub total_salary: f64,
}

/// A CSV row keyed by schema field name, ready for streaming insert.
pub type InsertRow = serde_json::Map<String, serde_json::Value>;

/// Operations the pipeline needs from the warehouse. The project id is bound
/// into the implementation at construction time.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool>;

    async fn create_dataset(
        &self,
        dataset_id: &str,
        location: &str,
        description: &str,
    ) -> Result<()>;

    async fn list_datasets(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, dataset_id: &str, table_id: &str) -> Result<bool>;

    /// `None` when the table does not exist (or has no metadata row yet).
    async fn table_stats(&self, dataset_id: &str, table_id: &str) -> Result<Option<TableStats>>;

    /// Create the table with the given schema, replacing any existing table
    /// and all of its rows.
    async fn replace_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        fields: &[FieldSpec],
    ) -> Result<()>;

    async fn insert_rows(
        &self,
        dataset_id: &str,
        table_id: &str,
        rows: &[InsertRow],
    ) -> Result<()>;

    async fn execute_statement(&self, sql: &str) -> Result<StatementStats>;

    async fn query_summary(&self, sql: &str) -> Result<Vec<SummaryRow>>;
}
