// src/warehouse/mock.rs

//! In-memory [`Warehouse`] used by the orchestration tests. Datasets and
//! tables live in a mutex-guarded map; statement execution records every SQL
//! string and can be scripted to fail on statements containing a marker.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{InsertRow, StatementStats, SummaryRow, TableStats, Warehouse};
use crate::schema::FieldSpec;

#[derive(Debug, Default)]
struct MockState {
    datasets: BTreeSet<String>,
    /// `dataset.table` -> inserted rows.
    tables: BTreeMap<String, Vec<InsertRow>>,
    /// `(dataset_id, location)` for every create call, in order.
    created_datasets: Vec<(String, String)>,
    executed: Vec<String>,
    /// Statements containing any of these markers always fail.
    fail_containing: Vec<String>,
    /// Statements containing any of these markers fail once, then succeed.
    fail_once_containing: Vec<String>,
    summary: Vec<SummaryRow>,
}

#[derive(Debug, Default)]
pub struct MockWarehouse {
    state: Mutex<MockState>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, dataset_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .datasets
            .insert(dataset_id.to_string());
        self
    }

    pub fn with_table(self, dataset_id: &str, table_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table_key(dataset_id, table_id), Vec::new());
        self
    }

    /// Every statement containing `marker` fails.
    pub fn failing_on(self, marker: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_containing
            .push(marker.to_string());
        self
    }

    /// The first statement containing `marker` fails; later ones succeed.
    pub fn failing_once_on(self, marker: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_once_containing
            .push(marker.to_string());
        self
    }

    pub fn with_summary_rows(self, rows: Vec<SummaryRow>) -> Self {
        self.state.lock().unwrap().summary = rows;
        self
    }

    pub fn created_datasets(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created_datasets.clone()
    }

    pub fn executed_statements(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn rows_in(&self, dataset_id: &str, table_id: &str) -> Vec<InsertRow> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table_key(dataset_id, table_id))
            .cloned()
            .unwrap_or_default()
    }
}

fn table_key(dataset_id: &str, table_id: &str) -> String {
    format!("{dataset_id}.{table_id}")
}

fn estimated_bytes(rows: &[InsertRow]) -> i64 {
    rows.iter()
        .map(|row| serde_json::to_string(row).map(|s| s.len()).unwrap_or(0) as i64)
        .sum()
}

#[async_trait]
impl Warehouse for MockWarehouse {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().datasets.contains(dataset_id))
    }

    async fn create_dataset(
        &self,
        dataset_id: &str,
        location: &str,
        _description: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.datasets.insert(dataset_id.to_string());
        state
            .created_datasets
            .push((dataset_id.to_string(), location.to_string()));
        Ok(())
    }

    async fn list_datasets(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().datasets.iter().cloned().collect())
    }

    async fn table_exists(&self, dataset_id: &str, table_id: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .contains_key(&table_key(dataset_id, table_id)))
    }

    async fn table_stats(&self, dataset_id: &str, table_id: &str) -> Result<Option<TableStats>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(&table_key(dataset_id, table_id))
            .map(|rows| TableStats {
                row_count: rows.len() as i64,
                size_bytes: estimated_bytes(rows),
            }))
    }

    async fn replace_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        fields: &[FieldSpec],
    ) -> Result<()> {
        if fields.is_empty() {
            bail!("empty schema");
        }
        // Overwrite semantics: any previous rows are gone.
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table_key(dataset_id, table_id), Vec::new());
        Ok(())
    }

    async fn insert_rows(
        &self,
        dataset_id: &str,
        table_id: &str,
        rows: &[InsertRow],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .tables
            .get_mut(&table_key(dataset_id, table_id))
            .ok_or_else(|| anyhow!("table '{dataset_id}.{table_id}' does not exist"))?;
        table.extend(rows.iter().cloned());
        Ok(())
    }

    async fn execute_statement(&self, sql: &str) -> Result<StatementStats> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(sql.to_string());

        if let Some(pos) = state
            .fail_once_containing
            .iter()
            .position(|marker| sql.contains(marker.as_str()))
        {
            let marker = state.fail_once_containing.remove(pos);
            return Err(anyhow!("injected transient failure for '{marker}'"));
        }
        if let Some(marker) = state
            .fail_containing
            .iter()
            .find(|marker| sql.contains(marker.as_str()))
        {
            return Err(anyhow!("injected failure for '{marker}'"));
        }

        Ok(StatementStats {
            total_bytes_processed: sql.len() as i64,
            affected_rows: None,
        })
    }

    async fn query_summary(&self, _sql: &str) -> Result<Vec<SummaryRow>> {
        Ok(self.state.lock().unwrap().summary.clone())
    }
}
