// src/transform.rs
//
// Best-effort SQL runner: statements execute in sequence and a statement that
// keeps failing after its retries is recorded and skipped, never fatal. The
// verification step on top of it is advisory only.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::sql;
use crate::warehouse::{StatementStats, SummaryRow, Warehouse};

/// Table the verification step looks for.
pub const SUMMARY_TABLE: &str = "department_summary";

const PREVIEW_LEN: usize = 100;

/// Result of one statement, kept so callers can inspect the aggregate
/// outcome instead of relying on log side effects.
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    /// 1-based position within the file.
    pub index: usize,
    pub preview: String,
    pub result: Result<StatementStats, String>,
}

/// Accumulated outcome of a transformation file.
#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    pub label: String,
    /// True when the SQL file was absent and nothing ran.
    pub skipped: bool,
    pub outcomes: Vec<StatementOutcome>,
}

impl TransformReport {
    fn for_missing_file(label: &str) -> Self {
        Self {
            label: label.to_string(),
            skipped: true,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

/// What the advisory verification step observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// The summary table does not exist yet; expected right after the
    /// transformations created it, so not an error.
    TableMissing,
    Rows(Vec<SummaryRow>),
    /// The check itself failed; advisory, never propagated.
    Failed(String),
}

/// Read a SQL file, substitute the config placeholders, split it into
/// statements and execute them in order. A missing file is a warning, and a
/// failing statement does not stop the ones after it.
pub async fn run_sql_file(
    warehouse: &dyn Warehouse,
    config: &Config,
    sql_path: &Path,
    label: &str,
) -> Result<TransformReport> {
    if !sql_path.exists() {
        warn!(path = %sql_path.display(), "SQL file not found, skipping");
        return Ok(TransformReport::for_missing_file(label));
    }

    let raw = std::fs::read_to_string(sql_path)
        .with_context(|| format!("reading SQL file '{}'", sql_path.display()))?;
    let substituted = sql::substitute_parameters(&raw, config);
    let statements = sql::split_statements(&substituted);
    info!(
        file = %sql_path.display(),
        statements = statements.len(),
        label,
        "executing SQL file"
    );

    let mut outcomes = Vec::with_capacity(statements.len());
    for (i, statement) in statements.iter().enumerate() {
        let index = i + 1;
        let result = execute_with_retry(warehouse, statement, config).await;
        match &result {
            Ok(stats) => {
                info!(
                    statement = index,
                    total = statements.len(),
                    bytes_processed = stats.total_bytes_processed,
                    affected_rows = stats.affected_rows,
                    "statement succeeded"
                );
                // Let server-side metadata settle before the next statement
                // references a table this one may have created.
                if config.propagation_delay_ms > 0 {
                    sleep(Duration::from_millis(config.propagation_delay_ms)).await;
                }
            }
            Err(e) => {
                warn!(statement = index, error = %format!("{e:#}"), "statement failed, continuing");
            }
        }
        outcomes.push(StatementOutcome {
            index,
            preview: sql::preview(statement, PREVIEW_LEN),
            result: result.map_err(|e| format!("{e:#}")),
        });
    }

    Ok(TransformReport {
        label: label.to_string(),
        skipped: false,
        outcomes,
    })
}

/// Execute one statement, retrying with exponential backoff on failure.
async fn execute_with_retry(
    warehouse: &dyn Warehouse,
    statement: &str,
    config: &Config,
) -> Result<StatementStats> {
    let mut attempts = 0;
    loop {
        match warehouse.execute_statement(statement).await {
            Ok(stats) => return Ok(stats),
            Err(e) if attempts < config.statement_retries => {
                attempts += 1;
                let backoff = config.statement_backoff_ms * 2u64.pow(attempts - 1);
                warn!(
                    attempt = attempts,
                    delay_ms = backoff,
                    error = %format!("{e:#}"),
                    "retrying statement"
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check the summary table and, when it exists, run the fixed aggregation
/// query. Never fails the run.
pub async fn verify_transformations(warehouse: &dyn Warehouse, config: &Config) -> Verification {
    match warehouse.table_exists(&config.dataset_id, SUMMARY_TABLE).await {
        Ok(true) => {}
        Ok(false) => {
            info!(table = SUMMARY_TABLE, "summary table not found, skipping verification");
            return Verification::TableMissing;
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "could not check summary table");
            return Verification::Failed(format!("{e:#}"));
        }
    }

    let query = format!(
        "SELECT department, employee_count, avg_salary, total_salary \
         FROM `{}.{}.{}` ORDER BY total_salary DESC",
        config.gcp_project_id, config.dataset_id, SUMMARY_TABLE
    );
    match warehouse.query_summary(&query).await {
        Ok(rows) => Verification::Rows(rows),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "verification query failed");
            Verification::Failed(format!("{e:#}"))
        }
    }
}

/// `$1,234,567.89`-style rendering for the verification output.
pub fn format_currency(amount: f64) -> String {
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}${grouped}.{frac:02}")
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
             table_id: t\n\
             schema_file: s.json\n\
             data_file: r.csv\n\
             location: US\n\
             statement_retries: 1\n\
             statement_backoff_ms: 0\n\
             propagation_delay_ms: 0\n",
        )
        .unwrap()
    }

    fn write_sql(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("transformations.sql");
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn substitutes_and_runs_each_statement() {
        let tmp = tempdir().unwrap();
        let path = write_sql(
            tmp.path(),
            "CREATE TABLE `{project_id}.{dataset_id}.x` AS SELECT 1;\n\
             SELECT * FROM {project_id}.{dataset_id}.{table_id};",
        );
        let warehouse = MockWarehouse::new();

        let report = run_sql_file(&warehouse, &test_config(), &path, "test")
            .await
            .unwrap();
        assert!(!report.skipped);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 0);

        let executed = warehouse.executed_statements();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].contains("`p.d.x`"));
        assert_eq!(executed[1], "SELECT * FROM p.d.t");
    }

    #[tokio::test]
    async fn failing_statement_does_not_stop_later_ones() {
        let tmp = tempdir().unwrap();
        let path = write_sql(tmp.path(), "SELECT 1; SELECT boom; SELECT 3;");
        let warehouse = MockWarehouse::new().failing_on("boom");

        let report = run_sql_file(&warehouse, &test_config(), &path, "test")
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.outcomes[1].result.is_err());
        assert!(report.outcomes[2].result.is_ok());

        // retries: statement 2 ran twice (statement_retries = 1).
        assert_eq!(warehouse.executed_statements().len(), 4);
    }

    #[tokio::test]
    async fn transient_failure_succeeds_on_retry() {
        let tmp = tempdir().unwrap();
        let path = write_sql(tmp.path(), "SELECT flaky;");
        let warehouse = MockWarehouse::new().failing_once_on("flaky");

        let report = run_sql_file(&warehouse, &test_config(), &path, "test")
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(warehouse.executed_statements().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_skipped_not_fatal() {
        let tmp = tempdir().unwrap();
        let warehouse = MockWarehouse::new();
        let report = run_sql_file(
            &warehouse,
            &test_config(),
            &tmp.path().join("absent.sql"),
            "test",
        )
        .await
        .unwrap();
        assert!(report.skipped);
        assert!(report.outcomes.is_empty());
        assert!(warehouse.executed_statements().is_empty());
    }

    #[tokio::test]
    async fn verification_skips_when_table_missing() {
        let warehouse = MockWarehouse::new();
        assert_eq!(
            verify_transformations(&warehouse, &test_config()).await,
            Verification::TableMissing
        );
    }

    #[tokio::test]
    async fn verification_returns_summary_rows() {
        let rows = vec![SummaryRow {
            department: "Engineering".to_string(),
            employee_count: 3,
            avg_salary: 120000.0,
            total_salary: 360000.0,
        }];
        let warehouse = MockWarehouse::new()
            .with_table("d", SUMMARY_TABLE)
            .with_summary_rows(rows.clone());

        assert_eq!(
            verify_transformations(&warehouse, &test_config()).await,
            Verification::Rows(rows)
        );
    }

    #[test]
    fn currency_formatting_groups_thousands() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(950.5), "$950.50");
        assert_eq!(format_currency(85333.333), "$85,333.33");
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(-42.0), "-$42.00");
    }
}
