// src/warehouse/bigquery.rs

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::{QueryResponse, ResultSet};
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::Client;
use tracing::{debug, info, warn};

use super::{InsertRow, StatementStats, SummaryRow, TableStats, Warehouse};
use crate::schema::FieldSpec;

/// BigQuery-backed [`Warehouse`]. DDL (dataset and table creation) goes
/// through the query API; existence checks use the REST GET endpoints with
/// 404 mapped to "absent"; rows are ingested with the streaming insert API.
pub struct BigQuery {
    client: Client,
    project_id: String,
}

impl BigQuery {
    /// Build a client from an explicit service-account key, or fall back to
    /// Application Default Credentials when no key is supplied.
    pub async fn connect(project_id: &str, key_json: Option<&str>) -> Result<Self> {
        let client = match key_json {
            Some(raw) => {
                info!("authenticating with service account key from environment");
                let key = parse_service_account_key(raw)
                    .context("GCP_SERVICE_ACCOUNT_KEY is not a valid service account key")?;
                ClientBuilder::new()
                    .build_from_service_account_key(key, false)
                    .await
                    .context("building BigQuery client from service account key")?
            }
            None => {
                info!("authenticating with application default credentials");
                ClientBuilder::new()
                    .build_from_application_default_credentials()
                    .await
                    .context("building BigQuery client from application default credentials")?
            }
        };

        Ok(Self {
            client,
            project_id: project_id.to_string(),
        })
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResponse> {
        debug!(sql = %crate::sql::preview(sql, 120), "running query");
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql.to_string()))
            .await
            .with_context(|| format!("query failed: {}", crate::sql::preview(sql, 120)))?;
        Ok(response)
    }
}

#[async_trait]
impl Warehouse for BigQuery {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool> {
        let result = self.client.dataset().get(&self.project_id, dataset_id).await;
        match result {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(e) => Err(e).with_context(|| format!("checking dataset '{dataset_id}'")),
        }
    }

    async fn create_dataset(
        &self,
        dataset_id: &str,
        location: &str,
        description: &str,
    ) -> Result<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS `{}.{}` OPTIONS (location = '{}', description = '{}')",
            quoted_identifier(&self.project_id)?,
            quoted_identifier(dataset_id)?,
            quote_literal(location),
            quote_literal(description),
        );
        self.run_query(&sql)
            .await
            .with_context(|| format!("creating dataset '{dataset_id}'"))?;
        Ok(())
    }

    async fn list_datasets(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT schema_name FROM `{}`.INFORMATION_SCHEMA.SCHEMATA ORDER BY schema_name",
            quoted_identifier(&self.project_id)?
        );
        let mut result_set = ResultSet::new_from_query_response(self.run_query(&sql).await?);

        let mut ids = Vec::new();
        while result_set.next_row() {
            if let Some(name) = result_set.get_string_by_name("schema_name")? {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    async fn table_exists(&self, dataset_id: &str, table_id: &str) -> Result<bool> {
        let result = self
            .client
            .table()
            .get(&self.project_id, dataset_id, table_id, None)
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(e) => Err(e).with_context(|| format!("checking table '{dataset_id}.{table_id}'")),
        }
    }

    async fn table_stats(&self, dataset_id: &str, table_id: &str) -> Result<Option<TableStats>> {
        let sql = format!(
            "SELECT row_count, size_bytes FROM `{}.{}`.__TABLES__ WHERE table_id = '{}'",
            quoted_identifier(&self.project_id)?,
            quoted_identifier(dataset_id)?,
            quote_literal(table_id),
        );
        let mut result_set = ResultSet::new_from_query_response(self.run_query(&sql).await?);

        if result_set.next_row() {
            Ok(Some(TableStats {
                row_count: result_set.get_i64_by_name("row_count")?.unwrap_or(0),
                size_bytes: result_set.get_i64_by_name("size_bytes")?.unwrap_or(0),
            }))
        } else {
            Ok(None)
        }
    }

    async fn replace_table(
        &self,
        dataset_id: &str,
        table_id: &str,
        fields: &[FieldSpec],
    ) -> Result<()> {
        if fields.is_empty() {
            bail!("cannot create table '{dataset_id}.{table_id}' with an empty schema");
        }
        let columns = fields
            .iter()
            .map(column_spec)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!(
            "CREATE OR REPLACE TABLE `{}.{}.{}` ({})",
            quoted_identifier(&self.project_id)?,
            quoted_identifier(dataset_id)?,
            quoted_identifier(table_id)?,
            columns,
        );
        self.run_query(&sql)
            .await
            .with_context(|| format!("replacing table '{dataset_id}.{table_id}'"))?;
        info!(table = %format!("{dataset_id}.{table_id}"), "replaced destination table");
        Ok(())
    }

    async fn insert_rows(
        &self,
        dataset_id: &str,
        table_id: &str,
        rows: &[InsertRow],
    ) -> Result<()> {
        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request.add_row(None, row)?;
        }

        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, dataset_id, table_id, request)
            .await
            .with_context(|| format!("streaming rows into '{dataset_id}.{table_id}'"))?;

        if let Some(errors) = response.insert_errors {
            if !errors.is_empty() {
                warn!(rejected = errors.len(), "streaming insert rejected rows");
                bail!(
                    "{} row(s) rejected during streaming insert, first: {:?}",
                    errors.len(),
                    errors.first()
                );
            }
        }
        Ok(())
    }

    async fn execute_statement(&self, sql: &str) -> Result<StatementStats> {
        let response = self.run_query(sql).await?;
        Ok(stats_from_response(&response))
    }

    async fn query_summary(&self, sql: &str) -> Result<Vec<SummaryRow>> {
        let mut result_set = ResultSet::new_from_query_response(self.run_query(sql).await?);

        let mut rows = Vec::new();
        while result_set.next_row() {
            rows.push(SummaryRow {
                department: result_set
                    .get_string_by_name("department")?
                    .ok_or_else(|| anyhow!("verification row is missing 'department'"))?,
                employee_count: result_set.get_i64_by_name("employee_count")?.unwrap_or(0),
                avg_salary: result_set.get_f64_by_name("avg_salary")?.unwrap_or(0.0),
                total_salary: result_set.get_f64_by_name("total_salary")?.unwrap_or(0.0),
            });
        }
        Ok(rows)
    }
}

fn stats_from_response(response: &QueryResponse) -> StatementStats {
    StatementStats {
        total_bytes_processed: response
            .total_bytes_processed
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        affected_rows: response
            .num_dml_affected_rows
            .as_deref()
            .and_then(|v| v.parse().ok()),
    }
}

/// Render one column of a `CREATE TABLE` statement from a field spec.
fn column_spec(field: &FieldSpec) -> Result<String> {
    let sql_type = bigquery_type(&field.field_type)?;
    let rendered = if field.is_repeated() {
        format!("ARRAY<{sql_type}>")
    } else if field.is_required() {
        format!("{sql_type} NOT NULL")
    } else {
        sql_type.to_string()
    };

    let mut spec = format!("`{}` {}", quoted_identifier(&field.name)?, rendered);
    if let Some(description) = &field.description {
        spec.push_str(&format!(
            " OPTIONS (description = '{}')",
            quote_literal(description)
        ));
    }
    Ok(spec)
}

/// Map a schema-file type name onto the GoogleSQL type used in DDL.
fn bigquery_type(name: &str) -> Result<&'static str> {
    let sql_type = match name.to_ascii_uppercase().as_str() {
        "STRING" => "STRING",
        "BYTES" => "BYTES",
        "INTEGER" | "INT64" => "INT64",
        "FLOAT" | "FLOAT64" => "FLOAT64",
        "NUMERIC" => "NUMERIC",
        "BIGNUMERIC" => "BIGNUMERIC",
        "BOOLEAN" | "BOOL" => "BOOL",
        "TIMESTAMP" => "TIMESTAMP",
        "DATE" => "DATE",
        "TIME" => "TIME",
        "DATETIME" => "DATETIME",
        "GEOGRAPHY" => "GEOGRAPHY",
        "JSON" => "JSON",
        other => bail!("unsupported field type '{other}' in schema file"),
    };
    Ok(sql_type)
}

/// Reject identifiers that would break out of backtick quoting.
fn quoted_identifier(identifier: &str) -> Result<&str> {
    if identifier.is_empty() {
        bail!("empty identifier");
    }
    if identifier.contains('`') || identifier.chars().any(char::is_control) {
        bail!("invalid character in identifier '{identifier}'");
    }
    Ok(identifier)
}

/// Escape a string for inclusion in a single-quoted SQL literal.
fn quote_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
