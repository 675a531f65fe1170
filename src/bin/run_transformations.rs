// src/bin/run_transformations.rs
// Execute the SQL transformation files against BigQuery, then run the
// advisory verification query. Per-statement failures are reported but never
// abort the run: once the final report block is reached this binary exits 0.

use anyhow::Result;
use bqpipeline::config::{Config, DEFAULT_CONFIG_FILE};
use bqpipeline::transform::{self, format_currency, TransformReport, Verification};
use bqpipeline::warehouse::bigquery::BigQuery;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    println!("{}", "=".repeat(60));
    println!("🚀 Starting BigQuery Transformations");
    println!("{}", "=".repeat(60));

    let config_file =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    println!("\n📖 Loading config from: {config_file}");
    let config = Config::load(Path::new("config"), &config_file)?;
    println!("   Project: {}", config.gcp_project_id);
    println!("   Dataset: {}", config.dataset_id);

    let key_json = std::env::var("GCP_SERVICE_ACCOUNT_KEY").ok();
    if key_json.is_some() {
        println!("\n🔐 Authenticating with service account from environment variable...");
    } else {
        println!("\n🔐 Authenticating with local credentials...");
    }
    let warehouse = BigQuery::connect(&config.gcp_project_id, key_json.as_deref()).await?;

    println!("\n{}", "=".repeat(60));
    println!("📄 Processing: transformations.sql");
    println!("{}", "=".repeat(60));
    let report = transform::run_sql_file(
        &warehouse,
        &config,
        Path::new("sql/transformations.sql"),
        "Data transformations",
    )
    .await?;
    print_report(&report);

    // Give BigQuery a moment to make freshly created tables visible to the
    // verification query.
    println!("\n⏳ Waiting for BigQuery to process table creation...");
    tokio::time::sleep(Duration::from_millis(config.propagation_delay_ms.saturating_mul(3))).await;

    println!("\n{}", "=".repeat(60));
    println!("🔍 Verifying Transformations");
    println!("{}", "=".repeat(60));
    match transform::verify_transformations(&warehouse, &config).await {
        Verification::TableMissing => {
            println!("⚠️  Table not found: {}", transform::SUMMARY_TABLE);
            println!("   This is normal if transformations just created it.");
            println!("   Skipping verification.");
        }
        Verification::Rows(rows) => {
            println!("✅ Table exists: {}", transform::SUMMARY_TABLE);
            println!("\n📊 Department Summary Results:");
            for row in rows {
                println!(
                    "   {}: {} employees, Avg: {}, Total: {}",
                    row.department,
                    row.employee_count,
                    format_currency(row.avg_salary),
                    format_currency(row.total_salary)
                );
            }
        }
        Verification::Failed(error) => {
            println!("⚠️  Could not verify transformations: {error}");
            println!("   This may be normal - check the BigQuery console to verify data.");
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("✅ All transformations completed successfully!");
    println!("{}", "=".repeat(60));
    Ok(())
}

fn print_report(report: &TransformReport) {
    if report.skipped {
        println!("⚠️  SQL file not found, nothing to run");
        return;
    }

    println!(
        "📝 Found {} SQL statement(s) to execute",
        report.outcomes.len()
    );
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(stats) => {
                println!(
                    "✅ Statement {}/{} succeeded ({:.2} MB processed)",
                    outcome.index,
                    report.outcomes.len(),
                    stats.total_bytes_processed as f64 / 1024.0 / 1024.0
                );
                if let Some(affected) = stats.affected_rows {
                    println!("   Affected rows: {affected}");
                }
            }
            Err(error) => {
                println!(
                    "⚠️  Statement {}/{} had an error, but continuing...",
                    outcome.index,
                    report.outcomes.len()
                );
                println!("   Query preview: {}", outcome.preview);
                println!("   Error: {error}");
            }
        }
    }
    println!(
        "📈 {} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
}
