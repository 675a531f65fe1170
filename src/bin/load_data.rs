// src/bin/load_data.rs
// Load a local CSV file into the configured BigQuery table, replacing any
// existing rows. Exits non-zero on any failure.

use anyhow::Result;
use bqpipeline::config::{Config, DEFAULT_CONFIG_FILE};
use bqpipeline::load;
use bqpipeline::warehouse::bigquery::BigQuery;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    println!("{}", "=".repeat(60));
    println!("🚀 Starting BigQuery Data Load Process");
    println!("{}", "=".repeat(60));

    let config_file =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    println!("\n📖 Loading configuration from {config_file}...");
    let config = Config::load(Path::new("config"), &config_file)?;
    println!("   Project:  {}", config.gcp_project_id);
    println!("   Dataset:  {}", config.dataset_id);
    println!("   Table:    {}", config.table_id);
    println!("   Location: {}", config.location);

    let key_json = std::env::var("GCP_SERVICE_ACCOUNT_KEY").ok();
    if key_json.is_some() {
        println!("\n🔐 Authenticating with service account from environment variable...");
    } else {
        println!("\n🔐 Authenticating with local credentials...");
    }
    let warehouse = BigQuery::connect(&config.gcp_project_id, key_json.as_deref()).await?;

    println!("\n📦 Checking dataset...");
    load::ensure_dataset(&warehouse, &config).await?;

    println!("\n📥 Loading data to BigQuery...");
    println!(
        "📤 Loading data from {} to {}...",
        config.data_file,
        config.qualified_table()
    );
    let report = load::run_load(&warehouse, &config, Path::new("data")).await?;

    println!(
        "✅ Loaded {} rows into {}",
        report.table_rows,
        config.qualified_table()
    );
    println!(
        "📊 Table size: {:.2} MB",
        report.table_bytes as f64 / 1024.0 / 1024.0
    );

    println!("\n{}", "=".repeat(60));
    println!("✅ Data load completed successfully!");
    println!("{}", "=".repeat(60));
    Ok(())
}
