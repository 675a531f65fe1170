// src/bin/test_connection.rs
// Diagnostic tool: checks the credential environment variable and BigQuery
// connectivity, reporting actionable failure causes. Run this locally to
// identify issues before pushing to CI.

use anyhow::Result;
use bqpipeline::config::{Config, DEFAULT_CONFIG_FILE};
use bqpipeline::diagnose::{self, KeyCheck};
use bqpipeline::warehouse::bigquery::BigQuery;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

const KEY_ENV_VAR: &str = "GCP_SERVICE_ACCOUNT_KEY";

#[tokio::main]
async fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    println!("\n🚀 BigQuery Pipeline Diagnostic Tool\n");

    let mut success = true;

    banner("🔍 STEP 1: Checking Environment Variable");
    let key_json = std::env::var(KEY_ENV_VAR).ok();
    match diagnose::check_service_account_key(key_json.as_deref()) {
        KeyCheck::Missing => {
            println!("❌ ERROR: {KEY_ENV_VAR} environment variable not set");
            println!("\nTo fix locally, run:");
            println!("export {KEY_ENV_VAR}='$(cat /path/to/your-service-account-key.json)'");
            success = false;
        }
        KeyCheck::InvalidJson { error } => {
            println!("❌ ERROR: Invalid JSON format");
            println!("   Error: {error}");
            success = false;
        }
        KeyCheck::Parsed {
            length,
            project_id,
            client_email,
        } => {
            println!("✅ Environment variable is set");
            println!("   Length: {length} characters");
            println!("✅ Valid JSON format");
            println!(
                "   Project ID: {}",
                project_id.as_deref().unwrap_or("NOT FOUND")
            );
            println!(
                "   Client Email: {}",
                client_email.as_deref().unwrap_or("NOT FOUND")
            );
        }
    }

    // No live API call unless the credential check passed.
    if success {
        banner("🔍 STEP 2: Testing BigQuery Connection");
        if let Err(e) = connection_check(key_json.as_deref()).await {
            println!("❌ ERROR: {e:#}");
            println!("\n   Possible causes:");
            println!("   - BigQuery API not enabled");
            println!("   - Service account lacks permissions");
            println!("   - Invalid project ID");
            success = false;
        }
    }

    println!("\n{}", "=".repeat(60));
    if success {
        println!("✅ ALL TESTS PASSED!");
        println!("{}", "=".repeat(60));
        println!("\nYour local setup is correct.");
        println!("If CI is failing, check:");
        println!("1. The secret name matches the workflow configuration");
        println!("2. The secret contains the FULL JSON (including {{ and }})");
        println!("3. No extra spaces or formatting in the secret");
    } else {
        println!("❌ TESTS FAILED");
        println!("{}", "=".repeat(60));
        println!("\nFix the issues above before deploying.");
    }

    std::process::exit(if success { 0 } else { 1 });
}

async fn connection_check(key_json: Option<&str>) -> Result<()> {
    let config_file =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let config = Config::load(Path::new("config"), &config_file)?;
    println!("✅ Config loaded");
    println!("   Project: {}", config.gcp_project_id);
    println!("   Dataset: {}", config.dataset_id);

    let warehouse = BigQuery::connect(&config.gcp_project_id, key_json).await?;
    println!("✅ BigQuery client created successfully");

    let check = diagnose::check_connection(&warehouse, &config).await?;
    println!("✅ Can access BigQuery API");
    println!("   Found {} existing datasets", check.datasets.len());
    for dataset in &check.datasets {
        println!("     - {dataset}");
    }

    match check.target_dataset_exists {
        Some(true) => println!("✅ Target dataset exists: {}", config.dataset_id),
        Some(false) => {
            println!("⚠️  Target dataset does not exist: {}", config.dataset_id);
            println!("   Will be created on first deployment");
        }
        None => println!("⚠️  Could not check target dataset: {}", config.dataset_id),
    }

    Ok(())
}

fn banner(title: &str) {
    println!("{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}
