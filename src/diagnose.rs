// src/diagnose.rs

//! Checks behind the `test_connection` binary: one pure check of the
//! credential environment variable, one live check against the API.

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::Config;
use crate::warehouse::Warehouse;

/// Outcome of inspecting the `GCP_SERVICE_ACCOUNT_KEY` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    Missing,
    InvalidJson { error: String },
    Parsed {
        length: usize,
        project_id: Option<String>,
        client_email: Option<String>,
    },
}

impl KeyCheck {
    pub fn passed(&self) -> bool {
        matches!(self, KeyCheck::Parsed { .. })
    }
}

/// Validate that the credential value is present and well-formed JSON,
/// surfacing the embedded project id and client email when parseable. Pure:
/// no API call is made.
pub fn check_service_account_key(raw: Option<&str>) -> KeyCheck {
    let Some(raw) = raw else {
        return KeyCheck::Missing;
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => KeyCheck::Parsed {
            length: raw.len(),
            project_id: value
                .get("project_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            client_email: value
                .get("client_email")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        },
        Err(e) => KeyCheck::InvalidJson {
            error: e.to_string(),
        },
    }
}

/// What the live connectivity check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub datasets: Vec<String>,
    /// `None` when the informational existence check itself failed.
    pub target_dataset_exists: Option<bool>,
}

/// List datasets through the same client path the other binaries use, then
/// check (informationally, non-fatally) whether the target dataset exists.
pub async fn check_connection(
    warehouse: &dyn Warehouse,
    config: &Config,
) -> Result<ConnectionCheck> {
    let datasets = warehouse
        .list_datasets()
        .await
        .context("listing datasets")?;

    let target_dataset_exists = match warehouse.dataset_exists(&config.dataset_id).await {
        Ok(exists) => Some(exists),
        Err(e) => {
            warn!(
                dataset = %config.dataset_id,
                error = %format!("{e:#}"),
                "could not check target dataset"
            );
            None
        }
    };

    Ok(ConnectionCheck {
        datasets,
        target_dataset_exists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::mock::MockWarehouse;

    #[test]
    fn unset_key_fails() {
        let check = check_service_account_key(None);
        assert_eq!(check, KeyCheck::Missing);
        assert!(!check.passed());
    }

    #[test]
    fn invalid_json_fails() {
        let check = check_service_account_key(Some("{not json"));
        assert!(matches!(check, KeyCheck::InvalidJson { .. }));
        assert!(!check.passed());
    }

    #[test]
    fn valid_key_surfaces_identity() {
        let raw = r#"{"type": "service_account", "project_id": "proj", "client_email": "sa@proj.iam.gserviceaccount.com"}"#;
        let check = check_service_account_key(Some(raw));
        assert!(check.passed());
        match check {
            KeyCheck::Parsed {
                length,
                project_id,
                client_email,
            } => {
                assert_eq!(length, raw.len());
                assert_eq!(project_id.as_deref(), Some("proj"));
                assert_eq!(
                    client_email.as_deref(),
                    Some("sa@proj.iam.gserviceaccount.com")
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn valid_json_without_identity_fields_still_passes() {
        let check = check_service_account_key(Some("{}"));
        assert!(check.passed());
        match check {
            KeyCheck::Parsed {
                project_id,
                client_email,
                ..
            } => {
                assert_eq!(project_id, None);
                assert_eq!(client_email, None);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn connection_check_lists_datasets_and_target() {
        let config: Config = serde_yaml::from_str(
            "gcp_project_id: p\n\
             dataset_id: d\n\
             table_id: t\n\
             schema_file: s.json\n\
             data_file: r.csv\n\
             location: US\n",
        )
        .unwrap();

        let warehouse = MockWarehouse::new().with_dataset("d").with_dataset("other");
        let check = check_connection(&warehouse, &config).await.unwrap();
        assert_eq!(check.datasets, vec!["d".to_string(), "other".to_string()]);
        assert_eq!(check.target_dataset_exists, Some(true));

        let empty = MockWarehouse::new();
        let check = check_connection(&empty, &config).await.unwrap();
        assert!(check.datasets.is_empty());
        assert_eq!(check.target_dataset_exists, Some(false));
    }
}
