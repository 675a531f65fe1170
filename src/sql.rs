// src/sql.rs
//
// Placeholder substitution and statement splitting for transformation files.
// Substitution is plain textual replacement and the split is a naive split on
// `;` with no awareness of string literals or comments.

use crate::config::Config;

/// Replace the `{project_id}`, `{dataset_id}` and `{table_id}` placeholders
/// with the configured values.
pub fn substitute_parameters(sql: &str, config: &Config) -> String {
    sql.replace("{project_id}", &config.gcp_project_id)
        .replace("{dataset_id}", &config.dataset_id)
        .replace("{table_id}", &config.table_id)
}

/// Split a SQL script into individual statements on `;`, dropping fragments
/// that are empty or contain only `--` line comments.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty() && !is_comment_only(fragment))
        .map(str::to_string)
        .collect()
}

fn is_comment_only(fragment: &str) -> bool {
    fragment
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Single-line preview of a statement for log and report output.
pub fn preview(statement: &str, max_len: usize) -> String {
    let flat: String = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max_len {
        flat
    } else {
        let cut: String = flat.chars().take(max_len).collect();
        format!("{cut}...")
    }
}
