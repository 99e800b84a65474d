//! `flowchat check-config`: print the validation report and the redacted config.

use anyhow::{Context, Result};

use flowchat_config::{collect_redacted_paths, redact, FlowchatConfig, ValidationReport};
use flowchat_providers::select_provider;

use crate::terminal_output::{note_error, note_info, note_success, note_warn, render_table};

/// Returns `true` when the config has no errors.
pub fn run(config: &FlowchatConfig, report: &ValidationReport) -> Result<bool> {
    if config.workflows.is_empty() {
        note_info("No workflows configured");
    } else {
        println!("{}", render_table(&["Workflow", "Model", "Provider", "Actions"], &workflow_rows(config)));
    }

    for warning in &report.warnings {
        note_warn(&format!("{}: {}", warning.path, warning.message));
    }
    for error in &report.errors {
        note_error(&format!("{}: {}", error.path, error.message));
    }

    let value = serde_json::to_value(config).context("Failed to serialize config")?;
    let masked = collect_redacted_paths(&value);
    if !masked.is_empty() {
        note_info(&format!("Masked: {}", masked.join(", ")));
    }
    println!("{}", serde_json::to_string_pretty(&redact(&value))?);

    if report.is_valid() {
        note_success(&format!("Config is valid ({} warning(s))", report.warnings.len()));
    } else {
        note_error(&format!("Config has {} error(s)", report.errors.len()));
    }
    Ok(report.is_valid())
}

fn workflow_rows(config: &FlowchatConfig) -> Vec<Vec<String>> {
    config
        .workflows
        .iter()
        .map(|(id, node)| {
            vec![
                id.clone(),
                node.model.clone(),
                select_provider(&node.model, &node.tools).to_string(),
                node.actions.len().to_string(),
            ]
        })
        .collect()
}
