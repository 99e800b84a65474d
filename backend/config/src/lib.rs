//! `flowchat-config`: Flowchat runtime configuration.
//!
//! Provides:
//! - Typed config schema (gateway, providers, sessions, dispatch, workflows)
//! - YAML loading with `${ENV_VAR}` substitution
//! - Default value application
//! - Validation with per-field reports
//! - Redaction for safe display

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, parse_config};
pub use redact::{collect_redacted_paths, redact};
pub use schema::{
    DispatchConfig, FlowchatConfig, GatewayConfig, LoggingConfig, OpenRouterConfig, ProviderEndpoint,
    ProvidersConfig, SessionConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

/// Load a config file against the process environment, apply defaults, and validate.
///
/// Validation findings are logged and returned alongside the config; callers decide
/// whether errors are fatal.
pub async fn load_and_prepare(path: &Path) -> Result<(FlowchatConfig, ValidationReport)> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let config = load_config(path, &env).await?;
    let config = apply_all_defaults(config, &env);

    let report = validate(&config);
    log_report(&report);
    Ok((config, report))
}

/// Emit every finding in `report` through `tracing`.
pub fn log_report(report: &ValidationReport) {
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
}
