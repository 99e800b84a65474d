//! Structured Logger
//!
//! Wraps `tracing` to provide console output (plain or JSON), optional daily
//! rolling NDJSON files, and environment-based level control.

use std::path::Path;

use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global structured logger.
///
/// `RUST_LOG` overrides `level` when set. When `log_dir` is given, events are
/// also written as NDJSON to `flowchat.log.YYYY-MM-DD` in that directory.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logger(log_dir: Option<&Path>, level: &str, json_console: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if json_console {
        fmt::layer().json().with_writer(std::io::stdout).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_ansi(true)
            .boxed()
    };

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "flowchat.log");
            Some(fmt::layer().json().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory_and_tolerates_reinit() {
        let dir = std::env::temp_dir().join(format!("flowchat-log-test-{}", std::process::id()));
        init_logger(Some(&dir), "debug", false).unwrap();
        assert!(dir.is_dir());
        init_logger(None, "info", true).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
