//! `flowchat purge-sessions`: delete sessions idle longer than the inactivity window.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::info;

use flowchat_memory::SessionStore;

/// Returns the number of sessions removed.
pub async fn run(store: &dyn SessionStore, older_than_days: u32) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    let removed = store.purge_inactive(cutoff).await?;
    info!(removed, older_than_days, cutoff = %cutoff, "[Purge] Removed inactive sessions");
    Ok(removed)
}
