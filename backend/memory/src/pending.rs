//! Short-lived, expiring state kept next to the session store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use flowchat_core::ChatNodeConfig;

pub const SNAPSHOT_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const FOLLOW_UP_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60 * 60);

/// Marker for a workflow execution started on behalf of a chat action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingExecution {
    pub execution_id: String,
    pub action_id: String,
    pub workflow_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub polls: u32,
}

/// Pending markers keyed by execution id, evicted after a bounded TTL.
#[derive(Clone)]
pub struct PendingExecutions {
    cache: Cache<String, PendingExecution>,
}

impl PendingExecutions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn insert(&self, marker: PendingExecution) {
        self.cache.insert(marker.execution_id.clone(), marker);
    }

    pub fn get(&self, execution_id: &str) -> Option<PendingExecution> {
        self.cache.get(execution_id)
    }

    /// Remove and return the marker. Only one caller can win.
    ///
    /// Runs under the same per-key lock as [`record_poll`](Self::record_poll),
    /// so a concurrent poll can never write a taken marker back.
    pub fn take(&self, execution_id: &str) -> Option<PendingExecution> {
        match self
            .cache
            .entry(execution_id.to_string())
            .and_compute_with(|entry| match entry {
                Some(_) => Op::Remove,
                None => Op::Nop,
            }) {
            CompResult::Removed(entry) => Some(entry.into_value()),
            _ => None,
        }
    }

    /// Count a poll attempt and return the updated marker. Absent markers stay absent.
    pub fn record_poll(&self, execution_id: &str) -> Option<PendingExecution> {
        match self
            .cache
            .entry(execution_id.to_string())
            .and_compute_with(|entry| match entry {
                Some(entry) => {
                    let mut marker = entry.into_value();
                    marker.polls += 1;
                    Op::Put(marker)
                }
                None => Op::Nop,
            }) {
            CompResult::ReplacedWith(entry) => Some(entry.into_value()),
            _ => None,
        }
    }
}

impl Default for PendingExecutions {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL)
    }
}

/// A completion message waiting for the client to pick it up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowUpMessage {
    pub execution_id: String,
    pub action_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Follow-up messages per session, drained on pickup.
#[derive(Clone)]
pub struct FollowUpStash {
    cache: Cache<String, Vec<FollowUpMessage>>,
}

impl FollowUpStash {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn push(&self, session_id: &str, message: FollowUpMessage) {
        self.cache
            .entry(session_id.to_string())
            .and_upsert_with(|existing| {
                let mut messages = existing.map(|e| e.into_value()).unwrap_or_default();
                messages.push(message);
                messages
            });
    }

    pub fn drain(&self, session_id: &str) -> Vec<FollowUpMessage> {
        self.cache.remove(session_id).unwrap_or_default()
    }
}

impl Default for FollowUpStash {
    fn default() -> Self {
        Self::new(FOLLOW_UP_TTL)
    }
}

/// Per-session chat node configuration snapshots.
///
/// A snapshot is taken when a session first talks and replaced when the
/// workflow's revision moves on.
#[derive(Clone)]
pub struct ConfigSnapshots {
    cache: Cache<String, Arc<ChatNodeConfig>>,
}

impl ConfigSnapshots {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Return the session's snapshot, refreshing it from `current` when
    /// missing or taken at an older revision.
    pub fn resolve(&self, session_id: &str, current: &Arc<ChatNodeConfig>) -> Arc<ChatNodeConfig> {
        match self.cache.get(session_id) {
            Some(snapshot) if snapshot.revision == current.revision => snapshot,
            _ => {
                self.cache.insert(session_id.to_string(), current.clone());
                current.clone()
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ChatNodeConfig>> {
        self.cache.get(session_id)
    }
}

impl Default for ConfigSnapshots {
    fn default() -> Self {
        Self::new(SNAPSHOT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: &str) -> PendingExecution {
        PendingExecution {
            execution_id: id.into(),
            action_id: "book_demo".into(),
            workflow_id: "wf".into(),
            session_id: "s1".into(),
            created_at: Utc::now(),
            polls: 0,
        }
    }

    #[test]
    fn markers_are_taken_once() {
        let pending = PendingExecutions::default();
        pending.insert(marker("exec-1"));
        assert_eq!(pending.record_poll("exec-1").unwrap().polls, 1);
        assert_eq!(pending.get("exec-1").unwrap().polls, 1);
        assert!(pending.take("exec-1").is_some());
        assert!(pending.take("exec-1").is_none());
        assert!(pending.record_poll("exec-1").is_none());
    }

    #[test]
    fn concurrent_polls_never_bring_back_a_taken_marker() {
        let pending = PendingExecutions::default();
        for round in 0..200 {
            let id = format!("exec-{round}");
            pending.insert(marker(&id));

            let poller = {
                let pending = pending.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        pending.record_poll(&id);
                    }
                })
            };
            std::thread::yield_now();
            let taken = pending.take(&id);
            poller.join().unwrap();

            assert!(taken.is_some(), "round {round}: marker was not taken");
            assert!(pending.get(&id).is_none(), "round {round}: marker came back after take");
            assert!(pending.take(&id).is_none(), "round {round}: marker delivered twice");
        }
    }

    #[test]
    fn follow_ups_accumulate_and_drain() {
        let stash = FollowUpStash::default();
        for n in 0..2 {
            stash.push(
                "s1",
                FollowUpMessage {
                    execution_id: format!("e{n}"),
                    action_id: "a".into(),
                    message: format!("done {n}"),
                    created_at: Utc::now(),
                },
            );
        }
        let drained = stash.drain("s1");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "done 0");
        assert!(stash.drain("s1").is_empty());
    }

    #[test]
    fn snapshot_refreshes_on_revision_change() {
        let snapshots = ConfigSnapshots::default();
        let v1 = Arc::new(ChatNodeConfig::new("gpt-4o-mini", "v1"));
        assert_eq!(snapshots.resolve("s1", &v1).system_prompt, "v1");

        let mut edited = ChatNodeConfig::new("gpt-4o-mini", "v1 edited in place");
        edited.revision = 0;
        // same revision keeps the existing snapshot
        assert_eq!(snapshots.resolve("s1", &Arc::new(edited)).system_prompt, "v1");

        let mut v2 = ChatNodeConfig::new("gpt-4o-mini", "v2");
        v2.revision = 1;
        assert_eq!(snapshots.resolve("s1", &Arc::new(v2)).system_prompt, "v2");
        assert_eq!(snapshots.get("s1").unwrap().revision, 1);
    }
}
