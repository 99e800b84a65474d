use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use flowchat_core::{Clock, Role, Session, StoredMessage, SystemClock};

/// Default number of messages retained per session.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Durable conversation storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resume `session_id` when it exists for `workflow_id`, otherwise mint a new session.
    ///
    /// Callers must not assume the returned id equals the requested one.
    async fn open(&self, workflow_id: &str, session_id: Option<&str>) -> Result<Session>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Append a message, bump `updated_at` and evict the oldest messages beyond the retained maximum.
    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<StoredMessage>;

    /// Messages in creation order, never more than the retained maximum.
    async fn history(&self, session_id: &str) -> Result<Vec<StoredMessage>>;

    /// Delete sessions (and their messages) not updated since `older_than`.
    async fn purge_inactive(&self, older_than: DateTime<Utc>) -> Result<usize>;

    fn max_history(&self) -> usize;
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, VecDeque<StoredMessage>>,
    next_id: i64,
}

/// Process-local session store for tests and single-node deployments.
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
    max_history: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, workflow_id: &str, session_id: Option<&str>) -> Result<Session> {
        let now = self.clock.now();
        let mut inner = self.write();

        if let Some(id) = session_id {
            if let Some(existing) = inner.sessions.get_mut(id) {
                if existing.workflow_id == workflow_id {
                    existing.updated_at = now;
                    return Ok(existing.clone());
                }
            }
            debug!(requested = %id, "Session did not resolve, creating a new one");
        }

        let session = Session::new(workflow_id, now);
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.read().sessions.get(session_id).cloned())
    }

    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<StoredMessage> {
        let now = self.clock.now();
        let mut inner = self.write();

        let Some(session) = inner.sessions.get_mut(session_id) else {
            anyhow::bail!("unknown session {session_id}");
        };
        session.updated_at = now;

        inner.next_id += 1;
        let message = StoredMessage {
            id: inner.next_id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        };

        let max = self.max_history;
        let log = inner.messages.entry(session_id.to_string()).or_default();
        log.push_back(message.clone());
        while log.len() > max {
            log.pop_front();
        }
        Ok(message)
    }

    async fn history(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let inner = self.read();
        let Some(log) = inner.messages.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(self.max_history);
        Ok(log.iter().skip(skip).cloned().collect())
    }

    async fn purge_inactive(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.write();
        let stale: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.updated_at < older_than)
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            inner.sessions.remove(id);
            inner.messages.remove(id);
        }
        Ok(stale.len())
    }

    fn max_history(&self) -> usize {
        self.max_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flowchat_core::ManualClock;

    #[tokio::test]
    async fn unknown_or_foreign_ids_create_new_sessions() {
        let store = InMemorySessionStore::new();
        let first = store.open("wf-1", None).await.unwrap();
        assert_eq!(first.workflow_id, "wf-1");

        let resumed = store.open("wf-1", Some(&first.id)).await.unwrap();
        assert_eq!(resumed.id, first.id);

        let missing = store.open("wf-1", Some("nope")).await.unwrap();
        assert_ne!(missing.id, "nope");

        let other_workflow = store.open("wf-2", Some(&first.id)).await.unwrap();
        assert_ne!(other_workflow.id, first.id);
        assert_eq!(other_workflow.workflow_id, "wf-2");
    }

    #[tokio::test]
    async fn append_trims_oldest_first() {
        let store = InMemorySessionStore::new().with_max_history(3);
        let session = store.open("wf", None).await.unwrap();

        for i in 0..3 {
            let before = store.history(&session.id).await.unwrap().len();
            store.append(&session.id, Role::User, &format!("m{i}")).await.unwrap();
            assert_eq!(store.history(&session.id).await.unwrap().len(), before + 1);
        }
        store.append(&session.id, Role::Assistant, "m3").await.unwrap();

        let contents: Vec<String> =
            store.history(&session.id).await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn purge_removes_idle_sessions() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemorySessionStore::with_clock(clock.clone());
        let idle = store.open("wf", None).await.unwrap();
        store.append(&idle.id, Role::User, "hi").await.unwrap();

        clock.advance(Duration::days(2));
        let active = store.open("wf", None).await.unwrap();

        let purged = store.purge_inactive(clock.now() - Duration::days(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&idle.id).await.unwrap().is_none());
        assert!(store.history(&idle.id).await.unwrap().is_empty());
        assert!(store.get(&active.id).await.unwrap().is_some());
    }
}
