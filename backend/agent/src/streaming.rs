//! Streaming relay.
//!
//! Frames always leave in the same order: the session id, zero or more
//! content fragments in receipt order, an optional error, then exactly one
//! terminal `[DONE]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use flowchat_core::{DeltaStream, ProviderError, Role, StreamDelta, GENERIC_FAILURE_MESSAGE};
use flowchat_memory::SessionStore;

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Sent instead of content when a streaming turn hits a chat node with actions.
pub const STREAMING_WITH_ACTIONS_MESSAGE: &str =
    "Streaming is not available for this chat. Please try again without streaming.";

/// One outgoing SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    SessionId(String),
    Content(String),
    Error(String),
    Done,
}

impl StreamFrame {
    /// The `data:` payload for this frame.
    pub fn data(&self) -> String {
        match self {
            StreamFrame::SessionId(id) => json!({ "session_id": id }).to_string(),
            StreamFrame::Content(text) => json!({ "content": text }).to_string(),
            StreamFrame::Error(message) => json!({ "error": true, "message": message }).to_string(),
            StreamFrame::Done => "[DONE]".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done)
    }
}

/// Reassembles the full reply text from streamed fragments.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    text: String,
    fragments: usize,
}

impl StreamAccumulator {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[derive(Debug)]
pub enum RelayOutcome {
    /// Upstream finished and the accumulated text was persisted (if any).
    Completed { text: String, fragments: usize },
    Failed(ProviderError),
    TimedOut,
    /// The turn was refused before any upstream call.
    Rejected,
}

/// Drives one streaming turn from upstream deltas to outgoing frames.
pub struct StreamRelay {
    store: Arc<dyn SessionStore>,
    session_id: String,
    timeout: Duration,
}

impl StreamRelay {
    pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>, timeout: Duration) -> Self {
        Self { store, session_id: session_id.into(), timeout }
    }

    /// Refuse the turn: session id, error, terminal.
    pub async fn reject(self, tx: mpsc::Sender<StreamFrame>, message: &str) -> RelayOutcome {
        let _ = tx.send(StreamFrame::SessionId(self.session_id)).await;
        let _ = tx.send(StreamFrame::Error(message.to_string())).await;
        let _ = tx.send(StreamFrame::Done).await;
        RelayOutcome::Rejected
    }

    /// Emit the session id, open upstream with `open`, forward every text
    /// delta and persist the full reply once upstream completes cleanly.
    ///
    /// Send failures (client gone) are ignored; upstream is still consumed to
    /// completion so the reply is persisted.
    pub async fn run<F>(self, open: F, tx: mpsc::Sender<StreamFrame>) -> RelayOutcome
    where
        F: Future<Output = Result<DeltaStream, ProviderError>>,
    {
        let deadline = Instant::now() + self.timeout;
        let _ = tx.send(StreamFrame::SessionId(self.session_id.clone())).await;

        let outcome = match timeout_at(deadline, open).await {
            Err(_) => RelayOutcome::TimedOut,
            Ok(Err(e)) => RelayOutcome::Failed(e),
            Ok(Ok(upstream)) => self.forward(upstream, deadline, &tx).await,
        };

        match &outcome {
            RelayOutcome::Completed { text, fragments } => {
                if !text.is_empty() {
                    if let Err(e) = self.store.append(&self.session_id, Role::Assistant, text).await {
                        warn!(session_id = %self.session_id, error = %e, "Failed to persist streamed reply");
                    }
                }
                debug!(session_id = %self.session_id, fragments, "Stream completed");
            }
            RelayOutcome::Failed(e) => {
                warn!(session_id = %self.session_id, kind = e.kind(), error = %e, "Stream failed");
                let _ = tx.send(StreamFrame::Error(GENERIC_FAILURE_MESSAGE.to_string())).await;
            }
            RelayOutcome::TimedOut => {
                warn!(session_id = %self.session_id, timeout_secs = self.timeout.as_secs(), "Stream timed out");
                let _ = tx.send(StreamFrame::Error(GENERIC_FAILURE_MESSAGE.to_string())).await;
            }
            RelayOutcome::Rejected => {}
        }

        let _ = tx.send(StreamFrame::Done).await;
        outcome
    }

    async fn forward(&self, mut upstream: DeltaStream, deadline: Instant, tx: &mpsc::Sender<StreamFrame>) -> RelayOutcome {
        let mut acc = StreamAccumulator::default();
        loop {
            match timeout_at(deadline, upstream.next()).await {
                Err(_) => return RelayOutcome::TimedOut,
                Ok(Some(Ok(StreamDelta::Text(fragment)))) => {
                    acc.push(&fragment);
                    let _ = tx.send(StreamFrame::Content(fragment)).await;
                }
                Ok(Some(Ok(StreamDelta::Done))) | Ok(None) => break,
                Ok(Some(Err(e))) => return RelayOutcome::Failed(e),
            }
        }
        let fragments = acc.fragments();
        RelayOutcome::Completed { text: acc.into_text(), fragments }
    }
}
