use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use flowchat_core::{
    CanonicalReply, DeltaStream, ProviderAdapter, ProviderError, ProviderRequest, StreamDelta,
};

enum Scripted {
    Reply(CanonicalReply),
    Fail(String),
}

/// A scripted adapter that records every request it receives.
///
/// Replies are consumed in order; the last one repeats once the script runs out.
pub struct MockAdapter {
    name: String,
    replies: Mutex<VecDeque<Scripted>>,
    chunks: Vec<String>,
    fail_stream: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            chunks: Vec::new(),
            fail_stream: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_reply(CanonicalReply::text(text))
    }

    pub fn with_reply(self, reply: CanonicalReply) -> Self {
        self.script(Scripted::Reply(reply));
        self
    }

    pub fn failing(self, message: impl Into<String>) -> Self {
        self.script(Scripted::Fail(message.into()));
        self
    }

    pub fn with_stream_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn script(&self, item: Scripted) {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).push_back(item);
    }

    fn record(&self, request: &ProviderRequest) {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
    }

    fn next_reply(&self) -> Result<CanonicalReply, ProviderError> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let item = if replies.len() > 1 { replies.pop_front() } else { None };
        let current = item.as_ref().or_else(|| replies.front());
        match current {
            Some(Scripted::Reply(reply)) => Ok(reply.clone()),
            Some(Scripted::Fail(message)) => Err(ProviderError::transport(&self.name, message)),
            None => Ok(CanonicalReply::text("Mock response")),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError> {
        self.record(request);
        self.next_reply()
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError> {
        self.record(request);
        let mut items: Vec<Result<StreamDelta, ProviderError>> =
            self.chunks.iter().map(|c| Ok(StreamDelta::Text(c.clone()))).collect();
        if self.fail_stream {
            items.push(Err(ProviderError::transport(&self.name, "stream interrupted")));
        } else {
            items.push(Ok(StreamDelta::Done));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
