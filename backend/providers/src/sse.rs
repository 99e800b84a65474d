//! Server-sent-event line decoding shared by every streaming adapter.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use flowchat_core::{DeltaStream, ProviderError, StreamDelta};

/// One classified SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Blank,
    /// `: keep-alive` style comment.
    Comment,
    /// `data: [DONE]`
    Done,
    /// `data: <payload>`
    Data(String),
    /// `event:`, `id:`, `retry:` and anything else we do not act on.
    Field,
}

impl SseLine {
    pub fn classify(line: &str) -> Self {
        if line.trim().is_empty() {
            return SseLine::Blank;
        }
        if line.starts_with(':') {
            return SseLine::Comment;
        }
        match line.strip_prefix("data:") {
            Some(rest) => {
                let data = rest.trim();
                if data == "[DONE]" {
                    SseLine::Done
                } else {
                    SseLine::Data(data.to_string())
                }
            }
            None => SseLine::Field,
        }
    }
}

/// Splits an arbitrary chunked byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters and
/// JSON payloads split across network chunks are reassembled intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buf: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            lines.push(SseLine::classify(text.trim_end_matches(['\r', '\n'])));
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&raw);
        Some(SseLine::classify(text.trim_end_matches(['\r', '\n'])))
    }
}

/// Turns one decoded `data:` JSON payload into a delta for a given provider dialect.
pub type ChunkDecoder = fn(provider: &str, chunk: &Value) -> Result<Option<StreamDelta>, ProviderError>;

struct RelayState<S> {
    body: Pin<Box<S>>,
    decoder: SseLineDecoder,
    pending: VecDeque<Result<StreamDelta, ProviderError>>,
    provider: String,
    decode: ChunkDecoder,
    finished: bool,
}

impl<S> RelayState<S> {
    fn enqueue(&mut self, line: SseLine) {
        if self.finished {
            return;
        }
        match line {
            SseLine::Blank | SseLine::Comment | SseLine::Field => {}
            SseLine::Done => {
                self.pending.push_back(Ok(StreamDelta::Done));
                self.finished = true;
            }
            SseLine::Data(data) => {
                let chunk: Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(provider = %self.provider, error = %e, "Skipping undecodable stream chunk");
                        return;
                    }
                };
                match (self.decode)(&self.provider, &chunk) {
                    Ok(Some(StreamDelta::Done)) => {
                        self.pending.push_back(Ok(StreamDelta::Done));
                        self.finished = true;
                    }
                    Ok(Some(delta)) => self.pending.push_back(Ok(delta)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                    }
                }
            }
        }
    }
}

/// Wrap a raw byte stream (usually `reqwest::Response::bytes_stream`) into a [`DeltaStream`].
///
/// Processing stops at the first `[DONE]`, provider-signalled completion, or error.
pub fn delta_stream<S, B, E>(body: S, provider: impl Into<String>, decode: ChunkDecoder) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = RelayState {
        body: Box::pin(body),
        decoder: SseLineDecoder::new(),
        pending: VecDeque::new(),
        provider: provider.into(),
        decode,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for line in st.decoder.push(bytes.as_ref()) {
                        st.enqueue(line);
                    }
                }
                Some(Err(e)) => {
                    let err = ProviderError::transport(st.provider.clone(), e);
                    st.pending.push_back(Err(err));
                    st.finished = true;
                }
                None => {
                    if let Some(line) = st.decoder.finish() {
                        st.enqueue(line);
                    }
                    st.finished = true;
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_decoder(_provider: &str, chunk: &Value) -> Result<Option<StreamDelta>, ProviderError> {
        Ok(chunk.get("t").and_then(Value::as_str).map(|t| StreamDelta::Text(t.to_string())))
    }

    #[test]
    fn classifies_lines() {
        assert_eq!(SseLine::classify(""), SseLine::Blank);
        assert_eq!(SseLine::classify(": OPENROUTER PROCESSING"), SseLine::Comment);
        assert_eq!(SseLine::classify("data: [DONE]"), SseLine::Done);
        assert_eq!(SseLine::classify("data:{\"a\":1}"), SseLine::Data("{\"a\":1}".into()));
        assert_eq!(SseLine::classify("event: response.created"), SseLine::Field);
    }

    #[test]
    fn decoder_reassembles_split_lines() {
        let mut d = SseLineDecoder::new();
        assert!(d.push(b"data: {\"t\":\"he").is_empty());
        let lines = d.push(b"llo\"}\r\n\r\n");
        assert_eq!(lines, vec![SseLine::Data("{\"t\":\"hello\"}".into()), SseLine::Blank]);
        assert!(d.finish().is_none());
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_across_chunks() {
        let mut d = SseLineDecoder::new();
        let bytes = "data: {\"t\":\"caf\u{e9}\"}\n".as_bytes();
        let split = bytes.len() - 4;
        assert!(d.push(&bytes[..split]).is_empty());
        assert_eq!(d.push(&bytes[split..]), vec![SseLine::Data("{\"t\":\"caf\u{e9}\"}".into())]);
    }

    #[tokio::test]
    async fn stream_stops_at_done() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(b": ping\n\ndata: {\"t\":\"a\"}\n\n"),
            Ok(b"data: not json\n\ndata: {\"t\":\"b\"}\n\ndata: [DONE]\n\n"),
            Ok(b"data: {\"t\":\"ignored\"}\n\n"),
        ];
        let stream = delta_stream(futures::stream::iter(chunks), "test", text_decoder);
        let items: Vec<_> = stream.collect().await;
        let deltas: Vec<StreamDelta> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            deltas,
            vec![
                StreamDelta::Text("a".into()),
                StreamDelta::Text("b".into()),
                StreamDelta::Done
            ]
        );
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(b"data: {\"t\":\"a\"}\n"),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut stream = delta_stream(futures::stream::iter(chunks), "test", text_decoder);
        assert_eq!(stream.next().await.unwrap().unwrap(), StreamDelta::Text("a".into()));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "transport-error");
        assert!(stream.next().await.is_none());
    }
}
