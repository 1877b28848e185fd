//! Streaming completion responses: SSE decoding and the fragment stream.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::errors::LlmError;
use crate::models::TokenUsage;
use crate::utils::estimate_tokens_from_chars;

/// One item of a completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty text fragment
    Delta(String),
    /// Always the last event of a successful stream
    Done(TokenUsage),
}

/// A payload extracted from an SSE `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    Data(String),
    Done,
}

/// Splits a byte stream into SSE payloads.
///
/// Lines are cut on raw bytes, so chunk boundaries falling inside a line or
/// inside a multi-byte character are harmless.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SsePayload> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = Self::parse_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<SsePayload> {
        let line = std::mem::take(&mut self.buffer);
        Self::parse_line(&line)
    }

    fn parse_line(raw: &[u8]) -> Option<SsePayload> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();

        // Blank separators and `:` keep-alive comments carry nothing
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            Some(SsePayload::Done)
        } else {
            Some(SsePayload::Data(data.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
    code: Option<serde_json::Value>,
}

struct SseState<B> {
    body: Pin<Box<B>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, LlmError>>,
    reported: Option<ChunkUsage>,
    input_estimate: u32,
    output_chars: usize,
    finished: bool,
}

impl<B> SseState<B> {
    fn handle(&mut self, payload: SsePayload) {
        if self.finished {
            return;
        }

        let data = match payload {
            SsePayload::Done => return self.finish(),
            SsePayload::Data(data) => data,
        };

        let chunk: ChunkBody = match serde_json::from_str(&data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Skipping malformed stream payload: {}", e);
                return;
            }
        };

        if let Some(err) = chunk.error {
            let status = err
                .code
                .as_ref()
                .and_then(|c| c.as_u64())
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(502);
            self.finished = true;
            self.pending.push_back(Err(match status {
                401 | 403 => LlmError::Auth(err.message),
                429 => LlmError::RateLimited,
                _ => LlmError::Api { status, message: err.message },
            }));
            return;
        }

        if let Some(content) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            if !content.is_empty() {
                self.output_chars += content.chars().count();
                self.pending.push_back(Ok(StreamEvent::Delta(content)));
            }
        }

        if chunk.usage.is_some() {
            self.reported = chunk.usage;
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let usage = match self.reported.take() {
            Some(u) => TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                estimated: false,
            },
            None => TokenUsage {
                input_tokens: self.input_estimate,
                output_tokens: estimate_tokens_from_chars(self.output_chars),
                estimated: true,
            },
        };
        self.pending.push_back(Ok(StreamEvent::Done(usage)));
    }
}

/// Lazy, finite, single-pass stream of completion events.
///
/// Yields zero or more `Delta`s, then exactly one `Done`, then ends. An
/// `Err` item also ends the stream.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>,
}

impl CompletionStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static,
    {
        Self { inner: Box::pin(stream) }
    }

    /// Stream over a fixed sequence of events
    pub fn from_events(events: Vec<Result<StreamEvent, LlmError>>) -> Self {
        Self::new(futures::stream::iter(events))
    }

    /// Decode an SSE response body. `input_estimate` is reported as the input
    /// token count if the body carries no usage object.
    pub fn from_sse<B, T, E>(body: B, input_estimate: u32) -> Self
    where
        B: Stream<Item = Result<T, E>> + Send + 'static,
        T: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        let state = SseState {
            body: Box::pin(body),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            reported: None,
            input_estimate,
            output_chars: 0,
            finished: false,
        };

        Self::new(futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.pending.pop_front() {
                    return Some((event, st));
                }
                if st.finished {
                    return None;
                }

                match st.body.next().await {
                    Some(Ok(bytes)) => {
                        for payload in st.decoder.push(bytes.as_ref()) {
                            st.handle(payload);
                        }
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        st.pending.push_back(Err(LlmError::Stream(e.to_string())));
                    }
                    None => {
                        if let Some(payload) = st.decoder.finish() {
                            st.handle(payload);
                        }
                        st.finish();
                    }
                }
            }
        }))
    }

    /// Drain the stream, returning the full text and the final usage.
    pub async fn collect_reply(mut self) -> Result<(String, TokenUsage), LlmError> {
        let mut reply = String::new();
        while let Some(event) = self.next().await {
            match event? {
                StreamEvent::Delta(text) => reply.push_str(&text),
                StreamEvent::Done(usage) => return Ok((reply, usage)),
            }
        }
        Err(LlmError::Stream("stream ended without a final usage event".to_string()))
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamEvent, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
