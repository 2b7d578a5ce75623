// ABOUTME: Shared SSE line-buffering parser for upstream model streaming responses
// ABOUTME: Handles partial lines across TCP boundaries and multiple events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # SSE Stream Parser
//!
//! A shared line-buffering parser for Server-Sent Events (SSE) used by all
//! upstream generators. Solves two correctness issues:
//!
//! 1. **Multiple events per TCP chunk**: When network buffers batch several
//!    SSE events into a single `bytes_stream()` chunk, all events are
//!    emitted (not just the first).
//!
//! 2. **Partial JSON across TCP boundaries**: When a JSON payload is split
//!    across two TCP chunks, the line buffer accumulates partial data until
//!    a complete line arrives.
//!
//! Each generator supplies a `parse_data` closure that converts raw JSON
//! strings into [`StreamChunk`] values. The SSE framing (line buffering,
//! `data:` prefix stripping, `[DONE]` detection) is handled once here.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{future, Stream, StreamExt};

use super::{GenerationStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal (OpenAI convention)
    Done,
}

/// Line-buffering SSE parser that handles partial lines across TCP chunk boundaries
///
/// SSE streams are newline-delimited. TCP does not guarantee alignment
/// between network chunks and SSE event boundaries. This parser buffers
/// incomplete lines and emits complete events only when a full line
/// (terminated by `\n`) is available.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated bytes not yet terminated by a newline
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            if let Some(event) = Self::parse_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush any remaining buffered content as a final event
    ///
    /// Called when the byte stream ends. If there is a partial line in the
    /// buffer (no trailing newline), attempt to parse it as an SSE event.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        Self::parse_line(&remaining).into_iter().collect()
    }

    /// Parse one SSE line into an event, skipping separators and non-data fields
    fn parse_line(line: &str) -> Option<SseEvent> {
        let trimmed = line.trim();

        // Empty lines are SSE event separators
        if trimmed.is_empty() {
            return None;
        }

        if trimmed == "data: [DONE]" {
            return Some(SseEvent::Done);
        }

        // Ignore non-data SSE fields (event:, id:, retry:, comments)
        let data = trimmed.strip_prefix("data: ")?;
        if data.trim().is_empty() {
            return None;
        }
        Some(SseEvent::Data(data.to_owned()))
    }
}

/// Create a properly-buffered generation stream from a raw byte stream
///
/// Wraps a `reqwest` byte stream with SSE line buffering. The `parse_data`
/// closure converts provider-specific JSON strings into [`StreamChunk`]
/// values; return `None` to skip events that produce no output.
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_data: F,
    provider_name: &'static str,
) -> GenerationStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
    };

    // unfold keeps the parser state across async iterations. Each iteration
    // either drains a pending event or reads the next TCP chunk.
    let stream = unfold(
        (
            Box::pin(byte_stream)
                as Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
            state,
            parse_data,
            provider_name,
        ),
        |(mut byte_stream, mut state, parse_data, provider_name)| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_data, provider_name)));
                }

                if state.stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let events = state.parser.feed(&bytes);
                        state.enqueue(events, &parse_data);
                    }
                    Some(Err(e)) => {
                        state.stream_ended = true;
                        return Some((
                            Err(AppError::upstream(
                                provider_name,
                                format!("Stream read error: {e}"),
                            )),
                            (byte_stream, state, parse_data, provider_name),
                        ));
                    }
                    None => {
                        state.stream_ended = true;
                        let events = state.parser.flush();
                        state.enqueue(events, &parse_data);
                        if let Some(item) = state.pending.pop_front() {
                            return Some((item, (byte_stream, state, parse_data, provider_name)));
                        }
                        return None;
                    }
                }
            }
        },
    );

    // Drop empty chunks that carry neither content, finality, nor usage
    let filtered = stream.filter(|result| {
        future::ready(result.as_ref().map_or(true, |chunk| {
            !chunk.delta.is_empty() || chunk.is_final || chunk.usage.is_some()
        }))
    });

    Box::pin(filtered)
}

/// Internal state for the SSE stream unfold
struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, AppError>>,
    stream_ended: bool,
}

impl SseStreamState {
    fn enqueue<F>(&mut self, events: Vec<SseEvent>, parse_data: &F)
    where
        F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
    {
        for event in events {
            match event {
                SseEvent::Data(json_str) => {
                    if let Some(result) = parse_data(&json_str) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => {
                    self.pending
                        .push_back(Ok(StreamChunk::finished(Some("stop".to_owned()))));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_lines() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_owned()),
                SseEvent::Data("{\"b\":2}".to_owned()),
            ]
        );
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"text\":\"hel").is_empty());
        let events = buffer.feed(b"lo\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"text\":\"hello\"}".to_owned())]);
    }

    #[test]
    fn test_done_signal() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: [DONE]\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_non_data_fields_ignored() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"event: message_start\nid: 7\n: keepalive\ndata: {\"x\":1}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_owned())]);
    }

    #[test]
    fn test_flush_without_trailing_newline() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.feed(b"data: {\"last\":true}").is_empty());
        let events = buffer.flush();
        assert_eq!(events, vec![SseEvent::Data("{\"last\":true}".to_owned())]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.feed(b"data: {\"a\":1}\r\n");
        assert_eq!(events, vec![SseEvent::Data("{\"a\":1}".to_owned())]);
    }
}
