// ABOUTME: Wire format for the streaming submit endpoint: text stream plus metadata trailer
// ABOUTME: Shared by the server (encode side) and the fan-out client (scan side)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Streaming Wire Format
//!
//! A provider response travels as a plain `text/plain` stream of generated
//! text, terminated by an out-of-band usage trailer of the exact literal
//! form:
//!
//! ```text
//! \n\n__METADATA__{"promptTokens":..,"completionTokens":..,"totalTokens":..,"cost":..}__METADATA__
//! ```
//!
//! The trailer is always the last bytes of the stream and may be absent
//! (the server's wait for usage data is bounded). Clients consume the
//! stream through [`TrailerScanner`], which releases display text eagerly
//! while withholding only the shortest suffix that could still turn out to
//! be a trailer — so a trailer split across TCP chunk boundaries is still
//! detected. Only a trailer that terminates the stream parses as
//! metadata; sentinel-looking bytes that never close are handed back as
//! plain text when the stream ends. The encode side is the single place
//! the sentinel is ever written.

use serde::{Deserialize, Serialize};

/// Sentinel delimiting the metadata payload
const SENTINEL: &str = "__METADATA__";

/// Opening bytes of a trailer: blank line plus sentinel
const TRAILER_PREFIX: &str = "\n\n__METADATA__";

/// Usage and cost figures for one provider response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
    /// Cost in USD
    pub cost: f64,
}

/// Encode the metadata trailer appended after the generated text
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_metadata_trailer(usage: &UsageMetadata) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(usage)?;
    Ok(format!("\n\n{SENTINEL}{json}{SENTINEL}"))
}

/// Incremental splitter separating display text from the metadata trailer
///
/// Feed decoded chunks as they arrive; each call returns the text that is
/// now safe to display. Call [`TrailerScanner::finish`] when the stream
/// ends to collect any withheld text and the parsed metadata.
#[derive(Debug, Default)]
pub struct TrailerScanner {
    /// Bytes withheld because they may begin a trailer
    held: String,
    /// Whether the full trailer prefix has been seen
    in_trailer: bool,
}

impl TrailerScanner {
    /// Create a new scanner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a decoded chunk, returning text now safe to display
    pub fn feed(&mut self, chunk: &str) -> String {
        self.held.push_str(chunk);

        if self.in_trailer {
            return String::new();
        }

        if let Some(idx) = self.held.find(TRAILER_PREFIX) {
            self.in_trailer = true;
            let display: String = self.held.drain(..idx).collect();
            return display;
        }

        // Release everything except the longest suffix that is a proper
        // prefix of the trailer opening.
        let keep = longest_prefix_suffix(&self.held, TRAILER_PREFIX);
        let release_to = self.held.len() - keep;
        self.held.drain(..release_to).collect()
    }

    /// Consume the scanner at end of stream
    ///
    /// Returns any withheld text that turned out not to be a trailer, plus
    /// the parsed metadata if the stream ended with a well-formed trailer.
    #[must_use]
    pub fn finish(self) -> (String, Option<UsageMetadata>) {
        if self.in_trailer {
            if let Some(usage) = parse_trailer(&self.held) {
                return (String::new(), Some(usage));
            }
            // Sentinel-looking bytes that never closed: hand them back as text
            return (self.held, None);
        }
        (self.held, None)
    }
}

/// Parse a complete trailer (`\n\n__METADATA__<json>__METADATA__`)
fn parse_trailer(held: &str) -> Option<UsageMetadata> {
    let body = held.strip_prefix(TRAILER_PREFIX)?;
    let json = body.strip_suffix(SENTINEL)?;
    serde_json::from_str(json).ok()
}

/// Length of the longest suffix of `text` that is a proper prefix of `pattern`
fn longest_prefix_suffix(text: &str, pattern: &str) -> usize {
    let max = pattern.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&len| text.ends_with(&pattern[..len]))
        .unwrap_or(0)
}

/// Split a fully-buffered stream body into display text and metadata
#[must_use]
pub fn strip_trailer(body: &str) -> (String, Option<UsageMetadata>) {
    let mut scanner = TrailerScanner::new();
    let mut text = scanner.feed(body);
    let (rest, usage) = scanner.finish();
    text.push_str(&rest);
    (text, usage)
}
