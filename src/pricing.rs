// ABOUTME: Token pricing table and cost calculation for model responses
// ABOUTME: Cost attribution fails soft so it can never block delivering a response
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Response Cost Calculation
//!
//! Pure cost attribution over a static per-1M-token pricing table. An
//! unknown pricing key yields a cost of `0.0` plus a logged warning rather
//! than an error: a missing price must never block delivering a response.

use tracing::warn;

/// Price per 1M tokens in USD
#[derive(Debug, Clone, Copy)]
struct TokenPricing {
    input: f64,
    output: f64,
}

/// Pricing per 1M tokens, keyed by pricing key (not provider id, so a
/// registry entry can repoint to a new model without touching this table)
const PRICING: &[(&str, TokenPricing)] = &[
    (
        "gpt-4o",
        TokenPricing {
            input: 2.5,
            output: 10.0,
        },
    ),
    (
        "claude-3-sonnet-20240229",
        TokenPricing {
            input: 3.0,
            output: 15.0,
        },
    ),
    (
        "grok-3",
        TokenPricing {
            input: 3.0,
            output: 15.0,
        },
    ),
];

/// Calculate the cost of a model response from its token usage
///
/// Returns `input/1e6 * input_rate + output/1e6 * output_rate` rounded to
/// six fractional digits. Unknown pricing keys cost `0.0`.
#[must_use]
pub fn calculate_cost(pricing_key: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let Some((_, pricing)) = PRICING.iter().find(|(key, _)| *key == pricing_key) else {
        warn!("No pricing found for model: {pricing_key}, using default pricing");
        return 0.0;
    };

    let input_cost = f64::from(prompt_tokens) / 1_000_000.0 * pricing.input;
    let output_cost = f64::from(completion_tokens) / 1_000_000.0 * pricing.output;

    round_to_micros(input_cost + output_cost)
}

/// Round to six fractional digits (micro-dollar precision)
fn round_to_micros(cost: f64) -> f64 {
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Format a cost for display
#[must_use]
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${cost:.6}")
    } else {
        format!("${cost:.4}")
    }
}

/// Format a latency in milliseconds for display
#[must_use]
pub fn format_latency(latency_ms: u64) -> String {
    if latency_ms < 1000 {
        format!("{latency_ms}ms")
    } else {
        format!("{:.2}s", latency_ms as f64 / 1000.0)
    }
}
