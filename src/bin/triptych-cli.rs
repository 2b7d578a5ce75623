// ABOUTME: Terminal client driving the fan-out coordinator against a running server
// ABOUTME: Streams three provider panels to stdout and prints usage/cost summaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Triptych CLI
//!
//! Submits one prompt to a running server and drives all three provider
//! streams concurrently, printing chunks as they arrive tagged by
//! provider, followed by per-provider usage and cost once each stream
//! finishes.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use triptych::client::{ApiClient, FanOutCoordinator, ProviderOutcome, SessionEvent};
use triptych::pricing::format_cost;

#[derive(Parser)]
#[command(name = "triptych-cli")]
#[command(about = "Submit a prompt and stream all three provider answers")]
struct Args {
    /// Prompt text to submit
    prompt: String,

    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:8081")]
    server: String,

    /// Bearer token issued by the identity provider
    #[arg(long)]
    token: String,

    /// Existing chat to continue; a new chat is created when omitted
    #[arg(long)]
    chat_id: Option<String>,

    /// Providers to fan out to
    #[arg(long, value_delimiter = ',', default_values_t = default_providers())]
    providers: Vec<String>,
}

fn default_providers() -> Vec<String> {
    vec!["openai".to_owned(), "anthropic".to_owned(), "xai".to_owned()]
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let api = Arc::new(ApiClient::new(args.server.clone(), args.token.clone()));

    if !api.health().await.map_err(|e| anyhow!("{e}"))? {
        return Err(anyhow!("Server at {} is not healthy", args.server));
    }

    let chat_id = match args.chat_id {
        Some(id) => id,
        None => {
            let chat = api.create_chat(None).await.map_err(|e| anyhow!("{e}"))?;
            println!("Created chat {}", chat.id);
            chat.id
        }
    };

    let prompt = api
        .create_prompt(&chat_id, &args.prompt, None)
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let (events_tx, mut events) = mpsc::channel(256);
    let coordinator = FanOutCoordinator::new(api, args.providers, events_tx);
    coordinator
        .begin_streaming(&chat_id, &prompt.id, &args.prompt)
        .await;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Chunk { provider, text, .. } => {
                print!("[{provider}] {text}");
            }
            SessionEvent::Metadata {
                provider, usage, ..
            } => {
                println!(
                    "\n[{provider}] {} tokens ({} in / {} out), {}",
                    usage.total_tokens,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    format_cost(usage.cost),
                );
            }
            SessionEvent::ProviderDone {
                provider, outcome, ..
            } => match outcome {
                ProviderOutcome::Success => println!("\n[{provider}] done"),
                ProviderOutcome::Error { title, description } => {
                    println!("\n[{provider}] {title}: {description}");
                }
            },
            SessionEvent::Settled { confirmed, .. } => {
                if confirmed {
                    println!("\nAll providers settled; responses persisted.");
                } else {
                    println!("\nAll providers settled; persistence not confirmed.");
                }
                break;
            }
        }
    }

    Ok(())
}
