// ABOUTME: Server binary: loads config, opens the database, and serves the chat API
// ABOUTME: Token issuance lives in the external identity provider sharing JWT_SECRET
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Triptych Contributors

//! # Triptych Server Binary

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use triptych::{
    auth::AuthManager,
    config::ServerConfig,
    database::Database,
    llm::ProviderRegistry,
    logging,
    server::{self, ServerResources},
};

#[derive(Parser)]
#[command(name = "triptych-server")]
#[command(about = "Side-by-side AI chat: three providers, one prompt, streamed live")]
struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;

    info!("Starting triptych server");
    info!("{}", config.summary());

    let database = Database::new(&config.database.url).await?;
    info!("Database initialized: {}", config.database.url);

    let auth = AuthManager::new(
        config.auth.jwt_secret.as_bytes(),
        config.auth.jwt_expiry_hours,
    );

    let registry = ProviderRegistry::from_config(&config);
    info!("Provider registry ready: {:?}", registry.ids());

    let resources = Arc::new(ServerResources::new(database, auth, registry));

    display_endpoints(config.http_port);

    server::run(resources, config.http_port).await
}

fn display_endpoints(port: u16) {
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());

    info!("=== Available API Endpoints ===");
    info!("   Health Check:   GET    http://{host}:{port}/health");
    info!("   Create Chat:    POST   http://{host}:{port}/api/chats");
    info!("   List Chats:     GET    http://{host}:{port}/api/chats");
    info!("   Get Chat:       GET    http://{host}:{port}/api/chats/{{chat_id}}");
    info!("   Delete Chat:    DELETE http://{host}:{port}/api/chats/{{chat_id}}");
    info!("   Submit Prompt:  POST   http://{host}:{port}/api/chats/{{chat_id}}/prompts");
    info!("   Stream:         POST   http://{host}:{port}/api/chats/{{chat_id}}/submit?provider={{id}}");
    info!("=== End of Endpoint List ===");
}
