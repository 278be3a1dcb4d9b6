// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Service entry point: configuration, logging, wiring, serve.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kaapi::catalog::SqliteCatalog;
use kaapi::chat::{ChatEngine, SYSTEM_PROMPT};
use kaapi::config::Settings;
use kaapi::llm::factory::ProviderFactory;
use kaapi::server;
use kaapi::session::InMemorySessionStore;

fn init_logging() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let settings = Settings::from_env();
    let provider = ProviderFactory::create(&settings, SYSTEM_PROMPT)?;
    let catalog = Arc::new(SqliteCatalog::open(&settings.catalog_db)?);
    let sessions = Arc::new(InMemorySessionStore::new());

    info!(
        provider = provider.name(),
        catalog_db = %settings.catalog_db.display(),
        system_prompt_chars = SYSTEM_PROMPT.len(),
        "startup"
    );

    let engine = ChatEngine::new(provider, catalog, sessions);
    server::run(&settings.bind_address, engine).await?;
    Ok(())
}
