//! # parley-server
//!
//! Real-time conversation backend for the Parley chat product.
//!
//! This binary provides:
//! - **Directory** lookups and upsert-on-login with prefix name search
//! - **Conversation store** with atomic create-or-append and single-sided
//!   delete
//! - **Live fan-out** of appended messages and conversation-list changes
//!   over Server-Sent Events
//! - **Media reference resolution** for photo/video uploads (blobs stored
//!   on disk under their stable reference path)
//! - **REST API** (axum) tying it together behind bearer session tokens

mod api;
mod config;
mod error;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_engine::Engine;
use parley_media::{BlobStore, MediaResolver};
use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Durable store (runs migrations on open)
    let database = Database::open_at(&config.db_path)?;
    let store = Arc::new(Mutex::new(database));

    // Engine: sessions, conversation operations, fan-out
    let engine = Arc::new(Engine::new(store.clone()));

    // Media blob store + resolver (creates directory if missing)
    let blobs = BlobStore::new(config.media_storage_path.clone(), config.max_media_bytes).await?;
    let media = Arc::new(MediaResolver::new(blobs, store));

    let app_state = AppState {
        engine,
        media,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
