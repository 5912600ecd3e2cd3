//! crewforge HTTP server binary.
//!
//! Starts an axum HTTP server that exposes crew generation and supervised
//! execution. Executions left non-terminal by a previous process are
//! recovered at startup.
//!
//! # Environment Variables
//!
//! - `CREWFORGE_CONFIG` - YAML config file (optional)
//! - `PORT` - HTTP port (default: 8080)
//! - `CREWFORGE_STORE` - Storage backend: "memory" (default) or "sqlite"
//! - `CREWFORGE_SQLITE_PATH` - SQLite file (default: crewforge.db)
//! - `CREWFORGE_LLM_PROVIDER` - "openai" (default) or "scripted"
//! - `CREWFORGE_LLM_MODEL`, `CREWFORGE_LLM_BASE_URL` - backend overrides
//! - `RUST_LOG` - Tracing filter (default: "info,crewforge=debug")
//!
//! # Usage
//!
//! ```bash
//! CREWFORGE_STORE=sqlite cargo run --bin server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use crewforge::config::{EngineConfig, StoreKind};
use crewforge::server::{app_router, AppState};
use crewforge::store::{ExecutionStore, InMemoryExecutionStore, SqliteExecutionStore};
use crewforge::CrewService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crewforge=debug".into()),
        )
        .init();

    let config_path = std::env::var("CREWFORGE_CONFIG").ok().map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).context("loading configuration")?;

    let store: Arc<dyn ExecutionStore> = match config.server.store {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store; executions are lost on restart");
            Arc::new(InMemoryExecutionStore::new())
        }
        StoreKind::Sqlite => {
            tracing::info!("Opening SQLite store at {}", config.server.sqlite_path);
            Arc::new(
                SqliteExecutionStore::open(&config.server.sqlite_path)
                    .context("opening SQLite store")?,
            )
        }
    };

    let llm = crewforge::llms::build_llm(&config.llm).context("configuring reasoning backend")?;
    let bind_addr = format!("0.0.0.0:{}", config.server.port);

    let service = CrewService::new(config, llm, store);
    let recovered = service
        .recover_interrupted()
        .await
        .context("recovering interrupted executions")?;
    if !recovered.is_empty() {
        tracing::info!("Recovered {} interrupted execution(s)", recovered.len());
    }

    let app = app_router(AppState::new(service));

    tracing::info!("crewforge server {} starting on {}", crewforge::VERSION, bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    tracing::info!("crewforge server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
