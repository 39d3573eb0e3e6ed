//! Axum-based HTTP gateway between the widget, the relay webhook and the
//! coordinator.
//!
//! Every chat endpoint answers with the `{success, ...}` envelope at HTTP 200;
//! typed errors never escape as transport-level faults. hyper handles HTTP/1.1
//! parsing and Content-Length validation, the tower-http layers bound body
//! size and request duration.

mod handlers;

use handlers::{
    handle_chat_message, handle_handoff, handle_health, handle_logs_delete, handle_logs_list,
    handle_poll, handle_telegram_webhook, handle_transcript,
};

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::relay::{PendingStore, SqlitePendingStore, TelegramRelay};
use crate::session::{Message, SessionRouter};
use crate::transcript::{SqliteTranscriptStore, TranscriptMailer, TranscriptStore};
use anyhow::Result;
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s), covering the upstream completion call.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SessionRouter>,
    pub mailer: Arc<TranscriptMailer>,
    pub log: Arc<dyn TranscriptStore>,
    /// Anti-forgery token the widget echoes in `X-Widget-Token`. `None`
    /// disables the check.
    pub widget_token: Option<Arc<str>>,
    pub live_agent_enabled: bool,
}

/// POST /chat/message body.
#[derive(serde::Deserialize)]
pub struct ChatMessageBody {
    pub message: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub is_live_agent: bool,
    pub session_id: String,
}

fn default_user_name() -> String {
    "Guest".into()
}

/// POST /chat/handoff body.
#[derive(serde::Deserialize)]
pub struct HandoffBody {
    pub session_id: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// true starts a hand-off, false returns the session to AI mode.
    pub enable: bool,
}

/// GET /chat/poll query.
#[derive(serde::Deserialize)]
pub struct PollQuery {
    pub session_id: String,
}

/// POST /chat/transcript body.
#[derive(serde::Deserialize)]
pub struct TranscriptBody {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    pub conversation: Vec<Message>,
}

/// GET /logs query.
#[derive(serde::Deserialize)]
pub struct LogsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// POST /logs/delete body.
#[derive(serde::Deserialize)]
pub struct LogsDeleteBody {
    pub ids: Vec<i64>,
}

/// Run the HTTP gateway.
pub async fn run_gateway(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    run_gateway_with_listener(listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener (integration tests bind an
/// ephemeral port themselves).
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    config: Config,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let state = build_state(&config)?;

    tracing::info!(%addr, "gateway listening");
    tracing::info!("  POST /chat/message");
    tracing::info!("  POST /chat/handoff");
    tracing::info!("  GET  /chat/poll");
    tracing::info!("  POST /chat/transcript");
    tracing::info!("  POST /telegram/webhook");
    tracing::info!("  GET  /logs, POST /logs/delete");
    tracing::info!("  GET  /health");
    if state.widget_token.is_some() {
        tracing::info!("widget token check enabled");
    }
    if !state.router.relay_is_configured() {
        tracing::warn!("relay not configured, hand-off requests will be rejected");
    }

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Assemble the coordinator and its stores from config.
pub fn build_state(config: &Config) -> Result<AppState> {
    let db_path = Path::new(&config.store.db_path);
    let pending: Arc<dyn PendingStore> = Arc::new(SqlitePendingStore::new(
        db_path,
        Duration::from_secs(config.relay.pending_ttl_secs),
    )?);
    let log: Arc<dyn TranscriptStore> = Arc::new(SqliteTranscriptStore::new(db_path)?);

    let router = SessionRouter::new(
        CompletionClient::new(&config.completion),
        TelegramRelay::new(&config.relay),
        pending,
        Arc::clone(&log),
    );

    Ok(AppState {
        router: Arc::new(router),
        mailer: Arc::new(TranscriptMailer::new(&config.mail)),
        log,
        widget_token: config
            .gateway
            .widget_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(Arc::from),
        live_agent_enabled: config.experimental.live_agent_enabled,
    })
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/chat/message", post(handle_chat_message))
        .route("/chat/handoff", post(handle_handoff))
        .route("/chat/poll", get(handle_poll))
        .route("/chat/transcript", post(handle_transcript))
        .route("/telegram/webhook", post(handle_telegram_webhook))
        .route("/logs", get(handle_logs_list))
        .route("/logs/delete", post(handle_logs_delete))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}
