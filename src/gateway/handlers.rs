use crate::error::{ChatError, ValidationError};
use crate::session::{InboundChat, SessionMode, SessionRouter};
use crate::transcript::DEFAULT_PAGE_SIZE;
use crate::util::constant_time_eq;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{Value, json};

use super::{
    AppState, ChatMessageBody, HandoffBody, LogsDeleteBody, LogsQuery, PollQuery, TranscriptBody,
};

fn success(extra: Value) -> Json<Value> {
    let mut body = json!({"success": true});
    if let (Some(target), Some(source)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(body)
}

fn failure(error: &ChatError) -> Json<Value> {
    tracing::warn!("request failed: {error}");
    Json(json!({"success": false, "message": error.user_message()}))
}

/// Constant-time widget token check. `None` means the request may proceed.
fn check_widget_token(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let expected = state.widget_token.as_deref()?;
    let provided = headers
        .get("X-Widget-Token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(provided, expected) {
        None
    } else {
        let body = json!({"success": false, "message": "Invalid or missing widget token."});
        Some((StatusCode::UNAUTHORIZED, Json(body)).into_response())
    }
}

fn handoff_unavailable() -> Json<Value> {
    Json(json!({
        "success": false,
        "message": "Live agent support is not available right now."
    }))
}

/// GET /health
pub(super) async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /chat/message
pub(super) async fn handle_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatMessageBody>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }
    if body.is_live_agent && !state.live_agent_enabled {
        return handoff_unavailable().into_response();
    }

    let chat = InboundChat {
        session_id: body.session_id,
        user_name: body.user_name,
        message: body.message,
        mode: if body.is_live_agent {
            SessionMode::LiveAgent
        } else {
            SessionMode::Ai
        },
    };

    match state.router.handle_message(chat).await {
        Ok(reply) => success(json!({"reply": reply.text()})).into_response(),
        Err(error) => failure(&error).into_response(),
    }
}

/// POST /chat/handoff
pub(super) async fn handle_handoff(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HandoffBody>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }

    if body.enable {
        if !state.live_agent_enabled {
            return handoff_unavailable().into_response();
        }
        match state
            .router
            .begin_handoff(&body.session_id, &body.user_name)
            .await
        {
            Ok(()) => success(json!({"reply": SessionRouter::handoff_ack()})).into_response(),
            Err(error) => failure(&error).into_response(),
        }
    } else {
        success(json!({"reply": state.router.end_handoff()})).into_response()
    }
}

/// GET /chat/poll?session_id=...
pub(super) async fn handle_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }

    match state.router.poll_pending(&query.session_id) {
        Ok(messages) => success(json!({"messages": messages})).into_response(),
        Err(error) => failure(&error).into_response(),
    }
}

/// POST /chat/transcript
pub(super) async fn handle_transcript(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TranscriptBody>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }
    if body.conversation.is_empty() {
        return failure(&ValidationError::EmptyConversation.into()).into_response();
    }

    // lettre's SMTP transport is blocking.
    let mailer = state.mailer.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        mailer.send(&body.user_name, &body.conversation)
    })
    .await;

    match outcome {
        Ok(Ok(())) => success(json!({"reply": "Transcript sent."})).into_response(),
        Ok(Err(error)) => failure(&error.into()).into_response(),
        Err(join_error) => {
            tracing::error!("transcript mail task panicked: {join_error}");
            failure(&anyhow::anyhow!("mail task failed").into()).into_response()
        }
    }
}

/// POST /telegram/webhook
///
/// Acknowledges every well-formed envelope with 200, including updates that
/// carry nothing to queue; a non-200 answer would make Telegram redeliver
/// forever. Malformed JSON is the caller's fault and gets a 400.
pub(super) async fn handle_telegram_webhook(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = json!({"error": format!("Invalid JSON: {rejection}")});
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    if let Err(error) = state.router.ingest_relay_update(&update) {
        // Redelivery is safe (idempotent enqueue), but the store being down
        // will not be fixed by Telegram retrying; acknowledge and log.
        tracing::error!("failed to ingest relay update: {error}");
    }
    Json(json!({"status": "ok"})).into_response()
}

/// GET /logs?page=&page_size=
pub(super) async fn handle_logs_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 200);
    match state.log.list(page, page_size) {
        Ok(entries) => success(json!({"entries": entries, "page": page})).into_response(),
        Err(error) => failure(&error.into()).into_response(),
    }
}

/// POST /logs/delete
pub(super) async fn handle_logs_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LogsDeleteBody>,
) -> Response {
    if let Some(rejection) = check_widget_token(&state, &headers) {
        return rejection;
    }

    match state.log.delete(&body.ids) {
        Ok(deleted) => success(json!({"deleted": deleted})).into_response(),
        Err(error) => failure(&error.into()).into_response(),
    }
}
