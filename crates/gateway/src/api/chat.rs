//! The chat endpoint — runs one orchestrated turn.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use chrono::Utc;
use serde::Deserialize;

use maestro_domain::access::AccessContext;
use maestro_domain::error::Error;
use maestro_sessions::{Turn, TurnMessage};

use crate::auth::effective_context;
use crate::runtime::{run_turn, TurnInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Caller identity; authoritative only in bypass mode.
    #[serde(default)]
    pub user_id: String,
    /// Existing session to continue, or absent to start a new one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Only the last user message is the current input; server-side
    /// session history supersedes anything earlier in the list.
    pub messages: Vec<ChatMessage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(body): Json<ChatBody>,
) -> Response {
    let ctx = effective_context(&state, ctx, &body.user_id);

    let Some(user_message) = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "no user message provided" })),
        )
            .into_response();
    };

    let session_id = body
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Continuing someone else's session reads as not-found, before any
    // work is spent on the turn.
    if body.session_id.is_some()
        && state.store.session_exists(&session_id)
        && state.store.load_session(&ctx.user_id, &session_id).is_none()
    {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        )
            .into_response();
    }

    tracing::info!(
        user_id = %ctx.user_id,
        session_id = %session_id,
        message_count = body.messages.len(),
        "chat request received"
    );

    // One turn per session at a time.
    let _permit = match state.session_locks.try_acquire(&session_id) {
        Ok(permit) => permit,
        Err(_) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "session is busy: a turn is already in progress"
                })),
            )
                .into_response();
        }
    };

    let cancel = state.cancel_map.register(&session_id);
    let input = TurnInput {
        session_id: session_id.clone(),
        user_message: user_message.clone(),
        context: ctx.clone(),
    };

    let outcome = run_turn(&state, &input, &cancel).await;
    state.cancel_map.remove(&session_id);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(Error::Cancelled) => {
            // Cancelled turns are discarded: nothing reaches the store.
            tracing::info!(session_id = %session_id, "turn cancelled, discarding");
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "turn cancelled" })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "turn failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    // ── Persist the finished turn ─────────────────────────────────
    let turn = Turn::new(
        TurnMessage::user(&user_message),
        TurnMessage::assistant(&outcome.response),
        outcome.metadata.clone(),
    );
    let turn_id = turn.turn_id.clone();

    let turn_number = match state.store.append_turn(&session_id, &ctx.user_id, turn) {
        Ok(n) => n,
        Err(Error::Auth(_)) => {
            // The session id belongs to someone else; indistinguishable
            // from not-found.
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "session not found" })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to persist turn");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to persist turn" })),
            )
                .into_response();
        }
    };

    Json(serde_json::json!({
        "session_id": session_id,
        "response": outcome.response,
        "success": outcome.success,
        "rounds": outcome.metadata.rounds,
        "providers_used": outcome.metadata.providers_used,
        "lineage": outcome.metadata.lineage,
        "metadata": {
            "execution_time_ms": outcome.metadata.execution_time_ms,
            "turn_id": turn_id,
            "turn_number": turn_number,
            "timestamp": Utc::now().to_rfc3339(),
        },
    }))
    .into_response()
}
