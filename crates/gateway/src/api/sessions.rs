//! Session history endpoints.
//!
//! Every read is scoped to the caller: a session owned by someone else
//! comes back exactly like a session that does not exist.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::Extension;

use maestro_domain::access::AccessContext;

use crate::state::AppState;

/// GET /sessions — summaries of the caller's sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> Json<serde_json::Value> {
    let sessions = state.store.list_sessions(&ctx.user_id);
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// GET /sessions/:id — full history, with any feedback joined per turn.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let Some(session) = state.store.load_session(&ctx.user_id, &session_id) else {
        return Json(serde_json::json!({
            "session_id": session_id,
            "turns": [],
            "total_turns": 0,
        }));
    };

    let turns: Vec<serde_json::Value> = session
        .turns
        .iter()
        .map(|turn| {
            let feedback = state.store.get_feedback(&turn.turn_id).map(|fb| {
                serde_json::json!({
                    "rating": fb.rating,
                    "comment": fb.comment,
                    "created_at": fb.created_at,
                })
            });
            serde_json::json!({
                "turn_id": turn.turn_id,
                "turn_number": turn.turn_number,
                "user_message": turn.user_message,
                "assistant_message": turn.assistant_message,
                "execution_metadata": turn.metadata,
                "created_at": turn.created_at,
                "feedback": feedback,
            })
        })
        .collect();

    Json(serde_json::json!({
        "session_id": session.session_id,
        "created_at": session.created_at,
        "updated_at": session.updated_at,
        "total_turns": turns.len(),
        "turns": turns,
    }))
}

/// POST /sessions/:id/stop — best-effort cancellation of an in-flight
/// turn. The cancelled turn is discarded, not persisted.
pub async fn stop_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    // A session with history must belong to the caller; a first-turn
    // session has no document yet and is cancellable by its initiator.
    if state.store.session_exists(&session_id)
        && state.store.load_session(&ctx.user_id, &session_id).is_none()
    {
        return Json(serde_json::json!({ "stopped": false }));
    }
    let stopped = state.cancel_map.cancel(&session_id);
    if stopped {
        tracing::info!(session_id = %session_id, "cancellation requested");
    }
    Json(serde_json::json!({ "stopped": stopped }))
}
