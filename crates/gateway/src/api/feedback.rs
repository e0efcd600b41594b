//! Turn feedback.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use chrono::Utc;
use serde::Deserialize;

use maestro_domain::access::AccessContext;
use maestro_sessions::Feedback;

use crate::auth::effective_context;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub turn_id: String,
    /// 1 (poor) through 5 (excellent).
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    /// Caller identity; authoritative only in bypass mode.
    #[serde(default)]
    pub user_id: String,
}

/// POST /feedback — upsert feedback for a turn.
///
/// Idempotent by turn id: repeated submissions are last-write-wins and the
/// referenced turn is never mutated.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Json(body): Json<FeedbackBody>,
) -> Response {
    let ctx = effective_context(&state, ctx, &body.user_id);

    if !(1..=5).contains(&body.rating) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "rating must be between 1 and 5" })),
        )
            .into_response();
    }

    let feedback = Feedback {
        turn_id: body.turn_id.clone(),
        session_id: None,
        user_id: ctx.user_id.clone(),
        rating: body.rating,
        comment: body.comment,
        created_at: Utc::now(),
    };

    if let Err(e) = state.store.put_feedback(feedback) {
        tracing::error!(turn_id = %body.turn_id, error = %e, "failed to store feedback");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "failed to store feedback" })),
        )
            .into_response();
    }

    tracing::info!(turn_id = %body.turn_id, rating = body.rating, "feedback stored");
    Json(serde_json::json!({
        "success": true,
        "turn_id": body.turn_id,
    }))
    .into_response()
}
