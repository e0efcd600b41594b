pub mod chat;
pub mod feedback;
pub mod providers;
pub mod sessions;
pub mod tools;

use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::auth;
use crate::state::AppState;

/// Build the full API router.
///
/// `/health` is public; everything else passes the access middleware,
/// which resolves the caller's context (validated token, or the dev /
/// bypass shims).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/chat", post(chat::chat))
        .route("/tools", get(tools::list_tools))
        .route("/providers", get(providers::list_providers))
        .route("/providers/refresh", post(providers::refresh_providers))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id/stop", post(sessions::stop_session))
        .route("/feedback", post(feedback::submit_feedback))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_access,
        ));

    public.merge(protected)
}

/// Liveness probe. Returns 200 whenever the process is up.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
