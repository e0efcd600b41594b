//! Provider health and manual catalog refresh.

use axum::extract::State;
use axum::response::Json;

use crate::state::AppState;

/// GET /providers — configured providers and their declared health.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.registry.surface().providers();
    Json(serde_json::json!({
        "count": providers.len(),
        "providers": providers,
    }))
}

/// POST /providers/refresh — re-probe every provider and swap in the new
/// catalog. On total failure the previous catalog is retained and
/// `refreshed` is false.
pub async fn refresh_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let refreshed = state.registry.refresh().await;
    let catalog = state.registry.surface();
    Json(serde_json::json!({
        "refreshed": refreshed,
        "healthy_providers": catalog.healthy_provider_count(),
        "tool_count": catalog.tool_count(),
        "providers": catalog.providers(),
    }))
}
