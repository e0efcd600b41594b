//! Tool surface introspection.

use axum::extract::{Query, State};
use axum::response::Json;
use axum::Extension;
use serde::Deserialize;

use maestro_domain::access::AccessContext;
use maestro_tool_client::filter::visible_surface;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    /// Restrict the listing to one provider.
    #[serde(default)]
    pub provider_id: Option<String>,
}

/// GET /tools — the filtered tool surface for the caller.
pub async fn list_tools(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    Query(query): Query<ToolsQuery>,
) -> Json<serde_json::Value> {
    let catalog = state.registry.surface();
    let surface = visible_surface(&catalog, &ctx, state.config.auth.dev_mode);

    let tools: Vec<serde_json::Value> = surface
        .tools()
        .iter()
        .filter(|entry| {
            query
                .provider_id
                .as_deref()
                .map_or(true, |id| entry.provider_id == id)
        })
        .map(|entry| {
            serde_json::json!({
                "name": entry.spec.name,
                "description": entry.spec.description,
                "parameters": entry.spec.parameters,
                "provider_id": entry.provider_id,
                "allowed_roles": entry.spec.allowed_roles,
            })
        })
        .collect();

    Json(serde_json::json!({
        "count": tools.len(),
        "tools": tools,
    }))
}
