use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use maestro_domain::config::Config;
use maestro_gateway::api;
use maestro_gateway::auth::TokenVerifier;
use maestro_gateway::runtime::cancel::CancelMap;
use maestro_gateway::runtime::session_lock::SessionLockMap;
use maestro_gateway::state::AppState;
use maestro_reasoner::{OpenAiCompatProvider, ReasoningProvider};
use maestro_sessions::{SessionStore, ToolCache};
use maestro_tool_client::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ──────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,maestro_gateway=debug")),
        )
        .json()
        .init();

    tracing::info!("maestro orchestrator starting");

    // ── Config ───────────────────────────────────────────────────────
    // A missing required key exits non-zero here, before anything binds.
    let config = Arc::new(Config::from_env().context("loading configuration")?);

    // ── Tool registry ────────────────────────────────────────────────
    let registry = Arc::new(ToolRegistry::from_endpoints(
        &config.providers.endpoints,
        Duration::from_millis(config.providers.discovery_timeout_ms),
    ));
    registry.load_all().await;
    {
        let catalog = registry.surface();
        if catalog.healthy_provider_count() == 0 {
            tracing::warn!(
                "no tool provider answered discovery; the surface is empty until a refresh succeeds"
            );
        } else {
            tracing::info!(
                providers = catalog.healthy_provider_count(),
                tools = catalog.tool_count(),
                "tool registry ready"
            );
        }
    }

    // ── Reasoning model ──────────────────────────────────────────────
    let reasoner: Arc<dyn ReasoningProvider> = Arc::new(
        OpenAiCompatProvider::from_config(&config.reasoner)
            .context("initializing reasoning provider")?,
    );

    // ── Session store & cache ────────────────────────────────────────
    let store = Arc::new(
        SessionStore::new(&config.store.state_path).context("initializing session store")?,
    );
    let cache = Arc::new(ToolCache::new());

    // ── Token verifier ───────────────────────────────────────────────
    let verifier = if config.auth.requires_token() {
        let tenant_id = config
            .auth
            .tenant_id
            .clone()
            .context("TENANT_ID is required when token validation is enabled")?;
        tracing::info!(tenant_id = %tenant_id, "token validation enabled");
        Some(Arc::new(TokenVerifier::new(
            tenant_id,
            config.auth.audience.clone(),
        )))
    } else {
        tracing::warn!(
            dev_mode = config.auth.dev_mode,
            bypass_token = config.auth.bypass_token,
            "token validation disabled"
        );
        None
    };

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        registry,
        reasoner,
        store: store.clone(),
        cache: cache.clone(),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        verifier,
    };

    // ── Periodic maintenance: store flush + cache pruning ────────────
    {
        let store = store.clone();
        let cache = cache.clone();
        let locks = state.session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = store.flush() {
                    tracing::warn!(error = %e, "session store flush failed");
                }
                let pruned = cache.prune_expired();
                if pruned > 0 {
                    tracing::debug!(pruned, "expired cache entries dropped");
                }
                locks.prune_idle();
            }
        });
    }

    // ── Router & bind ────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "maestro orchestrator listening");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
