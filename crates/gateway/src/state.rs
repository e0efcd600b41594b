use std::sync::Arc;

use maestro_domain::config::Config;
use maestro_reasoner::ReasoningProvider;
use maestro_sessions::{SessionStore, ToolCache};
use maestro_tool_client::ToolRegistry;

use crate::auth::TokenVerifier;
use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub reasoner: Arc<dyn ReasoningProvider>,
    pub store: Arc<SessionStore>,
    pub cache: Arc<ToolCache>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    /// `None` when dev mode or token bypass disables validation.
    pub verifier: Option<Arc<TokenVerifier>>,
}
