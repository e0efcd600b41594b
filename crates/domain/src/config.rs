//! Configuration for the orchestration core.
//!
//! The configuration is environment-driven: an optional TOML base file
//! (pointed at by `MAESTRO_CONFIG`, or `./config.toml` when present) is
//! loaded first, then the recognized environment variables override it.
//! Missing required values are a startup error — the process exits
//! non-zero rather than limping along without a provider map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub tools: ToolCallConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

/// Tool-server providers known to the registry.
///
/// The endpoint map is the *only* source of truth for which providers
/// exist; tool schemas are always discovered live, never read from the
/// document store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// provider id → base URL.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    /// Per-provider budget for the list-tools discovery probe.
    #[serde(default = "d_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Hard cap on reasoning-model rounds per turn.
    #[serde(default = "d_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "d_reasoning_call_timeout_ms")]
    pub reasoning_call_timeout_ms: u64,
    /// Wall-clock budget for the whole turn.
    #[serde(default = "d_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// How many prior turns are replayed into the conversation.
    #[serde(default = "d_recent_turns")]
    pub recent_turns: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_rounds: d_max_rounds(),
            reasoning_call_timeout_ms: d_reasoning_call_timeout_ms(),
            turn_timeout_ms: d_turn_timeout_ms(),
            recent_turns: d_recent_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallConfig {
    #[serde(default = "d_tool_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "d_cache_ttl_sec")]
    pub cache_ttl_sec: u64,
}

impl Default for ToolCallConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: d_tool_call_timeout_ms(),
            cache_ttl_sec: d_cache_ttl_sec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Disables access filtering *and* token validation; every request runs
    /// as a synthetic admin.
    #[serde(default)]
    pub dev_mode: bool,
    /// Bypasses token validation but keeps access filtering; the context is
    /// built from the request body's user id with no roles.
    #[serde(default)]
    pub bypass_token: bool,
    /// Identity-provider tenant; required when tokens are validated.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Expected token audience; unchecked when absent.
    #[serde(default)]
    pub audience: Option<String>,
}

impl AuthConfig {
    /// True when bearer tokens must be validated against the identity
    /// provider.
    pub fn requires_token(&self) -> bool {
        !self.dev_mode && !self.bypass_token
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Chat-completions service base URL.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "d_deployment")]
    pub deployment: String,
    #[serde(default = "d_api_version")]
    pub api_version: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_reasoner_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_reasoner_temperature")]
    pub temperature: f32,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: d_deployment(),
            api_version: d_api_version(),
            api_key_env: d_api_key_env(),
            max_tokens: d_reasoner_max_tokens(),
            temperature: d_reasoner_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8000
}
fn d_discovery_timeout_ms() -> u64 {
    5_000
}
fn d_max_rounds() -> u32 {
    5
}
fn d_reasoning_call_timeout_ms() -> u64 {
    60_000
}
fn d_turn_timeout_ms() -> u64 {
    180_000
}
fn d_recent_turns() -> usize {
    3
}
fn d_tool_call_timeout_ms() -> u64 {
    30_000
}
fn d_cache_ttl_sec() -> u64 {
    300
}
fn d_deployment() -> String {
    "gpt-4o".into()
}
fn d_api_version() -> String {
    "2024-08-01-preview".into()
}
fn d_api_key_env() -> String {
    "REASONER_API_KEY".into()
}
fn d_reasoner_max_tokens() -> u32 {
    4_000
}
fn d_reasoner_temperature() -> f32 {
    0.1
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./state")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Load the configuration from the process environment, with an
    /// optional TOML base file underneath.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("MAESTRO_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new("config.toml").exists() => {
                Self::from_file(Path::new("config.toml"))?
            }
            Err(_) => Self::default(),
        };
        let config = base.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Overlay the recognized environment keys on top of this config.
    ///
    /// `get` is injected so tests can drive parsing without mutating the
    /// process environment.
    pub fn apply_env(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = get("PROVIDER_ENDPOINTS") {
            self.providers.endpoints = serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("PROVIDER_ENDPOINTS is not a JSON object of id → url: {e}"))
            })?;
        }
        if let Some(raw) = get("DISCOVERY_TIMEOUT_MS") {
            self.providers.discovery_timeout_ms = parse_num(&raw, "DISCOVERY_TIMEOUT_MS")?;
        }
        if let Some(raw) = get("MAX_ROUNDS") {
            self.planner.max_rounds = parse_num(&raw, "MAX_ROUNDS")?;
        }
        if let Some(raw) = get("REASONING_CALL_TIMEOUT_MS") {
            self.planner.reasoning_call_timeout_ms = parse_num(&raw, "REASONING_CALL_TIMEOUT_MS")?;
        }
        if let Some(raw) = get("TURN_TIMEOUT_MS") {
            self.planner.turn_timeout_ms = parse_num(&raw, "TURN_TIMEOUT_MS")?;
        }
        if let Some(raw) = get("RECENT_TURNS") {
            self.planner.recent_turns = parse_num(&raw, "RECENT_TURNS")?;
        }
        if let Some(raw) = get("TOOL_CALL_TIMEOUT_MS") {
            self.tools.call_timeout_ms = parse_num(&raw, "TOOL_CALL_TIMEOUT_MS")?;
        }
        if let Some(raw) = get("CACHE_TTL_SEC") {
            self.tools.cache_ttl_sec = parse_num(&raw, "CACHE_TTL_SEC")?;
        }
        if let Some(raw) = get("DEV_MODE") {
            self.auth.dev_mode = parse_bool(&raw, "DEV_MODE")?;
        }
        if let Some(raw) = get("BYPASS_TOKEN") {
            self.auth.bypass_token = parse_bool(&raw, "BYPASS_TOKEN")?;
        }
        if let Some(raw) = get("TENANT_ID") {
            self.auth.tenant_id = Some(raw);
        }
        if let Some(raw) = get("AUDIENCE") {
            self.auth.audience = Some(raw);
        }
        if let Some(raw) = get("REASONER_ENDPOINT") {
            self.reasoner.endpoint = raw;
        }
        if let Some(raw) = get("REASONER_DEPLOYMENT") {
            self.reasoner.deployment = raw;
        }
        if let Some(raw) = get("REASONER_API_VERSION") {
            self.reasoner.api_version = raw;
        }
        if let Some(raw) = get("REASONER_API_KEY_ENV") {
            self.reasoner.api_key_env = raw;
        }
        if let Some(raw) = get("REASONER_MAX_TOKENS") {
            self.reasoner.max_tokens = parse_num(&raw, "REASONER_MAX_TOKENS")?;
        }
        if let Some(raw) = get("REASONER_TEMPERATURE") {
            self.reasoner.temperature = raw
                .parse()
                .map_err(|_| Error::Config(format!("REASONER_TEMPERATURE: '{raw}' is not a number")))?;
        }
        if let Some(raw) = get("SERVER_HOST") {
            self.server.host = raw;
        }
        if let Some(raw) = get("SERVER_PORT") {
            self.server.port = parse_num(&raw, "SERVER_PORT")?;
        }
        if let Some(raw) = get("STATE_PATH") {
            self.store.state_path = PathBuf::from(raw);
        }
        Ok(self)
    }

    /// Check cross-field requirements. Called at startup; a failure here is
    /// fatal.
    pub fn validate(&self) -> Result<()> {
        if self.providers.endpoints.is_empty() {
            return Err(Error::Config(
                "PROVIDER_ENDPOINTS is required (JSON object mapping provider id → base URL)"
                    .into(),
            ));
        }
        for (id, url) in &self.providers.endpoints {
            if id.is_empty() || url.is_empty() {
                return Err(Error::Config(format!(
                    "PROVIDER_ENDPOINTS has an empty id or url (id='{id}', url='{url}')"
                )));
            }
        }
        if self.reasoner.endpoint.is_empty() {
            return Err(Error::Config("REASONER_ENDPOINT is required".into()));
        }
        if self.auth.requires_token() && self.auth.tenant_id.is_none() {
            return Err(Error::Config(
                "TENANT_ID is required unless DEV_MODE or BYPASS_TOKEN is enabled".into(),
            ));
        }
        if self.planner.max_rounds == 0 {
            return Err(Error::Config("MAX_ROUNDS must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key}: '{raw}' is not a valid number")))
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{key}: '{other}' is not a boolean"))),
    }
}
