//! Tool-server transport.
//!
//! Each provider is modeled as a value implementing the narrow
//! [`ToolServer`] capability set — the registry holds these as a
//! homogeneous collection keyed by provider id. Production uses the HTTP
//! implementation; tests substitute scripted in-memory servers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{CallToolResponse, ListToolsResponse, RpcRequest, ToolSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors from a single RPC exchange with a tool server.
///
/// Transport-level failures (connect, timeout, 5xx) are eligible for retry;
/// a structured [`ClientError::Tool`] came from the tool itself and is
/// surfaced to the reasoning model verbatim instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection: {0}")]
    Connect(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("decode: {0}")]
    Decode(String),

    #[error("tool error: {message}")]
    Tool {
        message: String,
        kind: Option<String>,
    },
}

impl ClientError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_) | ClientError::Timeout(_) | ClientError::Status(500..=599)
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The capability set every tool provider exposes.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn id(&self) -> &str;

    fn base_url(&self) -> &str;

    /// Discover the tools this server offers.
    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolSpec>, ClientError>;

    /// Invoke one tool. `arguments` already carries the access context.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP tool-server client: one per configured provider.
pub struct HttpToolServer {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpToolServer {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, req: &RpcRequest, timeout: Duration) -> Result<Value, ClientError> {
        let response = self
            .client
            .post(&self.base_url)
            .json(req)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Map a reqwest failure to the transport taxonomy.
fn classify(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(e.to_string())
    } else {
        ClientError::Connect(e.to_string())
    }
}

#[async_trait]
impl ToolServer for HttpToolServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolSpec>, ClientError> {
        let raw = self.post(&RpcRequest::list_tools(), timeout).await?;
        let parsed: ListToolsResponse =
            serde_json::from_value(raw).map_err(|e| ClientError::Decode(e.to_string()))?;

        // Minimal schema validation: a tool without a name is unusable.
        let mut tools = Vec::with_capacity(parsed.tools.len());
        for spec in parsed.tools {
            if spec.name.is_empty() {
                tracing::warn!(
                    provider_id = %self.id,
                    "tool with empty name in tools/list response, skipping"
                );
                continue;
            }
            tools.push(spec);
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let raw = self
            .post(&RpcRequest::call_tool(name, arguments), timeout)
            .await?;
        let parsed: CallToolResponse =
            serde_json::from_value(raw).map_err(|e| ClientError::Decode(e.to_string()))?;
        parsed.into_result().map_err(|fault| ClientError::Tool {
            message: fault.message,
            kind: fault.kind,
        })
    }
}
