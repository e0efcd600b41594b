//! Provider registry — discovers tool servers and maintains the in-memory
//! catalog of their schemas.
//!
//! The catalog is immutable once published: discovery builds a fresh
//! [`Catalog`] off to the side and swaps it in behind an `Arc`, so readers
//! never block on a refresh. Providers that fail a probe are recorded as
//! unhealthy and omitted from the surface; they stay configured and can
//! come back on the next refresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::client::{HttpToolServer, ToolServer};
use crate::protocol::ToolSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool schema together with the provider that serves it.
#[derive(Debug, Clone, Serialize)]
pub struct ToolEntry {
    pub provider_id: String,
    pub spec: ToolSpec,
}

/// Declared health of one configured provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub id: String,
    pub base_url: String,
    pub healthy: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// An immutable snapshot of every discovered tool, indexed by name.
#[derive(Debug, Default)]
pub struct Catalog {
    tools: BTreeMap<String, ToolEntry>,
    providers: BTreeMap<String, ProviderHealth>,
}

pub(crate) struct ProbeResult {
    pub id: String,
    pub base_url: String,
    pub outcome: Result<Vec<ToolSpec>, String>,
}

impl Catalog {
    /// Assemble a catalog from per-provider probe results.
    ///
    /// Results are processed in provider-id order; when two providers
    /// declare the same tool name the first insertion wins and the
    /// collision is logged.
    pub(crate) fn from_probes(mut probes: Vec<ProbeResult>) -> Self {
        probes.sort_by(|a, b| a.id.cmp(&b.id));

        let checked_at = Utc::now();
        let mut tools: BTreeMap<String, ToolEntry> = BTreeMap::new();
        let mut providers = BTreeMap::new();

        for probe in probes {
            match probe.outcome {
                Ok(specs) => {
                    let mut kept = 0;
                    for spec in specs {
                        if let Some(existing) = tools.get(&spec.name) {
                            tracing::warn!(
                                tool_name = %spec.name,
                                kept_provider = %existing.provider_id,
                                dropped_provider = %probe.id,
                                "tool name collision, later provider loses"
                            );
                            continue;
                        }
                        kept += 1;
                        tools.insert(
                            spec.name.clone(),
                            ToolEntry {
                                provider_id: probe.id.clone(),
                                spec,
                            },
                        );
                    }
                    providers.insert(
                        probe.id.clone(),
                        ProviderHealth {
                            id: probe.id,
                            base_url: probe.base_url,
                            healthy: true,
                            tool_count: kept,
                            last_error: None,
                            checked_at,
                        },
                    );
                }
                Err(message) => {
                    tracing::warn!(
                        provider_id = %probe.id,
                        error = %message,
                        "provider failed discovery probe, omitting from surface"
                    );
                    providers.insert(
                        probe.id.clone(),
                        ProviderHealth {
                            id: probe.id,
                            base_url: probe.base_url,
                            healthy: false,
                            tool_count: 0,
                            last_error: Some(message),
                            checked_at,
                        },
                    );
                }
            }
        }

        Self { tools, providers }
    }

    pub fn get(&self, tool_name: &str) -> Option<&ToolEntry> {
        self.tools.get(tool_name)
    }

    /// All tools, in name order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolEntry> {
        self.tools.values()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn providers(&self) -> Vec<ProviderHealth> {
        self.providers.values().cloned().collect()
    }

    pub fn healthy_provider_count(&self) -> usize {
        self.providers.values().filter(|p| p.healthy).count()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the configured tool servers and the published catalog.
pub struct ToolRegistry {
    servers: BTreeMap<String, Arc<dyn ToolServer>>,
    catalog: RwLock<Arc<Catalog>>,
    probe_timeout: Duration,
}

impl ToolRegistry {
    /// Build the registry from the configured id → base-URL map.
    pub fn from_endpoints(endpoints: &BTreeMap<String, String>, probe_timeout: Duration) -> Self {
        let servers = endpoints
            .iter()
            .map(|(id, url)| {
                let server: Arc<dyn ToolServer> = Arc::new(HttpToolServer::new(id, url));
                (id.clone(), server)
            })
            .collect();
        Self {
            servers,
            catalog: RwLock::new(Arc::new(Catalog::default())),
            probe_timeout,
        }
    }

    /// Build the registry from pre-constructed servers (tests inject
    /// scripted implementations here).
    pub fn with_servers(servers: Vec<Arc<dyn ToolServer>>, probe_timeout: Duration) -> Self {
        let servers = servers
            .into_iter()
            .map(|s| (s.id().to_owned(), s))
            .collect();
        Self {
            servers,
            catalog: RwLock::new(Arc::new(Catalog::default())),
            probe_timeout,
        }
    }

    async fn probe_all(&self) -> Vec<ProbeResult> {
        let probes = self.servers.values().map(|server| {
            let server = server.clone();
            let timeout = self.probe_timeout;
            async move {
                let outcome = server
                    .list_tools(timeout)
                    .await
                    .map_err(|e| e.to_string());
                ProbeResult {
                    id: server.id().to_owned(),
                    base_url: server.base_url().to_owned(),
                    outcome,
                }
            }
        });
        futures_util::future::join_all(probes).await
    }

    /// Probe every configured provider in parallel and publish the result.
    ///
    /// Individual provider failures are warnings, not fatal: the catalog is
    /// published regardless. Called once at startup.
    pub async fn load_all(&self) {
        let catalog = Catalog::from_probes(self.probe_all().await);
        tracing::info!(
            providers = self.servers.len(),
            healthy = catalog.healthy_provider_count(),
            tools = catalog.tool_count(),
            "tool catalog loaded"
        );
        *self.catalog.write() = Arc::new(catalog);
    }

    /// Re-probe all providers and swap in the new catalog, but only if at
    /// least one provider responded. On total failure the previous catalog
    /// is retained. Returns whether a new catalog was published.
    pub async fn refresh(&self) -> bool {
        let catalog = Catalog::from_probes(self.probe_all().await);
        if catalog.healthy_provider_count() == 0 {
            tracing::warn!("refresh failed for every provider, keeping previous catalog");
            return false;
        }
        tracing::info!(
            healthy = catalog.healthy_provider_count(),
            tools = catalog.tool_count(),
            "tool catalog refreshed"
        );
        *self.catalog.write() = Arc::new(catalog);
        true
    }

    /// Immutable snapshot of the current catalog.
    pub fn surface(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    pub fn server(&self, provider_id: &str) -> Option<Arc<dyn ToolServer>> {
        self.servers.get(provider_id).cloned()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
