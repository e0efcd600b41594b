//! Access filtering — projects the full catalog down to the tools one
//! caller may see and invoke.
//!
//! The filter only interprets roles. Row-scoping predicates inside the
//! access context are forwarded to tool servers untouched; enforcement is
//! the server's job.

use std::collections::HashMap;

use maestro_domain::access::AccessContext;
use maestro_domain::tool::ToolDefinition;

use crate::registry::{Catalog, ToolEntry};

/// The filtered set of tools visible to a particular caller.
///
/// Tool ordering is deterministic (alphabetical by name) so the reasoning
/// model sees an identical function list across warm starts.
#[derive(Debug, Clone, Default)]
pub struct ToolSurface {
    tools: Vec<ToolEntry>,
    routes: HashMap<String, String>,
}

/// Project the catalog for one caller.
///
/// A tool is visible iff dev mode is globally enabled, or the caller holds
/// the `admin` role, or the tool declares no `allowed_roles`, or the role
/// sets intersect.
pub fn visible_surface(catalog: &Catalog, ctx: &AccessContext, dev_mode: bool) -> ToolSurface {
    let mut tools = Vec::new();
    let mut routes = HashMap::new();

    // Catalog iteration is already name-ordered.
    for entry in catalog.tools() {
        if !is_visible(entry, ctx, dev_mode) {
            continue;
        }
        routes.insert(entry.spec.name.clone(), entry.provider_id.clone());
        tools.push(entry.clone());
    }

    ToolSurface { tools, routes }
}

fn is_visible(entry: &ToolEntry, ctx: &AccessContext, dev_mode: bool) -> bool {
    if dev_mode || ctx.is_admin() {
        return true;
    }
    if entry.spec.allowed_roles.is_empty() {
        return true;
    }
    entry
        .spec
        .allowed_roles
        .iter()
        .any(|role| ctx.has_role(role))
}

impl ToolSurface {
    pub fn get(&self, tool_name: &str) -> Option<&ToolEntry> {
        // The surface is small (tens of tools); linear scan keeps one copy
        // of each entry.
        self.tools.iter().find(|t| t.spec.name == tool_name)
    }

    /// Reverse lookup: which provider serves this tool.
    pub fn provider_for(&self, tool_name: &str) -> Option<&str> {
        self.routes.get(tool_name).map(String::as_str)
    }

    pub fn tools(&self) -> &[ToolEntry] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in the reasoning model's function-calling shape.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|entry| ToolDefinition {
                name: entry.spec.name.clone(),
                description: entry.spec.description.clone(),
                parameters: entry.spec.parameters.clone(),
            })
            .collect()
    }
}
