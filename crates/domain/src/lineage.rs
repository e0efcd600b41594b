//! Execution lineage — the auditable record of every tool call made while
//! answering a turn.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a single tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Success,
    Error,
    Cached,
}

/// One completed tool call.
///
/// `arguments` holds what the reasoning model sent, before the orchestrator
/// injected the access context: the audit trail shows the model's intent,
/// not the enriched wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageRecord {
    /// 1-based position within the turn.
    pub step: u32,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Absent when the call never routed (unknown tool).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub arguments: Value,
    /// Truncated preview of the result, for listings.
    pub summary: String,
    /// Full result payload (or the error payload threaded back to the model).
    pub result: Value,
    pub outcome: CallOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Metadata frozen into a turn when the planning loop terminates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub rounds: u32,
    /// Providers that served at least one call this turn (sorted set).
    pub providers_used: BTreeSet<String>,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub lineage: Vec<LineageRecord>,
}

/// Compact single-line preview of a JSON value, capped at `max` characters.
pub fn summarize(value: &Value, max: usize) -> String {
    let text = value.to_string();
    if text.chars().count() <= max {
        text
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{truncated}…")
    }
}
