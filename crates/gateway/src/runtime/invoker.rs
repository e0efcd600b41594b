//! Tool invoker — executes exactly one tool call against one provider.
//!
//! Responsibilities per call: check the name against the caller's filtered
//! surface, validate arguments against the tool's parameter schema, consult
//! the scope-aware result cache (single-flight on cold keys), dispatch with
//! a timeout and bounded retries on transport failures, and hand back a
//! lineage record whatever the outcome. Tool-level errors are never
//! retried; they flow back to the reasoning model so it can adapt.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};

use maestro_domain::access::AccessContext;
use maestro_domain::error::Error;
use maestro_domain::hash;
use maestro_domain::lineage::{summarize, CallOutcome, LineageRecord};
use maestro_domain::tool::ToolCall;
use maestro_sessions::cache_key;
use maestro_tool_client::{ClientError, ToolSurface};

use crate::state::AppState;

/// Additional attempts after the first failed dispatch.
const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 4_000;
/// Result preview length on lineage records.
const SUMMARY_MAX: usize = 200;

/// Execute one tool call and record its lineage.
///
/// `step` is the 1-based position of this call within the turn.
pub async fn invoke_tool(
    state: &AppState,
    surface: &ToolSurface,
    call: &ToolCall,
    ctx: &AccessContext,
    step: u32,
) -> LineageRecord {
    let started = Instant::now();

    // ── Surface check ─────────────────────────────────────────────
    let entry = match surface.get(&call.tool_name) {
        Some(entry) => entry,
        None => {
            tracing::warn!(tool_name = %call.tool_name, "tool not in caller's surface");
            return failure_record(
                step,
                call,
                None,
                &Error::UnknownTool(call.tool_name.clone()),
                started,
            );
        }
    };
    let provider_id = entry.provider_id.clone();

    // ── Argument validation ───────────────────────────────────────
    if let Err(message) = validate_arguments(&entry.spec.parameters, &call.arguments) {
        tracing::warn!(
            tool_name = %call.tool_name,
            error = %message,
            "tool arguments failed schema validation, not dispatching"
        );
        return failure_record(
            step,
            call,
            Some(provider_id),
            &Error::InvalidArguments {
                tool: call.tool_name.clone(),
                message,
            },
            started,
        );
    }

    // ── Outbound arguments: inject the access context ─────────────
    let mut outbound = if call.arguments.is_object() {
        call.arguments.clone()
    } else {
        Value::Object(Default::default())
    };
    outbound["access_context"] = ctx.to_wire();

    // ── Cache (single-flight per key) ─────────────────────────────
    let key = cache_key(
        &provider_id,
        &call.tool_name,
        &hash::hash_value(&call.arguments),
        &ctx.scope_hash(),
    );
    let _flight = state.cache.lock_key(&key).await;

    if let Some((value, age)) = state.cache.get(&key) {
        tracing::debug!(
            tool_name = %call.tool_name,
            provider_id = %provider_id,
            age_ms = age.as_millis() as u64,
            "cache hit"
        );
        return LineageRecord {
            step,
            tool_call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            provider_id: Some(provider_id),
            arguments: call.arguments.clone(),
            summary: summarize(&value, SUMMARY_MAX),
            result: value,
            outcome: CallOutcome::Cached,
            error_kind: None,
            timestamp: Utc::now(),
            duration_ms: elapsed_ms(started),
        };
    }

    // ── Dispatch with retry ───────────────────────────────────────
    let server = match state.registry.server(&provider_id) {
        Some(server) => server,
        None => {
            // Catalog and server map can only disagree if the config
            // changed underneath us; treat it as a transport failure.
            return failure_record(
                step,
                call,
                Some(provider_id.clone()),
                &Error::Transport {
                    provider: provider_id.clone(),
                    message: "no client for provider".into(),
                },
                started,
            );
        }
    };

    let timeout = Duration::from_millis(state.config.tools.call_timeout_ms);
    let ttl = Duration::from_secs(state.config.tools.cache_ttl_sec);
    let mut attempt: u32 = 0;

    loop {
        match server
            .call_tool(&call.tool_name, outbound.clone(), timeout)
            .await
        {
            Ok(value) => {
                state.cache.put(key.clone(), value.clone(), ttl);
                tracing::info!(
                    tool_name = %call.tool_name,
                    provider_id = %provider_id,
                    duration_ms = elapsed_ms(started),
                    "tool call complete"
                );
                return LineageRecord {
                    step,
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    provider_id: Some(provider_id),
                    arguments: call.arguments.clone(),
                    summary: summarize(&value, SUMMARY_MAX),
                    result: value,
                    outcome: CallOutcome::Success,
                    error_kind: None,
                    timestamp: Utc::now(),
                    duration_ms: elapsed_ms(started),
                };
            }
            Err(ClientError::Tool { message, kind }) => {
                // Structured failure from the tool itself: surfaced to the
                // model verbatim, never retried, never cached.
                tracing::warn!(
                    tool_name = %call.tool_name,
                    provider_id = %provider_id,
                    error = %message,
                    "tool returned an error payload"
                );
                let domain_err = Error::Tool {
                    provider: provider_id.clone(),
                    message: message.clone(),
                };
                let mut result = json!({ "success": false, "error": message });
                if let Some(kind) = kind {
                    result["kind"] = Value::String(kind);
                }
                return LineageRecord {
                    step,
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    provider_id: Some(provider_id),
                    arguments: call.arguments.clone(),
                    summary: summarize(&result, SUMMARY_MAX),
                    result,
                    outcome: CallOutcome::Error,
                    error_kind: Some(domain_err.kind().into()),
                    timestamp: Utc::now(),
                    duration_ms: elapsed_ms(started),
                };
            }
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let backoff = BACKOFF_BASE_MS.saturating_mul(1 << attempt).min(BACKOFF_CAP_MS);
                tracing::warn!(
                    tool_name = %call.tool_name,
                    provider_id = %provider_id,
                    attempt = attempt + 1,
                    backoff_ms = backoff,
                    error = %e,
                    "transport failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    tool_name = %call.tool_name,
                    provider_id = %provider_id,
                    attempts = attempt + 1,
                    error = %e,
                    "tool call failed"
                );
                return failure_record(
                    step,
                    call,
                    Some(provider_id.clone()),
                    &Error::Transport {
                        provider: provider_id,
                        message: e.to_string(),
                    },
                    started,
                );
            }
        }
    }
}

/// Validate arguments against the tool's JSON-Schema parameters.
///
/// A schema that fails to compile is a provider defect, not a caller
/// error: it is logged and the call proceeds unvalidated.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let validator = match jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
    {
        Ok(validator) => validator,
        Err(e) => {
            tracing::warn!(error = %e, "tool parameter schema does not compile, skipping validation");
            return Ok(());
        }
    };
    validator
        .validate(arguments)
        .map_err(|e| format!("arguments do not match the tool schema: {e}"))
}

fn failure_record(
    step: u32,
    call: &ToolCall,
    provider_id: Option<String>,
    error: &Error,
    started: Instant,
) -> LineageRecord {
    let result = json!({ "success": false, "error": error.to_string() });
    LineageRecord {
        step,
        tool_call_id: call.call_id.clone(),
        tool_name: call.tool_name.clone(),
        provider_id,
        arguments: call.arguments.clone(),
        summary: summarize(&result, SUMMARY_MAX),
        result,
        outcome: CallOutcome::Error,
        error_kind: Some(error.kind().into()),
        timestamp: Utc::now(),
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_arguments_pass() {
        let schema = json!({
            "type": "object",
            "properties": { "x": { "type": "string" } },
            "required": ["x"]
        });
        validate_arguments(&schema, &json!({"x": "foo"})).unwrap();
    }

    #[test]
    fn missing_required_field_fails() {
        let schema = json!({
            "type": "object",
            "properties": { "x": { "type": "string" } },
            "required": ["x"]
        });
        let err = validate_arguments(&schema, &json!({})).unwrap_err();
        assert!(err.contains("do not match"));
    }

    #[test]
    fn wrong_type_fails() {
        let schema = json!({
            "type": "object",
            "properties": { "limit": { "type": "integer" } }
        });
        assert!(validate_arguments(&schema, &json!({"limit": "ten"})).is_err());
        validate_arguments(&schema, &json!({"limit": 10})).unwrap();
    }

    #[test]
    fn uncompilable_schema_skips_validation() {
        // "type" must be a string or array of strings; 42 cannot compile.
        let schema = json!({"type": 42});
        validate_arguments(&schema, &json!({"anything": true})).unwrap();
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let delays: Vec<u64> = (0..4)
            .map(|attempt| BACKOFF_BASE_MS.saturating_mul(1 << attempt).min(BACKOFF_CAP_MS))
            .collect();
        assert_eq!(delays, [500, 1000, 2000, 4000]);
    }
}
