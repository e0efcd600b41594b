//! The planning loop — drives the multi-round conversation with the
//! reasoning model until it produces a plain answer, fails, or hits the
//! round cap.
//!
//! Within a round, tool calls are dispatched concurrently and their
//! results are threaded back in `call_id` order, so the conversation
//! prefix (and the lineage) is identical regardless of completion order.

use std::time::{Duration, Instant};

use maestro_domain::access::AccessContext;
use maestro_domain::error::{Error, Result};
use maestro_domain::lineage::{CallOutcome, ExecutionMetadata};
use maestro_domain::tool::Message;
use maestro_reasoner::ChatRequest;
use maestro_tool_client::filter::visible_surface;

use super::cancel::CancelToken;
use super::invoker::invoke_tool;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TRUNCATION_MESSAGE: &str =
    "I wasn't able to complete your request within the allowed planning rounds.";
const FAILURE_MESSAGE: &str = "An error occurred while processing your request.";
const NO_TOOLS_MESSAGE: &str = "I don't have access to any tools to answer your question.";

const PLANNER_SYSTEM_PROMPT: &str = "\
You are a planning assistant that answers questions by calling the tools \
available to you. Call tools whenever you need data; independent calls may \
be requested together in one round. When you have enough information, \
answer the user directly and concisely. If a tool reports an error, try a \
different tool or explain what went wrong.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
pub struct TurnInput {
    pub session_id: String,
    pub user_message: String,
    pub context: AccessContext,
}

/// The materialized result of a turn.
pub struct TurnOutcome {
    pub response: String,
    pub success: bool,
    pub metadata: ExecutionMetadata,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn: build the conversation and tool surface, then loop
/// plan → execute until the model answers, something fails, or the round
/// cap is hit.
///
/// Returns `Err(Error::Cancelled)` when the turn was cancelled; the
/// caller discards it without writing to the session store. Every other
/// termination produces a `TurnOutcome` whose lineage is preserved.
pub async fn run_turn(
    state: &AppState,
    input: &TurnInput,
    cancel: &CancelToken,
) -> Result<TurnOutcome> {
    let started = Instant::now();
    let deadline = started + Duration::from_millis(state.config.planner.turn_timeout_ms);
    let mut meta = ExecutionMetadata::default();

    // ── Tool surface for this caller ──────────────────────────────
    let catalog = state.registry.surface();
    let surface = visible_surface(&catalog, &input.context, state.config.auth.dev_mode);

    if surface.is_empty() {
        tracing::warn!(user_id = %input.context.user_id, "no tools visible to caller");
        return Ok(finish(NO_TOOLS_MESSAGE, false, meta, started));
    }
    let tool_defs = surface.definitions();

    // ── Conversation: system prompt + recent history + user input ─
    let mut messages = vec![Message::system(PLANNER_SYSTEM_PROMPT)];
    if let Some(session) = state
        .store
        .load_session(&input.context.user_id, &input.session_id)
    {
        let skip = session
            .turns
            .len()
            .saturating_sub(state.config.planner.recent_turns);
        for turn in &session.turns[skip..] {
            messages.push(Message::user(&turn.user_message.content));
            messages.push(Message::assistant(&turn.assistant_message.content));
        }
    }
    messages.push(Message::user(&input.user_message));

    // ── Plan/execute rounds ───────────────────────────────────────
    let max_rounds = state.config.planner.max_rounds;
    let reasoning_timeout = Duration::from_millis(state.config.planner.reasoning_call_timeout_ms);
    let mut step: u32 = 0;

    for round in 1..=max_rounds {
        meta.rounds = round;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if Instant::now() >= deadline {
            tracing::error!(round, "turn wall-clock budget exhausted");
            return Ok(finish(FAILURE_MESSAGE, false, meta, started));
        }

        tracing::debug!(round, max_rounds, "planning round start");
        let request = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: None,
            max_tokens: None,
            model: None,
        };

        let response = match tokio::time::timeout(reasoning_timeout, state.reasoner.chat(&request))
            .await
        {
            Err(_) => {
                tracing::error!(round, "reasoning model call timed out");
                return Ok(finish(FAILURE_MESSAGE, false, meta, started));
            }
            Ok(Err(e)) => {
                tracing::error!(round, error = %e, "reasoning model call failed");
                return Ok(finish(FAILURE_MESSAGE, false, meta, started));
            }
            Ok(Ok(response)) => response,
        };

        // Plain answer: the turn is done. The terminating invocation does
        // not count as a round of its own; `rounds` reports how many
        // rounds executed tools, floored at one for direct answers.
        if response.tool_calls.is_empty() {
            meta.rounds = (round - 1).max(1);
            tracing::info!(rounds = meta.rounds, "planning complete");
            return Ok(finish(&response.content, true, meta, started));
        }

        // ── Execute the round's tool calls concurrently ───────────
        // Canonical ordering: everything downstream (conversation,
        // lineage steps) follows the model's call ids, not completion
        // order.
        let mut calls = response.tool_calls.clone();
        calls.sort_by(|a, b| a.call_id.cmp(&b.call_id));

        messages.push(Message::assistant_with_calls(&response.content, &calls));

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if Instant::now() >= deadline {
            tracing::error!(round, "turn wall-clock budget exhausted before dispatch");
            return Ok(finish(FAILURE_MESSAGE, false, meta, started));
        }

        tracing::info!(
            round,
            tool_count = calls.len(),
            tools = ?calls.iter().map(|c| c.tool_name.as_str()).collect::<Vec<_>>(),
            "executing tools"
        );

        let dispatches = calls
            .iter()
            .enumerate()
            .map(|(i, call)| invoke_tool(state, &surface, call, &input.context, step + i as u32 + 1));
        let records = futures_util::future::join_all(dispatches).await;
        step += records.len() as u32;

        for (call, record) in calls.iter().zip(records) {
            if let Some(provider_id) = &record.provider_id {
                meta.providers_used.insert(provider_id.clone());
            }
            let is_error = record.outcome == CallOutcome::Error;
            messages.push(Message::tool_result(
                &call.call_id,
                record.result.to_string(),
                is_error,
            ));
            meta.lineage.push(record);
        }
    }

    // Round cap reached with the model still asking for tools.
    tracing::warn!(max_rounds, "round cap reached, truncating turn");
    Ok(finish(TRUNCATION_MESSAGE, false, meta, started))
}

fn finish(
    response: &str,
    success: bool,
    mut meta: ExecutionMetadata,
    started: Instant,
) -> TurnOutcome {
    meta.success = success;
    meta.execution_time_ms = started.elapsed().as_millis() as u64;
    TurnOutcome {
        response: response.to_string(),
        success,
        metadata: meta,
    }
}
