//! End-to-end turn-flow tests: real registry, cache, store, and planning
//! loop, with scripted reasoning-model and tool-server implementations at
//! the edges.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use maestro_domain::access::AccessContext;
use maestro_domain::config::Config;
use maestro_domain::error::{Error, Result};
use maestro_domain::lineage::CallOutcome;
use maestro_domain::tool::ToolCall;
use maestro_gateway::runtime::cancel::{CancelMap, CancelToken};
use maestro_gateway::runtime::session_lock::SessionLockMap;
use maestro_gateway::runtime::{run_turn, TurnInput};
use maestro_gateway::state::AppState;
use maestro_reasoner::{ChatRequest, ChatResponse, ReasoningProvider};
use maestro_sessions::{SessionStore, ToolCache};
use maestro_tool_client::protocol::ToolSpec;
use maestro_tool_client::{ClientError, ToolRegistry, ToolServer};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Handler = Box<dyn Fn(&str, &Value) -> std::result::Result<Value, ClientError> + Send + Sync>;

struct MockToolServer {
    id: String,
    tools: Vec<ToolSpec>,
    handler: Handler,
    calls: AtomicUsize,
}

impl MockToolServer {
    fn new(id: &str, tools: Vec<ToolSpec>, handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            tools,
            handler,
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for MockToolServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_url(&self) -> &str {
        "http://mock/rpc"
    }

    async fn list_tools(&self, _timeout: Duration) -> std::result::Result<Vec<ToolSpec>, ClientError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        _timeout: Duration,
    ) -> std::result::Result<Value, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Every outbound call must carry the injected access context.
        assert!(
            arguments.get("access_context").is_some(),
            "outbound arguments missing access_context"
        );
        (self.handler)(name, &arguments)
    }
}

struct ScriptedReasoner {
    script: Mutex<VecDeque<ChatResponse>>,
}

impl ScriptedReasoner {
    fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedReasoner {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Reasoning("script exhausted".into()))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ── Response builders ───────────────────────────────────────────────

fn final_answer(text: &str) -> ChatResponse {
    ChatResponse {
        content: text.into(),
        tool_calls: Vec::new(),
        model: "scripted".into(),
        finish_reason: Some("stop".into()),
        usage: None,
    }
}

fn tool_round(calls: Vec<(&str, &str, Value)>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCall {
                call_id: id.into(),
                tool_name: name.into(),
                arguments,
            })
            .collect(),
        model: "scripted".into(),
        finish_reason: Some("tool_calls".into()),
        usage: None,
    }
}

fn spec(name: &str, roles: &[&str]) -> ToolSpec {
    ToolSpec {
        name: name.into(),
        description: format!("{name} tool"),
        parameters: json!({
            "type": "object",
            "properties": { "x": { "type": "string" } }
        }),
        allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
        metadata: None,
    }
}

// ── State assembly ──────────────────────────────────────────────────

async fn test_state(
    servers: Vec<Arc<MockToolServer>>,
    reasoner: Arc<ScriptedReasoner>,
    max_rounds: u32,
) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.planner.max_rounds = max_rounds;
    config.store.state_path = dir.path().to_path_buf();

    let registry = ToolRegistry::with_servers(
        servers
            .into_iter()
            .map(|s| s as Arc<dyn ToolServer>)
            .collect(),
        Duration::from_millis(200),
    );
    registry.load_all().await;

    let state = AppState {
        config: Arc::new(config),
        registry: Arc::new(registry),
        reasoner,
        store: Arc::new(SessionStore::new(dir.path()).unwrap()),
        cache: Arc::new(ToolCache::new()),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        verifier: None,
    };
    (state, dir)
}

fn input(session_id: &str, message: &str, roles: &[&str]) -> TurnInput {
    TurnInput {
        session_id: session_id.into(),
        user_message: message.into(),
        context: AccessContext::new("u1", roles.iter().map(|r| r.to_string()).collect()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_tool_single_round() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("lookup", &["user"])],
        Box::new(|_, _| Ok(json!({"value": 42}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "lookup", json!({"x": "foo"}))]),
        final_answer("Answer: 42"),
    ]);
    let (state, _dir) = test_state(vec![alpha.clone()], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "look up foo", &["user"]), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.response, "Answer: 42");
    assert_eq!(outcome.metadata.rounds, 1);
    assert_eq!(outcome.metadata.lineage.len(), 1);

    let record = &outcome.metadata.lineage[0];
    assert_eq!(record.step, 1);
    assert_eq!(record.tool_name, "lookup");
    assert_eq!(record.provider_id.as_deref(), Some("alpha"));
    assert_eq!(record.outcome, CallOutcome::Success);
    assert_eq!(record.result["value"], 42);
    // Lineage records the model's arguments, not the enriched payload.
    assert!(record.arguments.get("access_context").is_none());

    let providers: Vec<&String> = outcome.metadata.providers_used.iter().collect();
    assert_eq!(providers, ["alpha"]);
    assert_eq!(alpha.call_count(), 1);
}

#[tokio::test]
async fn repeat_turn_hits_cache() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("lookup", &["user"])],
        Box::new(|_, _| Ok(json!({"value": 42}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "lookup", json!({"x": "foo"}))]),
        final_answer("Answer: 42"),
        tool_round(vec![("t1", "lookup", json!({"x": "foo"}))]),
        final_answer("Answer: 42"),
    ]);
    let (state, _dir) = test_state(vec![alpha.clone()], reasoner, 5).await;

    let first = run_turn(&state, &input("s1", "look up foo", &["user"]), &CancelToken::new())
        .await
        .unwrap();
    let second = run_turn(&state, &input("s1", "look up foo", &["user"]), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(first.metadata.lineage[0].outcome, CallOutcome::Success);
    assert_eq!(second.metadata.lineage[0].outcome, CallOutcome::Cached);
    assert_eq!(second.response, "Answer: 42");
    assert_eq!(second.metadata.lineage[0].result["value"], 42);
    // No second outbound dispatch.
    assert_eq!(alpha.call_count(), 1);
}

#[tokio::test]
async fn different_scopes_do_not_share_cache() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("lookup", &[])],
        Box::new(|_, _| Ok(json!({"value": 42}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "lookup", json!({"x": "foo"}))]),
        final_answer("done"),
        tool_round(vec![("t1", "lookup", json!({"x": "foo"}))]),
        final_answer("done"),
    ]);
    let (state, _dir) = test_state(vec![alpha.clone()], reasoner, 5).await;

    let first = TurnInput {
        session_id: "s1".into(),
        user_message: "q".into(),
        context: AccessContext::new("u1", vec![]),
    };
    let second = TurnInput {
        session_id: "s2".into(),
        user_message: "q".into(),
        context: AccessContext::new("u2", vec![]),
    };

    run_turn(&state, &first, &CancelToken::new()).await.unwrap();
    let outcome = run_turn(&state, &second, &CancelToken::new()).await.unwrap();

    // Different user → different scope hash → cold key → real dispatch.
    assert_eq!(outcome.metadata.lineage[0].outcome, CallOutcome::Success);
    assert_eq!(alpha.call_count(), 2);
}

#[tokio::test]
async fn parallel_fan_out_orders_by_call_id() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("a", &[])],
        Box::new(|_, _| {
            // Slowest call finishes last, yet t1 must come first.
            std::thread::sleep(Duration::from_millis(30));
            Ok(json!({"from": "a"}))
        }),
    );
    let beta = MockToolServer::new(
        "beta",
        vec![spec("b", &[])],
        Box::new(|_, _| Ok(json!({"from": "b"}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        // Delivered out of order on purpose.
        tool_round(vec![
            ("t2", "b", json!({})),
            ("t1", "a", json!({})),
        ]),
        final_answer("combined"),
    ]);
    let (state, _dir) = test_state(vec![alpha, beta], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "fan out", &[]), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.metadata.lineage.len(), 2);
    // Canonical ordering by call id, not arrival or completion order.
    assert_eq!(outcome.metadata.lineage[0].tool_call_id, "t1");
    assert_eq!(outcome.metadata.lineage[0].tool_name, "a");
    assert_eq!(outcome.metadata.lineage[0].step, 1);
    assert_eq!(outcome.metadata.lineage[1].tool_call_id, "t2");
    assert_eq!(outcome.metadata.lineage[1].step, 2);

    let providers: Vec<&String> = outcome.metadata.providers_used.iter().collect();
    assert_eq!(providers, ["alpha", "beta"]);
}

#[tokio::test]
async fn tool_error_is_threaded_back_for_recovery() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("a", &[])],
        Box::new(|_, _| {
            Err(ClientError::Tool {
                message: "bad".into(),
                kind: None,
            })
        }),
    );
    let beta = MockToolServer::new(
        "beta",
        vec![spec("b", &[])],
        Box::new(|_, _| Ok(json!({"ok": true}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "a", json!({}))]),
        tool_round(vec![("t2", "b", json!({}))]),
        final_answer("recovered"),
    ]);
    let (state, _dir) = test_state(vec![alpha.clone(), beta], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "try a then b", &[]), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.response, "recovered");
    assert_eq!(outcome.metadata.rounds, 2);
    assert_eq!(outcome.metadata.lineage.len(), 2);
    assert_eq!(outcome.metadata.lineage[0].outcome, CallOutcome::Error);
    assert_eq!(
        outcome.metadata.lineage[0].error_kind.as_deref(),
        Some("tool_error")
    );
    assert_eq!(outcome.metadata.lineage[1].outcome, CallOutcome::Success);
    // Tool-level errors are not retried.
    assert_eq!(alpha.call_count(), 1);
}

#[tokio::test]
async fn round_cap_truncates_after_recording_results() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("a", &[])],
        Box::new(|_, _| Ok(json!({"ok": true}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "a", json!({}))]),
        tool_round(vec![("t2", "a", json!({"x": "again"}))]),
        // Would request more, but the cap stops the loop first.
        tool_round(vec![("t3", "a", json!({"x": "never"}))]),
    ]);
    let (state, _dir) = test_state(vec![alpha], reasoner, 2).await;

    let outcome = run_turn(&state, &input("s1", "loop forever", &[]), &CancelToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.metadata.rounds, 2);
    assert!(outcome.response.contains("planning rounds"));
    // Both executed rounds are fully recorded.
    assert_eq!(outcome.metadata.lineage.len(), 2);
    assert_eq!(outcome.metadata.lineage[1].tool_call_id, "t2");
}

#[tokio::test]
async fn hidden_tool_fails_without_dispatch() {
    let secret = MockToolServer::new(
        "secret",
        vec![spec("s", &["admin"])],
        Box::new(|_, _| Ok(json!({"classified": true}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        // Misbehaving model asks for a tool outside its surface.
        tool_round(vec![("t1", "s", json!({}))]),
        final_answer("cannot do that"),
    ]);
    let (state, _dir) = test_state(vec![secret.clone()], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "read the secrets", &["user"]), &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    let record = &outcome.metadata.lineage[0];
    assert_eq!(record.outcome, CallOutcome::Error);
    assert_eq!(record.error_kind.as_deref(), Some("unknown_tool"));
    assert!(record.provider_id.is_none());
    // Never dispatched.
    assert_eq!(secret.call_count(), 0);
    assert!(outcome.metadata.providers_used.is_empty());
}

#[tokio::test]
async fn invalid_arguments_are_not_dispatched() {
    // x must be a string; the model sends a number.
    let strict_spec = ToolSpec {
        name: "strict".into(),
        description: "strict tool".into(),
        parameters: json!({
            "type": "object",
            "properties": { "x": { "type": "string" } },
            "required": ["x"]
        }),
        allowed_roles: Vec::new(),
        metadata: None,
    };
    let alpha = MockToolServer::new(
        "alpha",
        vec![strict_spec],
        Box::new(|_, _| Ok(json!({"ok": true}))),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "strict", json!({"x": 7}))]),
        final_answer("gave up"),
    ]);
    let (state, _dir) = test_state(vec![alpha.clone()], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "call strict", &[]), &CancelToken::new())
        .await
        .unwrap();

    let record = &outcome.metadata.lineage[0];
    assert_eq!(record.outcome, CallOutcome::Error);
    assert_eq!(record.error_kind.as_deref(), Some("invalid_arguments"));
    assert_eq!(alpha.call_count(), 0);
}

#[tokio::test]
async fn empty_surface_short_circuits() {
    let reasoner = ScriptedReasoner::new(vec![]);
    let (state, _dir) = test_state(vec![], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "anything", &[]), &CancelToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.response.contains("tools"));
    assert_eq!(outcome.metadata.rounds, 0);
}

#[tokio::test]
async fn reasoning_failure_preserves_lineage() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("a", &[])],
        Box::new(|_, _| Ok(json!({"ok": true}))),
    );
    // Script: one tool round, then exhausted → reasoning error.
    let reasoner = ScriptedReasoner::new(vec![tool_round(vec![("t1", "a", json!({}))])]);
    let (state, _dir) = test_state(vec![alpha], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "q", &[]), &CancelToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    // The round-1 tool call survives in the lineage.
    assert_eq!(outcome.metadata.lineage.len(), 1);
    assert_eq!(outcome.metadata.rounds, 2);
}

#[tokio::test]
async fn cancelled_turn_is_discarded() {
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("a", &[])],
        Box::new(|_, _| Ok(json!({"ok": true}))),
    );
    let reasoner = ScriptedReasoner::new(vec![final_answer("never seen")]);
    let (state, _dir) = test_state(vec![alpha], reasoner, 5).await;

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = run_turn(&state, &input("s1", "q", &[]), &cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    // Nothing was persisted.
    assert!(state.store.load_session("u1", "s1").is_none());
}

#[tokio::test]
async fn transport_error_retries_then_surfaces() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_handler = attempts.clone();
    let alpha = MockToolServer::new(
        "alpha",
        vec![spec("flaky", &[])],
        Box::new(move |_, _| {
            attempts_in_handler.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Status(503))
        }),
    );
    let reasoner = ScriptedReasoner::new(vec![
        tool_round(vec![("t1", "flaky", json!({}))]),
        final_answer("gave up"),
    ]);
    let (state, _dir) = test_state(vec![alpha], reasoner, 5).await;

    let outcome = run_turn(&state, &input("s1", "q", &[]), &CancelToken::new())
        .await
        .unwrap();

    let record = &outcome.metadata.lineage[0];
    assert_eq!(record.outcome, CallOutcome::Error);
    assert_eq!(record.error_kind.as_deref(), Some("transport_error"));
    // Initial attempt + 2 retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // The turn still recovered to a final answer.
    assert!(outcome.success);
}
