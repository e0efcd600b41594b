//! Session store.
//!
//! Persists per-user sessions (ordered turns with execution metadata) and
//! per-turn feedback under the configured state path. State lives in
//! memory behind RwLocks and is flushed to `sessions.json` /
//! `feedback.json` after each mutation; writes go through a temp file and
//! rename so a crash never leaves a half-written document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use maestro_domain::error::{Error, Result};
use maestro_domain::lineage::ExecutionMetadata;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Documents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One side of a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One user-message / assistant-response cycle, including the execution
/// lineage gathered while producing the response. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    /// 1-based position within the session; assigned by the store.
    pub turn_number: u32,
    pub user_message: TurnMessage,
    pub assistant_message: TurnMessage,
    pub metadata: ExecutionMetadata,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Build a turn pending append. `turn_number` stays 0 until the store
    /// assigns the real position.
    pub fn new(
        user_message: TurnMessage,
        assistant_message: TurnMessage,
        metadata: ExecutionMetadata,
    ) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            turn_number: 0,
            user_message,
            assistant_message,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A session document: one user's conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDoc {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Listing form of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Feedback on one turn. Stored separately from the turn; upserted by
/// turn id so repeated submissions are last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_id: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed session store.
pub struct SessionStore {
    sessions_path: PathBuf,
    feedback_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionDoc>>,
    feedback: RwLock<HashMap<String, Feedback>>,
}

impl SessionStore {
    /// Load or create the store under `state_path`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;

        let sessions_path = state_path.join("sessions.json");
        let feedback_path = state_path.join("feedback.json");

        let sessions: HashMap<String, SessionDoc> = load_json(&sessions_path)?;
        let feedback: HashMap<String, Feedback> = load_json(&feedback_path)?;

        tracing::info!(
            sessions = sessions.len(),
            feedback = feedback.len(),
            path = %state_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            feedback_path,
            sessions: RwLock::new(sessions),
            feedback: RwLock::new(feedback),
        })
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Load a session if, and only if, it is owned by `user_id`.
    ///
    /// A missing session and a session owned by someone else are
    /// indistinguishable to the caller.
    pub fn load_session(&self, user_id: &str, session_id: &str) -> Option<SessionDoc> {
        let sessions = self.sessions.read();
        sessions
            .get(session_id)
            .filter(|doc| doc.user_id == user_id)
            .cloned()
    }

    /// Whether a session document exists at all, regardless of owner.
    /// Used for ownership pre-checks; never expose the result directly.
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Atomically append a turn, creating the session on first use.
    ///
    /// Assigns `turn_number = existing turns + 1` under the write lock so
    /// numbering is gap-free even under concurrent appends, then flushes.
    /// Returns the assigned turn number.
    pub fn append_turn(&self, session_id: &str, user_id: &str, mut turn: Turn) -> Result<u32> {
        let turn_number;
        {
            let mut sessions = self.sessions.write();
            let now = Utc::now();
            let doc = sessions.entry(session_id.to_owned()).or_insert_with(|| {
                tracing::info!(session_id = %session_id, user_id = %user_id, "new session created");
                SessionDoc {
                    session_id: session_id.to_owned(),
                    user_id: user_id.to_owned(),
                    created_at: now,
                    updated_at: now,
                    turns: Vec::new(),
                    metadata: serde_json::Map::new(),
                }
            });

            if doc.user_id != user_id {
                return Err(Error::Auth(format!(
                    "session {session_id} is not owned by the caller"
                )));
            }

            turn_number = doc.turns.len() as u32 + 1;
            turn.turn_number = turn_number;
            doc.turns.push(turn);
            doc.updated_at = now;
        }
        self.persist_sessions()?;
        Ok(turn_number)
    }

    /// Summaries of every session owned by `user_id`, newest first.
    pub fn list_sessions(&self, user_id: &str) -> Vec<SessionSummary> {
        let sessions = self.sessions.read();
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|doc| doc.user_id == user_id)
            .map(|doc| SessionSummary {
                session_id: doc.session_id.clone(),
                created_at: doc.created_at,
                updated_at: doc.updated_at,
                turn_count: doc.turns.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    // ── Feedback ──────────────────────────────────────────────────

    /// Upsert feedback for a turn. The referenced turn itself is never
    /// mutated.
    pub fn put_feedback(&self, feedback: Feedback) -> Result<()> {
        {
            let mut map = self.feedback.write();
            map.insert(feedback.turn_id.clone(), feedback);
        }
        self.persist_feedback()
    }

    pub fn get_feedback(&self, turn_id: &str) -> Option<Feedback> {
        self.feedback.read().get(turn_id).cloned()
    }

    // ── Persistence ───────────────────────────────────────────────

    /// Write both document files. Also called by the periodic flush task.
    pub fn flush(&self) -> Result<()> {
        self.persist_sessions()?;
        self.persist_feedback()
    }

    fn persist_sessions(&self) -> Result<()> {
        let snapshot = self.sessions.read().clone();
        write_json(&self.sessions_path, &snapshot)
    }

    fn persist_feedback(&self) -> Result<()> {
        let snapshot = self.feedback.read().clone();
        write_json(&self.feedback_path, &snapshot)
    }
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, starting empty");
            Ok(T::default())
        }
    }
}

/// Write via temp file + rename so readers never observe a torn file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(Error::Io)?;
    std::fs::rename(&tmp, path).map_err(Error::Io)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
