//! Session persistence and the tool-result cache.
//!
//! Three logical document kinds are stored: session documents (with their
//! ordered turns), feedback documents (independent of turns, keyed by turn
//! id), and cache entries. Sessions and feedback are durable JSON files;
//! the cache is in-memory with TTL expiry.

pub mod cache;
pub mod store;

pub use cache::{cache_key, ToolCache};
pub use store::{Feedback, SessionDoc, SessionStore, SessionSummary, Turn, TurnMessage};
