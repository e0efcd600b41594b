//! Turn runtime: the planning loop, the tool invoker, and the per-session
//! concurrency machinery.

pub mod cancel;
pub mod invoker;
pub mod session_lock;
pub mod turn;

pub use turn::{run_turn, TurnInput, TurnOutcome};
