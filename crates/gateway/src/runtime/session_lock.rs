//! Per-session concurrency control.
//!
//! Turn appends to one session must serialize: each session id maps to a
//! `Semaphore(1)` whose permit is held for the duration of the turn.
//! Concurrent requests for *different* sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-session run locks.
#[derive(Default)]
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the run lock for a session without waiting.
    ///
    /// Returns `Err(SessionBusy)` when a turn is already in flight; the
    /// caller surfaces that as a retryable "busy" response rather than
    /// queueing unbounded work.
    pub fn try_acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().map_err(|_| SessionBusy)
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries for sessions with no active holder.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

/// Error returned when a session already has a turn in progress.
#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session is busy: a turn is already in progress")
    }
}

impl std::error::Error for SessionBusy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_access() {
        let map = SessionLockMap::new();
        let permit = map.try_acquire("s1").unwrap();
        drop(permit);
        let permit = map.try_acquire("s1").unwrap();
        drop(permit);
    }

    #[test]
    fn second_acquire_while_held_is_busy() {
        let map = SessionLockMap::new();
        let _held = map.try_acquire("s1").unwrap();
        assert!(map.try_acquire("s1").is_err());
    }

    #[test]
    fn different_sessions_do_not_contend() {
        let map = SessionLockMap::new();
        let _p1 = map.try_acquire("s1").unwrap();
        let _p2 = map.try_acquire("s2").unwrap();
        assert_eq!(map.session_count(), 2);
    }

    #[test]
    fn prune_keeps_held_locks() {
        let map = SessionLockMap::new();
        let held = map.try_acquire("busy").unwrap();
        let released = map.try_acquire("idle").unwrap();
        drop(released);

        map.prune_idle();
        assert_eq!(map.session_count(), 1);
        drop(held);
    }
}
