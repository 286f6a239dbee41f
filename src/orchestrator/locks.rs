use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::SessionId;

type LockTable = Arc<StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>>;

/// Per-session async mutexes serializing runs of the same session.
///
/// Sessions never share a lock, so independent sessions run concurrently.
/// An entry lives only while a task holds or waits on it.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: LockTable,
}

/// Exclusive access to one session; releases and prunes its entry on drop.
#[derive(Debug)]
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: SessionId,
    locks: LockTable,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a session.
    fn get_or_create(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        // The table is only touched in short synchronous sections, never across an await
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.clone()).or_default())
    }

    /// Wait for exclusive access to a session.
    pub async fn acquire(&self, session_id: &SessionId) -> SessionGuard {
        let guard = self.get_or_create(session_id).lock_owned().await;
        SessionGuard {
            guard: Some(guard),
            session_id: session_id.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of sessions currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release first so the guard's own handle no longer counts
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}
