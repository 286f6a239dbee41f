//! Keyed persistence of session state between invocations.

pub mod file;
pub mod memory;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::SessionId;
use crate::orchestrator::SessionState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session state for '{session_id}': {source}")]
    Corrupt {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session '{session_id}' uses unsupported schema version {found}")]
    UnsupportedSchema { session_id: String, found: u32 },
}

/// Storage backend for [`SessionState`], keyed by [`SessionId`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; `Ok(None)` if it was never saved.
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError>;

    /// Persist a session, replacing any previous version.
    async fn save(&self, state: &SessionState) -> Result<(), StoreError>;

    /// All stored sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionState>, StoreError>;
}

/// Check an id against the characters safe to use as a directory name.
pub fn validate_session_id(session_id: &SessionId) -> Result<(), StoreError> {
    let id = session_id.as_str();
    let valid = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(id.to_string()))
    }
}

fn sort_recent_first(sessions: &mut [SessionState]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
