//! File-backed session store.
//!
//! Layout: `<sessions_dir>/<session_id>/session-state.json`, pretty JSON,
//! written to a temp file and renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{SessionStore, StoreError, sort_recent_first, validate_session_id};
use crate::models::SessionId;
use crate::orchestrator::SessionState;

const STATE_FILE: &str = "session-state.json";
const TEMP_FILE: &str = ".session-state.json.tmp";

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one session's files.
    pub fn session_dir(&self, session_id: &SessionId) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id.as_str()))
    }

    async fn read_state(path: &Path, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };

        let state: SessionState =
            serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                session_id: session_id.to_string(),
                source,
            })?;

        let found = state.schema_version;
        match state.migrate() {
            Some(state) => Ok(Some(state)),
            None => Err(StoreError::UnsupportedSchema {
                session_id: session_id.to_string(),
                found,
            }),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        let state_file = self.session_dir(session_id)?.join(STATE_FILE);
        Self::read_state(&state_file, session_id.as_str()).await
    }

    /// Save state using the atomic write pattern.
    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let session_dir = self.session_dir(&state.session_id)?;
        fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| io_error(&session_dir, e))?;

        let state_file = session_dir.join(STATE_FILE);
        let temp_file = session_dir.join(TEMP_FILE);

        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Corrupt {
            session_id: state.session_id.to_string(),
            source,
        })?;

        // Write to temp file first
        fs::write(&temp_file, &json)
            .await
            .map_err(|e| io_error(&temp_file, e))?;

        // Atomic rename
        fs::rename(&temp_file, &state_file)
            .await
            .map_err(|e| io_error(&state_file, e))?;

        tracing::debug!(
            session_id = %state.session_id,
            bytes = json.len(),
            "Saved session state"
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionState>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let state_file = entry.path().join(STATE_FILE);

            // Skip unreadable sessions rather than failing the whole listing
            match Self::read_state(&state_file, &name).await {
                Ok(Some(state)) => sessions.push(state),
                Ok(None) => {}
                Err(e) => tracing::warn!(session = %name, "Skipping session: {e}"),
            }
        }

        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let id = SessionId::new("incident-1");

        let mut state = SessionState::new(id.clone());
        state.conversation.push(Message::user("AccessDenied")).unwrap();
        state.runs = 1;
        store.save(&state).await.unwrap();

        assert!(dir.path().join("incident-1").join(STATE_FILE).exists());
        assert!(!dir.path().join("incident-1").join(TEMP_FILE).exists());

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load(&SessionId::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let err = store.load(&SessionId::new("../escape")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSessionId(_)));
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let session_dir = dir.path().join("broken");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join(STATE_FILE), "{not json").unwrap();

        let err = store.load(&SessionId::new("broken")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_sessions() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store
            .save(&SessionState::new(SessionId::new("good")))
            .await
            .unwrap();
        let broken = dir.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(STATE_FILE), "garbage").unwrap();

        let sessions = store.list().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id.as_str(), "good");
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
