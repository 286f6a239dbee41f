use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionStore, StoreError, sort_recent_first};
use crate::models::SessionId;
use crate::orchestrator::SessionState;

/// Process-local store for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionState>, StoreError> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }
}
