use thiserror::Error;

use crate::models::{ConversationError, SessionId};
use crate::store::StoreError;

/// Errors surfaced by the workflow Run API.
///
/// Blocked, rejected and expired actions are not errors; they are valid
/// outcomes explained by the final response.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("session '{session_id}' has no pending approval")]
    NoPendingApproval { session_id: SessionId },

    #[error("session '{session_id}' already has a pending approval; resume it first")]
    ApprovalAlreadyPending { session_id: SessionId },

    #[error("{service} unavailable after {attempts} attempt(s): {message}")]
    UpstreamUnavailable {
        service: String,
        attempts: u32,
        message: String,
    },

    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),

    #[error("invalid session id '{0}': expected 1-128 characters from [A-Za-z0-9._-]")]
    InvalidSessionId(String),

    #[error("user message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error("session store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSessionId(id) => WorkflowError::InvalidSessionId(id),
            other => WorkflowError::Store(other),
        }
    }
}

impl WorkflowError {
    /// Whether the error came from an external service rather than from misuse.
    pub fn is_upstream(&self) -> bool {
        matches!(self, WorkflowError::UpstreamUnavailable { .. })
    }
}
