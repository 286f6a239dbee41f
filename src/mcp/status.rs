//! Session summaries derived from persisted session state.
//!
//! Shared by the MCP tools and the CLI `status`/`list` commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActionProposal, SessionId};
use crate::orchestrator::{
    ActionOutcome, ActionRecord, Diagnosis, SessionState, SessionStatus, Stage, WorkflowError,
};
use crate::store::{SessionStore, validate_session_id};

/// Summary of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub session_id: String,
    /// "idle", "running", "awaiting_approval", "completed" or "failed"
    pub status: String,
    /// Stage that failed (if status is failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    /// Failure detail (if status is failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Runs started in this session
    pub runs: u32,
    /// Messages in the conversation
    pub messages: usize,
    /// Latest user message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request: Option<String>,
    /// Parsed diagnosis of the latest run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    /// Pending approval (if status is awaiting_approval)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<PendingApproval>,
    /// Action audit trail
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSummary>,
    /// Final message of the last completed run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The action a session is suspended on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub call_id: String,
    pub proposal: ActionProposal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action: String,
    pub service: String,
    pub outcome: ActionOutcome,
}

impl From<&ActionRecord> for ActionSummary {
    fn from(record: &ActionRecord) -> Self {
        Self {
            action: record.proposal.action.clone(),
            service: record.proposal.service.clone(),
            outcome: record.outcome,
        }
    }
}

/// Short machine-readable name for a status.
pub fn status_name(status: &SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Running => "running",
        SessionStatus::AwaitingApproval => "awaiting_approval",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed { .. } => "failed",
    }
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        let (failed_stage, error) = match &state.status {
            SessionStatus::Failed { stage, error } => (Some(*stage), Some(error.clone())),
            _ => (None, None),
        };

        Self {
            session_id: state.session_id.to_string(),
            status: status_name(&state.status).to_string(),
            failed_stage,
            error,
            runs: state.runs,
            messages: state.conversation.len(),
            last_request: state.conversation.last_user_text().map(String::from),
            diagnosis: state.diagnosis.clone(),
            pending_approval: state.pending_approval.as_ref().map(|r| PendingApproval {
                call_id: r.call_id.clone(),
                proposal: r.proposal.clone(),
                expires_at: r.expires_at,
            }),
            actions: state.actions.iter().map(ActionSummary::from).collect(),
            final_message: state.final_message.clone(),
            updated_at: state.updated_at,
        }
    }
}

// ============================================================================
// Store Queries
// ============================================================================

/// Summary of one stored session. Reads the store only, so no generation or
/// retrieval backend needs to be configured.
pub async fn session_info(
    store: &dyn SessionStore,
    session_id: &SessionId,
) -> Result<SessionInfo, WorkflowError> {
    validate_session_id(session_id)?;
    let state = store
        .load(session_id)
        .await?
        .ok_or_else(|| WorkflowError::SessionNotFound(session_id.clone()))?;
    Ok(SessionInfo::from(&state))
}

/// Summaries of at most `limit` sessions, most recently updated first.
pub async fn list_session_infos(
    store: &dyn SessionStore,
    limit: usize,
) -> Result<Vec<SessionInfo>, WorkflowError> {
    let sessions = store.list().await?;
    Ok(sessions.iter().take(limit).map(SessionInfo::from).collect())
}
