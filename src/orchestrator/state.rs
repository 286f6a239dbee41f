//! SessionState - persisted state of one incident session.
//!
//! Everything a later `resume` needs is in here: the conversation, the pending
//! approval (its presence is what "suspended" means), and enough bookkeeping to
//! report status without replaying the conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diagnosis::Diagnosis;
use super::gate::ApprovalRequest;
use super::stage::Stage;
use crate::models::{ActionProposal, ConversationState, SessionId};

/// Current schema version for state files.
/// Bump when adding/removing/modifying fields.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Session Status
// ============================================================================

/// Lifecycle status of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but no run has started
    Idle,
    /// A run is in progress
    Running,
    /// Suspended until a human approves or rejects an action
    AwaitingApproval,
    /// The last run reached the final response
    Completed,
    /// The last run stopped on an upstream failure
    Failed { stage: Stage, error: String },
}

// ============================================================================
// Action Audit Trail
// ============================================================================

/// What happened to a proposed action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Executed,
    Blocked,
    Rejected,
    Expired,
    Failed,
}

/// One entry in the action audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    /// Tool call that carried the proposal
    pub call_id: String,
    pub proposal: ActionProposal,
    pub outcome: ActionOutcome,
    /// Tool-result text recorded in the conversation
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Session State
// ============================================================================

/// Persistent state for an incident session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// Schema version for migration support
    pub schema_version: u32,
    /// Session identifier
    pub session_id: SessionId,
    /// Full message history across runs
    pub conversation: ConversationState,
    /// Suspension marker; at most one per session
    #[serde(default)]
    pub pending_approval: Option<ApprovalRequest>,
    /// Current session status
    pub status: SessionStatus,
    /// Documents retrieved by the current run
    #[serde(default)]
    pub retrieved_documents: usize,
    /// Parsed diagnosis of the current run
    #[serde(default)]
    pub diagnosis: Option<Diagnosis>,
    /// Every proposed action and what happened to it
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    /// Final message of the last completed run
    #[serde(default)]
    pub final_message: Option<String>,
    /// Number of runs started in this session
    #[serde(default)]
    pub runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Create a new, idle session.
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            session_id,
            conversation: ConversationState::new(),
            pending_approval: None,
            status: SessionStatus::Idle,
            retrieved_documents: 0,
            diagnosis: None,
            actions: Vec::new(),
            final_message: None,
            runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reset per-run bookkeeping at the start of a new run.
    pub fn begin_run(&mut self) {
        self.runs = self.runs.saturating_add(1);
        self.retrieved_documents = 0;
        self.diagnosis = None;
        self.final_message = None;
        self.status = SessionStatus::Running;
        self.touch();
    }

    pub fn record_action(
        &mut self,
        call_id: &str,
        proposal: ActionProposal,
        outcome: ActionOutcome,
        detail: &str,
    ) {
        self.actions.push(ActionRecord {
            call_id: call_id.to_string(),
            proposal,
            outcome,
            detail: detail.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_approval.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check a loaded state against the current schema, migrating when possible.
    /// Returns None if the state cannot be brought up to date.
    pub fn migrate(self) -> Option<Self> {
        if self.schema_version == SCHEMA_VERSION {
            return Some(self);
        }

        // Only version 1 exists so far; future migrations go here.
        tracing::warn!(
            session_id = %self.session_id,
            "Cannot migrate session state from version {} to {}",
            self.schema_version,
            SCHEMA_VERSION
        );
        None
    }
}
