//! ApprovalGate - the suspend/resume primitive for high-impact actions.
//!
//! A session is suspended exactly when its state carries an [`ApprovalRequest`].
//! `suspend` records one, `resolve` removes it and classifies the outcome.
//! Neither performs the action; the engine does that after persisting the
//! cleared request, so a crash between the two never runs an action twice.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::state::{ActionOutcome, SessionState};
use crate::models::{ActionProposal, Decision, SessionId};

/// Question shown to the human for every high-impact action.
pub const APPROVAL_QUESTION: &str = "⚠️ This is a high-impact production change. Do you approve?";

// ============================================================================
// Requests and Tokens
// ============================================================================

/// A recorded, not yet answered request for human approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub session_id: SessionId,
    /// Tool call awaiting the decision
    pub call_id: String,
    pub proposal: ActionProposal,
    pub created_at: DateTime<Utc>,
    /// None when approvals never expire
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Handle returned by `suspend`, identifying what is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToken {
    pub session_id: SessionId,
    pub call_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a caller needs to ask a human for a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalPrompt {
    pub session_id: SessionId,
    pub call_id: String,
    pub proposal: ActionProposal,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&ApprovalRequest> for ApprovalPrompt {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            session_id: request.session_id.clone(),
            call_id: request.call_id.clone(),
            proposal: request.proposal.clone(),
            question: APPROVAL_QUESTION.to_string(),
            expires_at: request.expires_at,
        }
    }
}

/// Outcome of resolving a pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Approved(ApprovalRequest),
    Rejected(ApprovalRequest),
    /// The request outlived its deadline; the decision is ignored
    Expired(ApprovalRequest),
}

impl Resolution {
    pub fn request(&self) -> &ApprovalRequest {
        match self {
            Resolution::Approved(r) | Resolution::Rejected(r) | Resolution::Expired(r) => r,
        }
    }

    /// Tool-result text for outcomes that skip execution.
    pub fn refusal(&self) -> Option<String> {
        let action = &self.request().proposal.action;
        match self {
            Resolution::Approved(_) => None,
            Resolution::Rejected(_) => Some(format!(
                "❌ Action '{action}' was NOT executed.\n\
                 Reason: High impact action rejected by human."
            )),
            Resolution::Expired(_) => Some(format!(
                "❌ Action '{action}' was NOT executed.\n\
                 Reason: Approval request expired before a decision was made."
            )),
        }
    }

    /// Audit outcome for refusals.
    pub fn refusal_outcome(&self) -> Option<ActionOutcome> {
        match self {
            Resolution::Approved(_) => None,
            Resolution::Rejected(_) => Some(ActionOutcome::Rejected),
            Resolution::Expired(_) => Some(ActionOutcome::Expired),
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApprovalGate {
    ttl: Option<Duration>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::with_ttl_hours(Some(24))
    }
}

impl ApprovalGate {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { ttl }
    }

    pub fn with_ttl_hours(hours: Option<u64>) -> Self {
        // Out-of-range values behave like no expiry
        let ttl = hours
            .and_then(|h| i64::try_from(h).ok())
            .and_then(Duration::try_hours);
        Self { ttl }
    }

    /// Record a pending approval for `call_id`.
    pub fn suspend(
        &self,
        state: &mut SessionState,
        call_id: &str,
        proposal: ActionProposal,
    ) -> Result<PendingToken, WorkflowError> {
        self.suspend_at(state, call_id, proposal, Utc::now())
    }

    pub fn suspend_at(
        &self,
        state: &mut SessionState,
        call_id: &str,
        proposal: ActionProposal,
        now: DateTime<Utc>,
    ) -> Result<PendingToken, WorkflowError> {
        if state.pending_approval.is_some() {
            return Err(WorkflowError::ApprovalAlreadyPending {
                session_id: state.session_id.clone(),
            });
        }

        let request = ApprovalRequest {
            session_id: state.session_id.clone(),
            call_id: call_id.to_string(),
            proposal,
            created_at: now,
            expires_at: self.ttl.and_then(|ttl| now.checked_add_signed(ttl)),
        };

        tracing::info!(
            session_id = %request.session_id,
            call_id = %request.call_id,
            action = %request.proposal.action,
            "Suspending for human approval"
        );

        let token = PendingToken {
            session_id: request.session_id.clone(),
            call_id: request.call_id.clone(),
            expires_at: request.expires_at,
        };
        state.pending_approval = Some(request);
        Ok(token)
    }

    /// Remove the pending request and classify the decision against it.
    pub fn resolve(
        &self,
        state: &mut SessionState,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<Resolution, WorkflowError> {
        let request =
            state
                .pending_approval
                .take()
                .ok_or_else(|| WorkflowError::NoPendingApproval {
                    session_id: state.session_id.clone(),
                })?;

        if request.is_expired(now) {
            tracing::warn!(
                session_id = %request.session_id,
                call_id = %request.call_id,
                %decision,
                "Approval request expired; treating as rejected"
            );
            return Ok(Resolution::Expired(request));
        }

        tracing::info!(
            session_id = %request.session_id,
            call_id = %request.call_id,
            %decision,
            "Approval resolved"
        );

        Ok(match decision {
            Decision::Approve => Resolution::Approved(request),
            Decision::Reject => Resolution::Rejected(request),
        })
    }
}
