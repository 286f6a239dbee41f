use async_trait::async_trait;

use crate::models::{ActionProposal, BlockReason};

/// The only side-effecting step of the workflow.
///
/// Implementations are called exclusively for actions the policy permitted or
/// a human approved; the policy check happens before, never inside.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Apply the action. `Ok` carries the success message for the conversation.
    async fn execute(&self, proposal: &ActionProposal) -> Result<String, String>;
}

/// Reports success without touching any cloud account.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedActionExecutor;

#[async_trait]
impl ActionExecutor for SimulatedActionExecutor {
    async fn execute(&self, proposal: &ActionProposal) -> Result<String, String> {
        tracing::info!(
            service = %proposal.service,
            configuration_item = %proposal.configuration_item,
            action = %proposal.action,
            "Simulated action executed"
        );
        Ok(format!(
            "✅ Action '{}' executed for Service '{}' on CI '{}'.",
            proposal.action, proposal.service, proposal.configuration_item
        ))
    }
}

/// Tool-result text for an action the policy refused.
pub fn blocked_message(proposal: &ActionProposal, reason: BlockReason) -> String {
    let reason = match reason {
        BlockReason::Irreversible => "Action is irreversible.",
    };
    format!("❌ Action '{}' NOT executed.\nReason: {reason}", proposal.action)
}
