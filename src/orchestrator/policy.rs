//! ActionPolicy - classifies proposed actions before anything runs.
//!
//! The rules are fixed and evaluated in order:
//! - irreversible actions are blocked, whatever their impact
//! - reversible, high-impact actions need a human decision
//! - everything else is permitted
//!
//! Evaluation is pure. Execution and suspension are handled by the caller
//! based on the returned [`Disposition`].

use crate::models::{ActionProposal, BlockReason, Disposition};

/// Stateless classifier over [`ActionProposal`] attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionPolicy;

impl ActionPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, proposal: &ActionProposal) -> Disposition {
        let disposition = if !proposal.reversible {
            Disposition::Blocked {
                reason: BlockReason::Irreversible,
            }
        } else if proposal.high_impact {
            Disposition::RequiresApproval
        } else {
            Disposition::Permitted
        };

        tracing::debug!(
            action = %proposal.action,
            reversible = proposal.reversible,
            high_impact = proposal.high_impact,
            ?disposition,
            "Evaluated action policy"
        );

        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(reversible: bool, high_impact: bool) -> ActionProposal {
        ActionProposal::new("IAM", "Prod-App-Role", "delete role", reversible, high_impact)
    }

    #[test]
    fn test_irreversible_is_blocked_regardless_of_impact() {
        let policy = ActionPolicy::new();
        for high_impact in [true, false] {
            assert_eq!(
                policy.evaluate(&proposal(false, high_impact)),
                Disposition::Blocked {
                    reason: BlockReason::Irreversible
                }
            );
        }
    }

    #[test]
    fn test_reversible_high_impact_requires_approval() {
        assert_eq!(
            ActionPolicy::new().evaluate(&proposal(true, true)),
            Disposition::RequiresApproval
        );
    }

    #[test]
    fn test_reversible_low_impact_is_permitted() {
        assert_eq!(
            ActionPolicy::new().evaluate(&proposal(true, false)),
            Disposition::Permitted
        );
    }
}
