use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A corrective action proposed by the operator stage.
///
/// Immutable once created. Field names follow what the model is asked to emit;
/// `highImpact` is also accepted as `high_impact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionProposal {
    /// Cloud service the action targets (e.g. IAM, Lambda, S3)
    pub service: String,
    /// The misconfigured component (role, user, bucket, ...)
    #[serde(alias = "configurationItem")]
    pub configuration_item: String,
    /// The corrective action to perform
    pub action: String,
    /// True if the action can be undone
    pub reversible: bool,
    /// True if the action affects production or other high-impact resources
    #[serde(rename = "highImpact", alias = "high_impact")]
    pub high_impact: bool,
}

impl ActionProposal {
    pub fn new(
        service: impl Into<String>,
        configuration_item: impl Into<String>,
        action: impl Into<String>,
        reversible: bool,
        high_impact: bool,
    ) -> Self {
        Self {
            service: service.into(),
            configuration_item: configuration_item.into(),
            action: action.into(),
            reversible,
            high_impact,
        }
    }
}

/// Why the policy refused an action outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Irreversible,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Irreversible => write!(f, "irreversible"),
        }
    }
}

/// Policy outcome for a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Never executed and never escalated
    Blocked { reason: BlockReason },
    /// Executed only after a human approves
    RequiresApproval,
    /// Executed immediately
    Permitted,
}

/// External decision supplied to resume a suspended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" => Ok(Decision::Approve),
            "reject" | "rejected" | "no" => Ok(Decision::Reject),
            other => Err(format!("unknown decision '{other}', expected approve or reject")),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Reject => write!(f, "reject"),
        }
    }
}
