//! The fixed stage graph and its routing rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::ConversationState;
use crate::tools::ToolKind;

/// One node of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RetrievalPlanning,
    RetrievalExecution,
    Diagnosis,
    OperatorPlanning,
    ActionExecution,
    FinalResponse,
}

impl Stage {
    pub const ENTRY: Stage = Stage::RetrievalPlanning;

    pub fn name(&self) -> &'static str {
        match self {
            Stage::RetrievalPlanning => "retrieval_planning",
            Stage::RetrievalExecution => "retrieval_execution",
            Stage::Diagnosis => "diagnosis",
            Stage::OperatorPlanning => "operator_planning",
            Stage::ActionExecution => "action_execution",
            Stage::FinalResponse => "final_response",
        }
    }

    /// The only tool a generation stage may invoke, if any.
    pub fn bound_tool(&self) -> Option<ToolKind> {
        match self {
            Stage::RetrievalPlanning => Some(ToolKind::Retrieval),
            Stage::OperatorPlanning => Some(ToolKind::Action),
            _ => None,
        }
    }

    /// Whether the stage calls the generation service.
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            Stage::RetrievalPlanning
                | Stage::Diagnosis
                | Stage::OperatorPlanning
                | Stage::FinalResponse
        )
    }

    /// Next stage given the conversation after this stage ran. `None` is END.
    pub fn route(&self, conversation: &ConversationState) -> Option<Stage> {
        match self {
            Stage::RetrievalPlanning => Some(if conversation.last_has_tool_calls() {
                Stage::RetrievalExecution
            } else {
                Stage::Diagnosis
            }),
            Stage::RetrievalExecution => Some(Stage::Diagnosis),
            Stage::Diagnosis => Some(Stage::OperatorPlanning),
            Stage::OperatorPlanning => Some(if conversation.last_has_tool_calls() {
                Stage::ActionExecution
            } else {
                Stage::FinalResponse
            }),
            Stage::ActionExecution => Some(Stage::FinalResponse),
            Stage::FinalResponse => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
