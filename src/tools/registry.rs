//! Tool registry: the static binding between stages and the tools they may call.
//!
//! There are exactly two tools. Each generation stage binds at most one of them
//! (see [`Stage::bound_tool`]); dispatch is a match on [`ToolKind`], not a
//! name lookup, so a stage can never reach a tool it did not bind.

use std::sync::Arc;
use std::time::Instant;

use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{ActionExecutor, blocked_message};
use super::retrieval::{KnowledgeRetriever, RetrievalOutcome};
use crate::models::{ActionProposal, BlockReason, ToolCall};
use crate::orchestrator::{Stage, WorkflowError};

// ============================================================================
// Tool Kinds and Specs
// ============================================================================

/// The tools the workflow knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Retrieval,
    Action,
}

/// Arguments of the retrieval tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Clear technical rewrite of the user's problem, used as the search query
    pub query: String,
}

/// Definition of a tool as offered to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object
    pub parameters: Value,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Retrieval => "search_knowledge",
            ToolKind::Action => "apply_cloud_action",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "search_knowledge" => Some(ToolKind::Retrieval),
            "apply_cloud_action" => Some(ToolKind::Action),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::Retrieval => {
                "Search the operations knowledge base (user guides and past incident tickets) \
                 for documents relevant to a problem."
            }
            ToolKind::Action => {
                "Apply a corrective action to a cloud configuration item. Report whether the \
                 action is reversible and whether it has a high impact."
            }
        }
    }

    /// Argument keys that must be present for a call to be usable.
    pub fn required_args(&self) -> &'static [&'static str] {
        match self {
            ToolKind::Retrieval => &["query"],
            ToolKind::Action => &[
                "service",
                "configuration_item",
                "action",
                "reversible",
                "highImpact",
            ],
        }
    }

    pub fn spec(&self) -> ToolSpec {
        // Helper function to create schema from JsonSchema type
        fn get_schema<T: JsonSchema>() -> Value {
            serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| Value::Object(Default::default()))
        }

        let parameters = match self {
            ToolKind::Retrieval => get_schema::<SearchArgs>(),
            ToolKind::Action => get_schema::<ActionProposal>(),
        };

        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Result of running a permitted action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub succeeded: bool,
    /// Tool-result text for the conversation
    pub message: String,
}

/// Executes the tool calls the workflow dispatches.
pub struct ToolRegistry {
    retriever: KnowledgeRetriever,
    executor: Arc<dyn ActionExecutor>,
}

impl ToolRegistry {
    pub fn new(retriever: KnowledgeRetriever, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            retriever,
            executor,
        }
    }

    /// Tool specs offered to the generation service for `stage`.
    pub fn specs_for(stage: Stage) -> Vec<ToolSpec> {
        stage.bound_tool().map(|kind| kind.spec()).into_iter().collect()
    }

    /// Resolve a call name against the tool bound to `stage`.
    pub fn bound_kind(stage: Stage, name: &str) -> Option<ToolKind> {
        stage
            .bound_tool()
            .filter(|kind| ToolKind::from_name(name) == Some(*kind))
    }

    pub fn retriever(&self) -> &KnowledgeRetriever {
        &self.retriever
    }

    /// Run a retrieval call. Malformed arguments fall back to the raw argument text.
    pub async fn search(&self, call: &ToolCall) -> Result<RetrievalOutcome, WorkflowError> {
        let start = Instant::now();
        let query = match serde_json::from_value::<SearchArgs>(call.arguments.clone()) {
            Ok(args) => args.query,
            Err(e) => {
                tracing::warn!(call_id = %call.id, "Malformed search arguments: {e}");
                call.arguments.to_string()
            }
        };

        let result = self.retriever.retrieve(&query).await;
        audit(
            ToolKind::Retrieval,
            &call.id,
            match &result {
                Ok(_) => "ok",
                Err(_) => "error",
            },
            start,
        );
        result
    }

    /// Parse the proposal carried by an action call.
    pub fn parse_proposal(call: &ToolCall) -> Result<ActionProposal, String> {
        serde_json::from_value::<ActionProposal>(call.arguments.clone())
            .map_err(|e| format!("Invalid arguments for {}: {e}", ToolKind::Action.name()))
    }

    /// Run a permitted (or approved) action through the executor.
    pub async fn execute_action(&self, call_id: &str, proposal: &ActionProposal) -> ActionResult {
        let start = Instant::now();
        let result = match self.executor.execute(proposal).await {
            Ok(message) => ActionResult {
                succeeded: true,
                message,
            },
            Err(e) => ActionResult {
                succeeded: false,
                message: format!(
                    "❌ Action '{}' failed.\nReason: {e}",
                    proposal.action
                ),
            },
        };
        audit(
            ToolKind::Action,
            call_id,
            if result.succeeded { "executed" } else { "failed" },
            start,
        );
        result
    }

    /// Record a blocked action without touching the executor.
    pub fn block_action(&self, call_id: &str, proposal: &ActionProposal, reason: BlockReason) -> String {
        audit(ToolKind::Action, call_id, "blocked", Instant::now());
        blocked_message(proposal, reason)
    }
}

/// Structured audit event for one tool execution.
fn audit(kind: ToolKind, call_id: &str, outcome: &str, start: Instant) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": kind.name(),
        "call_id": call_id,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit, "tool");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_round_trip() {
        for kind in [ToolKind::Retrieval, ToolKind::Action] {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("RAG"), None);
    }

    #[test]
    fn test_search_spec_schema() {
        let spec = ToolKind::Retrieval.spec();
        assert_eq!(spec.name, "search_knowledge");
        assert!(spec.parameters["properties"]["query"].is_object());
    }

    #[test]
    fn test_action_spec_uses_wire_names() {
        let spec = ToolKind::Action.spec();
        let props = &spec.parameters["properties"];
        assert!(props["configuration_item"].is_object());
        assert!(props["highImpact"].is_object());
        assert!(props["reversible"].is_object());
    }

    #[test]
    fn test_specs_for_stage() {
        assert_eq!(ToolRegistry::specs_for(Stage::RetrievalPlanning).len(), 1);
        assert_eq!(
            ToolRegistry::specs_for(Stage::OperatorPlanning)[0].name,
            "apply_cloud_action"
        );
        assert!(ToolRegistry::specs_for(Stage::Diagnosis).is_empty());
        assert!(ToolRegistry::specs_for(Stage::FinalResponse).is_empty());
    }

    #[test]
    fn test_bound_kind_rejects_other_stage_tools() {
        assert_eq!(
            ToolRegistry::bound_kind(Stage::RetrievalPlanning, "search_knowledge"),
            Some(ToolKind::Retrieval)
        );
        assert_eq!(
            ToolRegistry::bound_kind(Stage::RetrievalPlanning, "apply_cloud_action"),
            None
        );
        assert_eq!(ToolRegistry::bound_kind(Stage::Diagnosis, "search_knowledge"), None);
    }

    #[test]
    fn test_parse_proposal_reports_missing_fields() {
        let call = ToolCall::new("apply_cloud_action", serde_json::json!({"service": "IAM"}));
        let err = ToolRegistry::parse_proposal(&call).unwrap_err();
        assert!(err.contains("apply_cloud_action"));
    }
}
