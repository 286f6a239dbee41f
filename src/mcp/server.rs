//! Ops-Pilot MCP Server implementation.
//!
//! Exposes the incident workflow to AI assistants via MCP protocol.

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData, Implementation, Role, ServerCapabilities,
        ServerInfo,
    },
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Decision, SessionId};
use crate::orchestrator::{RunResult, WorkflowEngine, WorkflowError};

use super::status::{list_session_infos, session_info};

// ============================================================================
// Tool Parameters
// ============================================================================

/// Parameters for the incident_start tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IncidentStartParams {
    /// Description of the incident or request
    pub message: String,
    /// Session to continue. A new session is created if not provided.
    pub session_id: Option<String>,
}

/// Parameters for the incident_resume tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IncidentResumeParams {
    /// Session suspended on an approval
    pub session_id: String,
    /// "approve" or "reject"
    pub decision: Decision,
}

/// Parameters for the incident_status tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IncidentStatusParams {
    /// Session ID to check
    pub session_id: String,
}

/// Parameters for the incident_list tool
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IncidentListParams {
    /// Maximum number of sessions to return (default: 10)
    pub limit: Option<u32>,
}

// ============================================================================
// Server Implementation
// ============================================================================

/// Ops-Pilot MCP Server
///
/// Runs incidents through the workflow and relays approval requests to the
/// calling assistant, which answers them with `incident_resume`.
#[derive(Clone)]
pub struct OpsPilotServer {
    tool_router: ToolRouter<Self>,
    engine: Arc<WorkflowEngine>,
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for OpsPilotServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = r#"Ops-Pilot: human-in-the-loop operations agent.

Each incident runs retrieval, diagnosis and remediation planning. Irreversible
actions are never executed. High-impact actions suspend the session until a
human decides.

Available tools:
- incident_start: Start a run for an incident (optionally in an existing session)
- incident_resume: Approve or reject the action a session is waiting on
- incident_status: Show a session's status, diagnosis and action history
- incident_list: List sessions, most recent first

When a result has "result": "pending", ask the human the included question
and call incident_resume with their decision. Never decide on their behalf.
"#;

        ServerInfo {
            server_info: Implementation {
                name: "ops-pilot".to_string(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("Ops-Pilot".to_string()),
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(instructions.to_string()),
            ..Default::default()
        }
    }
}

#[tool_router(router = tool_router)]
impl OpsPilotServer {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    // ========================================================================
    // Execution Tools
    // ========================================================================

    #[tool(
        name = "incident_start",
        description = "Start a workflow run for an incident. Returns either the completed final response or a pending approval request that must be answered with incident_resume."
    )]
    pub async fn incident_start(
        &self,
        params: Parameters<IncidentStartParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let session_id = match params.0.session_id {
            Some(id) => SessionId::new(id),
            None => SessionId::generate(),
        };

        let result = self
            .engine
            .start(&session_id, &params.0.message)
            .await
            .map_err(workflow_error)?;

        json_result(&result)
    }

    #[tool(
        name = "incident_resume",
        description = "Approve or reject the high-impact action a session is suspended on, then continue the run to its final response."
    )]
    pub async fn incident_resume(
        &self,
        params: Parameters<IncidentResumeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let session_id = SessionId::new(params.0.session_id);

        let result = self
            .engine
            .resume(&session_id, params.0.decision)
            .await
            .map_err(workflow_error)?;

        json_result(&result)
    }

    // ========================================================================
    // Read-Only Tools
    // ========================================================================

    #[tool(
        name = "incident_status",
        description = "Get the status of an incident session: idle, running, awaiting_approval, completed or failed, with diagnosis and action history."
    )]
    pub async fn incident_status(
        &self,
        params: Parameters<IncidentStatusParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let session_id = SessionId::new(params.0.session_id);
        let info = session_info(self.engine.store().as_ref(), &session_id)
            .await
            .map_err(workflow_error)?;

        json_result(&info)
    }

    #[tool(
        name = "incident_list",
        description = "List incident sessions with their status, sorted by most recent first."
    )]
    pub async fn incident_list(
        &self,
        params: Parameters<IncidentListParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let limit = params.0.limit.unwrap_or(10) as usize;
        let infos = list_session_infos(self.engine.store().as_ref(), limit)
            .await
            .map_err(workflow_error)?;

        json_result(&infos)
    }
}

/// Caller mistakes map to invalid params; everything else is internal.
fn workflow_error(error: WorkflowError) -> ErrorData {
    let code = match error {
        WorkflowError::NoPendingApproval { .. }
        | WorkflowError::ApprovalAlreadyPending { .. }
        | WorkflowError::SessionNotFound(_)
        | WorkflowError::InvalidSessionId(_)
        | WorkflowError::EmptyMessage => ErrorCode::INVALID_PARAMS,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    ErrorData::new(code, error.to_string(), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    let response = serde_json::to_string_pretty(value).map_err(|e| {
        ErrorData::new(
            ErrorCode::INTERNAL_ERROR,
            format!("Failed to serialize response: {}", e),
            None,
        )
    })?;

    Ok(CallToolResult::success(vec![
        Content::text(response).with_audience(vec![Role::Assistant]),
    ]))
}
