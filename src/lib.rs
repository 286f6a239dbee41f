pub mod clients;
pub mod config;
pub mod mcp;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod store;
pub mod tools;

// Re-export main types
pub use config::CliConfig;
pub use models::{ActionProposal, Decision, Disposition, Message, SessionId};
pub use orchestrator::{
    ApprovalPrompt, RunResult, SessionState, SessionStatus, WorkflowEngine, WorkflowError,
};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};

// Re-export MCP server
pub use mcp::{OpsPilotServer, SessionInfo};
