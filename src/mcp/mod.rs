//! MCP server exposing the incident workflow to AI assistants.
//!
//! Assistants start incidents, relay approval questions to a human and
//! resume suspended sessions with the human's decision.

pub mod server;
pub mod status;

pub use server::OpsPilotServer;
pub use status::SessionInfo;
