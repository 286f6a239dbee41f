pub mod action;
pub mod document;
pub mod message;

pub use action::{ActionProposal, BlockReason, Decision, Disposition};
pub use document::RetrievedDocument;
pub use message::{ConversationError, ConversationState, Message, Role, SessionId, ToolCall};
