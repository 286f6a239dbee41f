pub mod action;
pub mod registry;
pub mod retrieval;

pub use action::{ActionExecutor, SimulatedActionExecutor, blocked_message};
pub use registry::{ActionResult, SearchArgs, ToolKind, ToolRegistry, ToolSpec};
pub use retrieval::{KnowledgeRetriever, NO_DOCUMENTS, RetrievalOutcome};
