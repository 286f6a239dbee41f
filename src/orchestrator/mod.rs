//! The incident workflow: stage graph, action policy, approval gate and the
//! engine that drives sessions through them.

pub mod diagnosis;
pub mod engine;
pub mod error;
pub mod gate;
pub mod locks;
pub mod policy;
pub mod stage;
pub mod state;

pub use diagnosis::{Diagnosis, INSUFFICIENT_INFORMATION};
pub use engine::{RunResult, WorkflowEngine, WorkflowEngineBuilder};
pub use error::WorkflowError;
pub use gate::{
    APPROVAL_QUESTION, ApprovalGate, ApprovalPrompt, ApprovalRequest, PendingToken, Resolution,
};
pub use locks::SessionLocks;
pub use policy::ActionPolicy;
pub use stage::Stage;
pub use state::{ActionOutcome, ActionRecord, SCHEMA_VERSION, SessionState, SessionStatus};
