//! WorkflowEngine - drives a session through the fixed stage graph.
//!
//! ```text
//! retrieval_planning ──tool call──► retrieval_execution ──► diagnosis
//!         └──────────no call──────────────────────────────────┘ │
//!                                                               ▼
//! final_response ◄──no call── operator_planning ──tool call──► action_execution
//!       ▲                                                        │
//!       └────────────────────────────────────────────────────────┘
//! ```
//!
//! A run either reaches `final_response` or suspends inside `action_execution`
//! on a high-impact action. Suspension is persisted; `resume` reloads the
//! session and continues from `action_execution` with the decision applied.
//! State is saved after every stage.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::diagnosis::{Diagnosis, INSUFFICIENT_INFORMATION};
use super::error::WorkflowError;
use super::gate::{ApprovalGate, ApprovalPrompt};
use super::locks::SessionLocks;
use super::policy::ActionPolicy;
use super::stage::Stage;
use super::state::{ActionOutcome, SessionState, SessionStatus};
use crate::clients::{
    Embedder, GenerationClient, OllamaEmbedder, OllamaGenerationClient, PineconeRetrievalClient,
    RetrievalClient, RetryPolicy,
};
use crate::config::CliConfig;
use crate::models::{ConversationState, Decision, Disposition, Message, Role, SessionId, ToolCall};
use crate::prompts::{StagePrompts, resolve_prompts};
use crate::store::{FileSessionStore, InMemorySessionStore, SessionStore, validate_session_id};
use crate::tools::{
    ActionExecutor, KnowledgeRetriever, SimulatedActionExecutor, ToolKind, ToolRegistry, ToolSpec,
};

/// Final message when a run ends without any assistant text.
const NO_RESPONSE: &str = "The workflow completed without producing a response.";

// ============================================================================
// Run Result
// ============================================================================

/// Outcome of `start` or `resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunResult {
    /// The run reached the final response
    Completed {
        session_id: SessionId,
        final_message: String,
    },
    /// The run is suspended until a human decides
    Pending { approval: ApprovalPrompt },
}

impl RunResult {
    pub fn session_id(&self) -> &SessionId {
        match self {
            RunResult::Completed { session_id, .. } => session_id,
            RunResult::Pending { approval } => &approval.session_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RunResult::Pending { .. })
    }
}

/// What the driver does after a stage.
enum StepOutcome {
    Continue,
    Suspend,
}

// ============================================================================
// Engine
// ============================================================================

pub struct WorkflowEngine {
    generator: Arc<dyn GenerationClient>,
    tools: ToolRegistry,
    store: Arc<dyn SessionStore>,
    policy: ActionPolicy,
    gate: ApprovalGate,
    prompts: StagePrompts,
    retry: RetryPolicy,
    locks: SessionLocks,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    /// Build an engine from configuration with the HTTP adapters and file store.
    pub fn from_config(config: &CliConfig, base_dir: &Path) -> anyhow::Result<Self> {
        if config.retrieval.index_host.trim().is_empty() {
            bail!("retrieval.index_host is not configured (set it in the config file or OPS_PILOT_INDEX_HOST)");
        }
        let api_key = config
            .retrieval
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .context("Pinecone API key is not configured (set PINECONE_API_KEY)")?;

        let generator = OllamaGenerationClient::new(&config.generation.base_url, &config.generation.model)
            .with_temperature(config.generation.temperature)
            .with_timeout(std::time::Duration::from_secs(config.generation.timeout_secs));
        let embedder = OllamaEmbedder::new(&config.embedding.base_url, &config.embedding.model);
        let retrieval = PineconeRetrievalClient::new(&config.retrieval.index_host, api_key);

        let source = resolve_prompts(config.prompts.file.as_deref(), base_dir);
        let prompts = StagePrompts::load(&source, &config.retrieval.namespaces)?;

        Self::builder()
            .generator(Arc::new(generator))
            .embedder(Arc::new(embedder))
            .retrieval_client(Arc::new(retrieval))
            .store(Arc::new(FileSessionStore::new(&config.store.sessions_dir)))
            .prompts(prompts)
            .retry(config.retry.clone())
            .approval_ttl_hours(config.approval.ttl_hours)
            .namespaces(config.retrieval.namespaces.clone())
            .top_k(config.retrieval.top_k)
            .build()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ========================================================================
    // Run API
    // ========================================================================

    /// Start a new run for `session_id` with a user message.
    pub async fn start(
        &self,
        session_id: &SessionId,
        user_message: &str,
    ) -> Result<RunResult, WorkflowError> {
        if user_message.trim().is_empty() {
            return Err(WorkflowError::EmptyMessage);
        }
        validate_session_id(session_id)?;

        let _guard = self.locks.acquire(session_id).await;

        let mut state = self
            .store
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionState::new(session_id.clone()));

        if state.is_suspended() {
            return Err(WorkflowError::ApprovalAlreadyPending {
                session_id: session_id.clone(),
            });
        }

        state.begin_run();
        state.conversation.push(Message::user(user_message.trim()))?;
        self.store.save(&state).await?;

        info!(session_id = %session_id, run = state.runs, "Starting run");
        self.drive(&mut state, Stage::ENTRY).await
    }

    /// Apply a human decision to the pending approval and continue the run.
    pub async fn resume(
        &self,
        session_id: &SessionId,
        decision: Decision,
    ) -> Result<RunResult, WorkflowError> {
        validate_session_id(session_id)?;
        let _guard = self.locks.acquire(session_id).await;

        let mut state = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| WorkflowError::NoPendingApproval {
                session_id: session_id.clone(),
            })?;

        let resolution = self.gate.resolve(&mut state, decision, Utc::now())?;
        state.status = SessionStatus::Running;
        state.touch();

        // Persist the cleared request before any side effect
        self.store.save(&state).await?;

        let request = resolution.request().clone();
        let (text, outcome) = match (resolution.refusal(), resolution.refusal_outcome()) {
            (Some(text), Some(outcome)) => (text, outcome),
            _ => {
                let result = self
                    .tools
                    .execute_action(&request.call_id, &request.proposal)
                    .await;
                let outcome = if result.succeeded {
                    ActionOutcome::Executed
                } else {
                    ActionOutcome::Failed
                };
                (result.message, outcome)
            }
        };

        state
            .conversation
            .push(Message::tool_result(&request.call_id, &text))?;
        state.record_action(&request.call_id, request.proposal, outcome, &text);
        self.store.save(&state).await?;

        info!(session_id = %session_id, ?outcome, "Resuming run after decision");
        self.drive(&mut state, Stage::ActionExecution).await
    }

    /// Current persisted state of a session.
    pub async fn status(&self, session_id: &SessionId) -> Result<SessionState, WorkflowError> {
        validate_session_id(session_id)?;
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.clone()))
    }

    /// All sessions, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionState>, WorkflowError> {
        Ok(self.store.list().await?)
    }

    // ========================================================================
    // Driver
    // ========================================================================

    async fn drive(
        &self,
        state: &mut SessionState,
        from: Stage,
    ) -> Result<RunResult, WorkflowError> {
        let mut next = Some(from);

        while let Some(stage) = next {
            info!(session_id = %state.session_id, %stage, "Entering stage");

            let outcome = match self.run_stage(stage, state).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.record_failure(state, stage, &e).await;
                    return Err(e);
                }
            };
            state.touch();

            match outcome {
                StepOutcome::Suspend => {
                    state.status = SessionStatus::AwaitingApproval;
                    self.store.save(state).await?;
                    return match &state.pending_approval {
                        Some(request) => Ok(RunResult::Pending {
                            approval: ApprovalPrompt::from(request),
                        }),
                        None => Err(WorkflowError::NoPendingApproval {
                            session_id: state.session_id.clone(),
                        }),
                    };
                }
                StepOutcome::Continue => {
                    self.store.save(state).await?;
                    next = stage.route(&state.conversation);
                    self.log_fallback(state, stage, next);
                }
            }
        }

        let final_message = state
            .conversation
            .last_assistant_text()
            .unwrap_or(NO_RESPONSE)
            .to_string();
        state.final_message = Some(final_message.clone());
        state.status = SessionStatus::Completed;
        state.touch();
        self.store.save(state).await?;

        info!(session_id = %state.session_id, "Run completed");
        Ok(RunResult::Completed {
            session_id: state.session_id.clone(),
            final_message,
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        state: &mut SessionState,
    ) -> Result<StepOutcome, WorkflowError> {
        match stage {
            Stage::RetrievalExecution => self.execute_retrieval(state).await,
            Stage::ActionExecution => self.execute_actions(state).await,
            Stage::Diagnosis if state.retrieved_documents == 0 => {
                warn!(
                    session_id = %state.session_id,
                    "No documents retrieved; skipping model diagnosis"
                );
                state
                    .conversation
                    .push(Message::assistant(INSUFFICIENT_INFORMATION))?;
                state.diagnosis = Some(Diagnosis::insufficient());
                Ok(StepOutcome::Continue)
            }
            _ => self.generate(stage, state).await,
        }
    }

    /// Upstream failures leave the session in a Failed state; misuse errors don't touch it.
    async fn record_failure(&self, state: &mut SessionState, stage: Stage, error: &WorkflowError) {
        if !error.is_upstream() {
            return;
        }

        state.status = SessionStatus::Failed {
            stage,
            error: error.to_string(),
        };
        state.touch();
        if let Err(save_err) = self.store.save(state).await {
            warn!(session_id = %state.session_id, "Failed to persist failed state: {save_err}");
        }
    }

    fn log_fallback(&self, state: &SessionState, stage: Stage, next: Option<Stage>) {
        let expected = match stage {
            Stage::RetrievalPlanning => Stage::RetrievalExecution,
            Stage::OperatorPlanning => Stage::ActionExecution,
            _ => return,
        };
        if let Some(next) = next
            && next != expected
        {
            warn!(
                session_id = %state.session_id,
                %stage,
                %next,
                "Model did not request a tool; falling back"
            );
        }
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn generate(
        &self,
        stage: Stage,
        state: &mut SessionState,
    ) -> Result<StepOutcome, WorkflowError> {
        let instruction = self.prompts.instruction(stage).unwrap_or_default();
        let specs = ToolRegistry::specs_for(stage);
        let tools: &[ToolSpec] = &specs;

        let mut response = {
            let history = state.conversation.messages();
            self.retry
                .execute("generation", || {
                    self.generator.generate(instruction, history, tools)
                })
                .await?
        };
        response.role = Role::Assistant;
        response.tool_call_id = None;

        if stage.bound_tool().is_none() && response.has_tool_calls() {
            warn!(
                session_id = %state.session_id,
                %stage,
                calls = response.tool_calls.len(),
                "Discarding tool calls from a stage without tools"
            );
            response.tool_calls.clear();
        }

        assign_unique_call_ids(&mut response, &state.conversation);

        if response.is_empty() {
            warn!(session_id = %state.session_id, %stage, "Empty model response not recorded");
            return Ok(StepOutcome::Continue);
        }

        if stage == Stage::Diagnosis
            && let Some(text) = response.text()
        {
            state.diagnosis = Some(Diagnosis::parse(text));
        }

        tracing::debug!(
            session_id = %state.session_id,
            %stage,
            content_len = response.content.as_deref().map_or(0, str::len),
            tool_calls = response.tool_calls.len(),
            "Recorded model response"
        );
        state.conversation.push(response)?;
        Ok(StepOutcome::Continue)
    }

    async fn execute_retrieval(&self, state: &mut SessionState) -> Result<StepOutcome, WorkflowError> {
        for call in state.conversation.unresolved_calls() {
            if ToolRegistry::bound_kind(Stage::RetrievalPlanning, &call.name).is_none() {
                self.reject_unbound(state, &call)?;
                continue;
            }

            let outcome = self.tools.search(&call).await?;
            state.retrieved_documents += outcome.documents.len();
            state
                .conversation
                .push(Message::tool_result(&call.id, outcome.text))?;
        }
        Ok(StepOutcome::Continue)
    }

    /// Acts on the first action call of the operator request; further action
    /// calls in the same request are answered without executing.
    async fn execute_actions(&self, state: &mut SessionState) -> Result<StepOutcome, WorkflowError> {
        let primary = state
            .conversation
            .latest_request_calls()
            .iter()
            .find(|c| ToolRegistry::bound_kind(Stage::OperatorPlanning, &c.name).is_some())
            .map(|c| c.id.clone());

        for call in state.conversation.unresolved_calls() {
            if ToolRegistry::bound_kind(Stage::OperatorPlanning, &call.name).is_none() {
                self.reject_unbound(state, &call)?;
                continue;
            }
            if primary.as_deref() != Some(call.id.as_str()) {
                self.reject_extra_action(state, &call)?;
                continue;
            }

            let proposal = match ToolRegistry::parse_proposal(&call) {
                Ok(proposal) => proposal,
                Err(message) => {
                    warn!(session_id = %state.session_id, call_id = %call.id, "{message}");
                    state
                        .conversation
                        .push(Message::tool_result(&call.id, format!("❌ {message}")))?;
                    continue;
                }
            };

            match self.policy.evaluate(&proposal) {
                Disposition::Blocked { reason } => {
                    let text = self.tools.block_action(&call.id, &proposal, reason);
                    state
                        .conversation
                        .push(Message::tool_result(&call.id, &text))?;
                    state.record_action(&call.id, proposal, ActionOutcome::Blocked, &text);
                }
                Disposition::Permitted => {
                    let result = self.tools.execute_action(&call.id, &proposal).await;
                    let outcome = if result.succeeded {
                        ActionOutcome::Executed
                    } else {
                        ActionOutcome::Failed
                    };
                    state
                        .conversation
                        .push(Message::tool_result(&call.id, &result.message))?;
                    state.record_action(&call.id, proposal, outcome, &result.message);
                }
                Disposition::RequiresApproval => {
                    self.gate.suspend(state, &call.id, proposal)?;
                    return Ok(StepOutcome::Suspend);
                }
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn reject_extra_action(&self, state: &mut SessionState, call: &ToolCall) -> Result<(), WorkflowError> {
        warn!(
            session_id = %state.session_id,
            call_id = %call.id,
            "Ignoring additional action call; one action per run"
        );
        let action = ToolRegistry::parse_proposal(call)
            .map(|p| p.action)
            .unwrap_or_else(|_| call.name.clone());
        state.conversation.push(Message::tool_result(
            &call.id,
            format!(
                "❌ Action '{action}' was NOT executed.\nReason: Only one action can be applied per run."
            ),
        ))?;
        Ok(())
    }

    fn reject_unbound(&self, state: &mut SessionState, call: &ToolCall) -> Result<(), WorkflowError> {
        warn!(
            session_id = %state.session_id,
            tool = %call.name,
            call_id = %call.id,
            "Tool not bound to the requesting stage"
        );
        state.conversation.push(Message::tool_result(
            &call.id,
            format!("Error: tool '{}' is not available at this stage.", call.name),
        ))?;
        Ok(())
    }
}

/// Replace blank call ids, and ids already used in this response or earlier in
/// the conversation, so every tool result correlates with exactly one call.
fn assign_unique_call_ids(response: &mut Message, conversation: &ConversationState) {
    let mut seen = HashSet::new();
    for call in &mut response.tool_calls {
        let clashes = call.id.trim().is_empty()
            || conversation.find_call(&call.id).is_some()
            || !seen.insert(call.id.clone());
        if clashes {
            let fresh = ToolCall::fresh_id();
            warn!(old = %call.id, new = %fresh, "Reassigning tool call id");
            call.id = fresh;
            seen.insert(call.id.clone());
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct WorkflowEngineBuilder {
    generator: Option<Arc<dyn GenerationClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    retrieval: Option<Arc<dyn RetrievalClient>>,
    executor: Option<Arc<dyn ActionExecutor>>,
    store: Option<Arc<dyn SessionStore>>,
    prompts: Option<StagePrompts>,
    retry: Option<RetryPolicy>,
    approval_ttl_hours: Option<Option<u64>>,
    namespaces: Option<Vec<String>>,
    top_k: Option<usize>,
}

impl WorkflowEngineBuilder {
    pub fn generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn retrieval_client(mut self, retrieval: Arc<dyn RetrievalClient>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Defaults to [`SimulatedActionExecutor`].
    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the bundled prompts.
    pub fn prompts(mut self, prompts: StagePrompts) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// `None` disables expiry. Defaults to 24 hours.
    pub fn approval_ttl_hours(mut self, hours: Option<u64>) -> Self {
        self.approval_ttl_hours = Some(hours);
        self
    }

    pub fn namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn build(self) -> anyhow::Result<WorkflowEngine> {
        let generator = self.generator.context("a generation client is required")?;
        let embedder = self.embedder.context("an embedder is required")?;
        let retrieval = self.retrieval.context("a retrieval client is required")?;
        let retry = self.retry.unwrap_or_default();

        let mut retriever = KnowledgeRetriever::new(embedder, retrieval).with_retry(retry.clone());
        if let Some(namespaces) = self.namespaces {
            retriever = retriever.with_namespaces(namespaces);
        }
        if let Some(top_k) = self.top_k {
            retriever = retriever.with_top_k(top_k);
        }

        let prompts = match self.prompts {
            Some(prompts) => prompts,
            None => StagePrompts::bundled(retriever.namespaces())?,
        };

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SimulatedActionExecutor));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let gate = match self.approval_ttl_hours {
            Some(hours) => ApprovalGate::with_ttl_hours(hours),
            None => ApprovalGate::default(),
        };

        tracing::debug!(
            namespaces = ?retriever.namespaces(),
            tools = ?[ToolKind::Retrieval.name(), ToolKind::Action.name()],
            "Built workflow engine"
        );

        Ok(WorkflowEngine {
            generator,
            tools: ToolRegistry::new(retriever, executor),
            store,
            policy: ActionPolicy::new(),
            gate,
            prompts,
            retry,
            locks: SessionLocks::new(),
        })
    }
}
