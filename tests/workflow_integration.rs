//! Integration tests for the incident workflow.
//!
//! These tests drive the engine end to end with scripted backends:
//! - Permitted, approved, rejected and blocked actions
//! - Zero-document diagnosis
//! - Suspension across engines sharing a file store
//! - Concurrent resumes, expiry and upstream failures

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use ops_pilot::clients::{Embedder, GenerationClient, RetrievalClient, RetryPolicy, UpstreamError};
use ops_pilot::models::{
    ActionProposal, Decision, Message, RetrievedDocument, Role, SessionId, ToolCall,
};
use ops_pilot::orchestrator::{
    APPROVAL_QUESTION, ActionOutcome, INSUFFICIENT_INFORMATION, RunResult, SessionState,
    SessionStatus, Stage, WorkflowEngine, WorkflowError,
};
use ops_pilot::store::{FileSessionStore, InMemorySessionStore, SessionStore};
use ops_pilot::tools::{ActionExecutor, NO_DOCUMENTS, ToolSpec};

// ============================================================================
// Fakes
// ============================================================================

/// Replays scripted responses in order and records what each call was offered.
#[derive(Default)]
struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<Message, UpstreamError>>>,
    offered_tools: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<Message>) -> Arc<Self> {
        let gen_ = Self::default();
        gen_.script
            .lock()
            .unwrap()
            .extend(responses.into_iter().map(Ok));
        Arc::new(gen_)
    }

    fn failing(count: usize) -> Arc<Self> {
        let gen_ = Self::default();
        gen_.script.lock().unwrap().extend((0..count).map(|_| {
            Err(UpstreamError::Status {
                status: 503,
                body: "model loading".to_string(),
            })
        }));
        Arc::new(gen_)
    }

    fn calls(&self) -> usize {
        self.offered_tools.lock().unwrap().len()
    }

    fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(
        &self,
        _instruction: &str,
        _history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, UpstreamError> {
        self.offered_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Message::assistant("(script exhausted)")))
    }
}

struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, UpstreamError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// Serves fixed documents per namespace.
#[derive(Default)]
struct FakeKnowledge {
    documents: HashMap<String, Vec<RetrievedDocument>>,
}

impl FakeKnowledge {
    fn with_guides() -> Arc<Self> {
        let mut documents = HashMap::new();
        documents.insert(
            "user-guide".to_string(),
            vec![doc("guide-1", "Attach AmazonS3ReadOnlyAccess to grant bucket reads.")],
        );
        documents.insert(
            "ticket".to_string(),
            vec![doc("ticket-7", "INC-7: Dev-App-Role lacked S3 read permissions.")],
        );
        Arc::new(Self { documents })
    }

    fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RetrievalClient for FakeKnowledge {
    async fn query(
        &self,
        _embedding: &[f32],
        namespace: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, UpstreamError> {
        Ok(self.documents.get(namespace).cloned().unwrap_or_default())
    }
}

fn doc(id: &str, text: &str) -> RetrievedDocument {
    let mut metadata = serde_json::Map::new();
    metadata.insert("text".to_string(), json!(text));
    RetrievedDocument {
        id: id.to_string(),
        namespace: String::new(),
        score: 0.9,
        metadata,
    }
}

/// Counts executions so tests can assert at-most-once side effects.
#[derive(Default)]
struct CountingExecutor {
    executed: AtomicUsize,
}

impl CountingExecutor {
    fn count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for CountingExecutor {
    async fn execute(&self, proposal: &ActionProposal) -> Result<String, String> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("✅ Action '{}' executed.", proposal.action))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn search_call(query: &str) -> Message {
    Message::assistant_tool_call(ToolCall::new("search_knowledge", json!({ "query": query })))
}

fn action_call(
    service: &str,
    configuration_item: &str,
    action: &str,
    reversible: bool,
    high_impact: bool,
) -> Message {
    Message::assistant_tool_call(ToolCall::new(
        "apply_cloud_action",
        json!({
            "service": service,
            "configurationItem": configuration_item,
            "action": action,
            "reversible": reversible,
            "highImpact": high_impact,
        }),
    ))
}

fn diagnosis(configuration_item: &str, action: &str) -> Message {
    Message::assistant(format!(
        "The role is missing a permission.\n\
         ROOT_CAUSE: missing policy\n\
         SERVICE: IAM\n\
         CONFIGURATION_ITEM: {configuration_item}\n\
         REQUIRED_ACTION: {action}"
    ))
}

/// Planner call, diagnosis, operator call and final explanation for one action.
fn full_script(action: Message, final_text: &str) -> Vec<Message> {
    vec![
        search_call("role cannot read bucket"),
        diagnosis("Dev-App-Role", "attach AmazonS3ReadOnlyAccess"),
        action,
        Message::assistant(final_text),
    ]
}

fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_backoff_ms: 0,
        max_backoff_ms: 0,
    }
}

struct Harness {
    engine: Arc<WorkflowEngine>,
    generator: Arc<ScriptedGenerator>,
    executor: Arc<CountingExecutor>,
    store: Arc<dyn SessionStore>,
}

fn harness(
    generator: Arc<ScriptedGenerator>,
    knowledge: Arc<FakeKnowledge>,
    store: Arc<dyn SessionStore>,
) -> Harness {
    let executor = Arc::new(CountingExecutor::default());
    let engine = WorkflowEngine::builder()
        .generator(generator.clone())
        .embedder(Arc::new(StaticEmbedder))
        .retrieval_client(knowledge)
        .executor(executor.clone())
        .store(store.clone())
        .retry(no_retry())
        .build()
        .unwrap();

    Harness {
        engine: Arc::new(engine),
        generator,
        executor,
        store,
    }
}

fn in_memory(script: Vec<Message>) -> Harness {
    harness(
        ScriptedGenerator::new(script),
        FakeKnowledge::with_guides(),
        Arc::new(InMemorySessionStore::new()),
    )
}

/// One assistant message carrying both action calls, in order.
fn two_actions(first: Message, second: Message) -> Message {
    let mut message = first;
    message.tool_calls.extend(second.tool_calls);
    message
}

fn tool_result_for<'a>(state: &'a SessionState, call_id: &str) -> Option<&'a str> {
    state
        .conversation
        .messages()
        .iter()
        .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
        .and_then(|m| m.content.as_deref())
}

fn expect_completed(result: RunResult) -> String {
    match result {
        RunResult::Completed { final_message, .. } => final_message,
        other => panic!("expected completed run, got {other:?}"),
    }
}

fn prod_admin_removal() -> Message {
    action_call(
        "IAM",
        "Prod-Admin-Role",
        "remove AdministratorAccess",
        true,
        true,
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_low_impact_action_executes_without_approval() {
    let h = in_memory(full_script(
        action_call(
            "IAM",
            "Dev-App-Role",
            "attach AmazonS3ReadOnlyAccess",
            true,
            false,
        ),
        "The read-only policy was attached to Dev-App-Role.",
    ));
    let id = SessionId::new("scenario-a");

    let result = h
        .engine
        .start(&id, "Dev-App-Role cannot read from S3")
        .await
        .unwrap();

    assert_eq!(
        expect_completed(result),
        "The read-only policy was attached to Dev-App-Role."
    );
    assert_eq!(h.executor.count(), 1);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.pending_approval.is_none());
    assert_eq!(state.retrieved_documents, 2);
    assert_eq!(state.actions.len(), 1);
    assert_eq!(state.actions[0].outcome, ActionOutcome::Executed);

    let parsed = state.diagnosis.unwrap();
    assert_eq!(parsed.configuration_item.as_deref(), Some("Dev-App-Role"));
    assert!(!parsed.insufficient_information);

    // Retrieved text reached the conversation as a tool result
    assert!(state.conversation.messages().iter().any(|m| {
        m.role == Role::Tool
            && m.content
                .as_deref()
                .is_some_and(|c| c.contains("INC-7"))
    }));
}

#[tokio::test]
async fn test_high_impact_action_suspends_then_executes_on_approve() {
    let h = in_memory(full_script(
        prod_admin_removal(),
        "AdministratorAccess was removed from Prod-Admin-Role.",
    ));
    let id = SessionId::new("scenario-b-approve");

    let pending = h
        .engine
        .start(&id, "Prod-Admin-Role is over-privileged")
        .await
        .unwrap();

    let RunResult::Pending { approval } = pending else {
        panic!("expected pending run");
    };
    assert_eq!(approval.session_id, id);
    assert_eq!(approval.question, APPROVAL_QUESTION);
    assert_eq!(approval.proposal.configuration_item, "Prod-Admin-Role");
    assert!(approval.expires_at.is_some());
    assert_eq!(h.executor.count(), 0);

    let suspended = h.engine.status(&id).await.unwrap();
    assert_eq!(suspended.status, SessionStatus::AwaitingApproval);
    assert!(suspended.pending_approval.is_some());

    let result = h.engine.resume(&id, Decision::Approve).await.unwrap();

    assert_eq!(
        expect_completed(result),
        "AdministratorAccess was removed from Prod-Admin-Role."
    );
    assert_eq!(h.executor.count(), 1);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.pending_approval.is_none());
    assert_eq!(state.actions[0].outcome, ActionOutcome::Executed);
}

#[tokio::test]
async fn test_high_impact_action_rejected_is_never_executed() {
    let h = in_memory(full_script(
        prod_admin_removal(),
        "The change was not applied because it was rejected.",
    ));
    let id = SessionId::new("scenario-b-reject");

    let pending = h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();
    assert!(pending.is_pending());

    let result = h.engine.resume(&id, Decision::Reject).await.unwrap();
    expect_completed(result);
    assert_eq!(h.executor.count(), 0);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.actions[0].outcome, ActionOutcome::Rejected);
    let refusal = state
        .conversation
        .messages()
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .and_then(|m| m.content.clone())
        .unwrap();
    assert!(refusal.contains("NOT executed"));
    assert!(refusal.contains("High impact action rejected by human"));
}

#[tokio::test]
async fn test_irreversible_action_is_blocked_without_approval() {
    let h = in_memory(full_script(
        action_call("IAM", "contractor-temp-user", "delete user", false, false),
        "Deleting the user is irreversible, so it was not done.",
    ));
    let id = SessionId::new("scenario-c");

    let result = h
        .engine
        .start(&id, "Remove the contractor account")
        .await
        .unwrap();

    expect_completed(result);
    assert_eq!(h.executor.count(), 0);

    let state = h.engine.status(&id).await.unwrap();
    assert!(state.pending_approval.is_none());
    assert_eq!(state.actions[0].outcome, ActionOutcome::Blocked);
    assert!(state.actions[0].detail.contains("Action is irreversible."));
}

#[tokio::test]
async fn test_irreversible_high_impact_action_is_blocked() {
    let h = in_memory(full_script(
        action_call("RDS", "prod-db", "drop database", false, true),
        "Dropping the database is irreversible.",
    ));
    let id = SessionId::new("blocked-high-impact");

    let result = h.engine.start(&id, "prod-db is full").await.unwrap();

    assert!(!result.is_pending());
    assert_eq!(h.executor.count(), 0);
    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.actions[0].outcome, ActionOutcome::Blocked);
}

#[tokio::test]
async fn test_no_documents_yields_insufficient_information() {
    let generator = ScriptedGenerator::new(vec![
        search_call("unknown service error"),
        Message::assistant("No action can be proposed without a diagnosis."),
        Message::assistant("There is not enough information to diagnose this issue."),
    ]);
    let h = harness(
        generator,
        FakeKnowledge::empty(),
        Arc::new(InMemorySessionStore::new()),
    );
    let id = SessionId::new("scenario-d");

    let result = h.engine.start(&id, "Something is broken").await.unwrap();

    expect_completed(result);
    // Planner, operator and final response; diagnosis needs no model call
    assert_eq!(h.generator.calls(), 3);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.retrieved_documents, 0);
    assert!(state.diagnosis.unwrap().insufficient_information);

    let texts: Vec<_> = state
        .conversation
        .messages()
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect();
    assert!(texts.contains(&NO_DOCUMENTS));
    assert!(texts.contains(&INSUFFICIENT_INFORMATION));
}

// ============================================================================
// Suspension and Resume
// ============================================================================

#[tokio::test]
async fn test_resume_twice_fails_with_no_pending_approval() {
    let h = in_memory(full_script(prod_admin_removal(), "Done."));
    let id = SessionId::new("double-resume");

    h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();
    h.engine.resume(&id, Decision::Approve).await.unwrap();

    let err = h.engine.resume(&id, Decision::Approve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NoPendingApproval { .. }));
    assert_eq!(h.executor.count(), 1);
}

#[tokio::test]
async fn test_resume_never_started_session() {
    let h = in_memory(Vec::new());

    let err = h
        .engine
        .resume(&SessionId::new("never-started"), Decision::Approve)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::NoPendingApproval { .. }));
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_resume_on_fresh_engine_with_file_store() {
    let temp = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new(full_script(
        prod_admin_removal(),
        "AdministratorAccess was removed.",
    ));
    let id = SessionId::new("cross-process");

    // First process suspends
    {
        let first = harness(
            generator.clone(),
            FakeKnowledge::with_guides(),
            Arc::new(FileSessionStore::new(temp.path())),
        );
        let result = first.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();
        assert!(result.is_pending());
    }

    assert!(temp.path().join("cross-process/session-state.json").exists());

    // Second process resumes from disk
    let second = harness(
        generator.clone(),
        FakeKnowledge::with_guides(),
        Arc::new(FileSessionStore::new(temp.path())),
    );
    let result = second.engine.resume(&id, Decision::Approve).await.unwrap();

    assert_eq!(expect_completed(result), "AdministratorAccess was removed.");
    assert_eq!(second.executor.count(), 1);
    assert_eq!(generator.remaining(), 0);
}

#[tokio::test]
async fn test_concurrent_resumes_execute_once() {
    let h = in_memory(full_script(prod_admin_removal(), "Done."));
    let id = SessionId::new("concurrent");

    h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();

    let (a, b) = futures::join!(
        h.engine.resume(&id, Decision::Approve),
        h.engine.resume(&id, Decision::Approve),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(WorkflowError::NoPendingApproval { .. })
    )));
    assert_eq!(h.executor.count(), 1);
}

#[tokio::test]
async fn test_start_while_suspended_is_rejected() {
    let h = in_memory(full_script(prod_admin_removal(), "Done."));
    let id = SessionId::new("busy");

    h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();

    let err = h.engine.start(&id, "Another issue").await.unwrap_err();
    assert!(matches!(err, WorkflowError::ApprovalAlreadyPending { .. }));

    // The suspension survives the refused start
    let state = h.engine.status(&id).await.unwrap();
    assert!(state.pending_approval.is_some());
}

#[tokio::test]
async fn test_expired_approval_is_treated_as_rejection() {
    let h = in_memory(full_script(prod_admin_removal(), "The request expired."));
    let id = SessionId::new("expired");

    h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();

    // Move the deadline into the past
    let mut state = h.store.load(&id).await.unwrap().unwrap();
    if let Some(request) = state.pending_approval.as_mut() {
        request.expires_at = Some(request.created_at - chrono::Duration::hours(1));
    }
    h.store.save(&state).await.unwrap();

    let result = h.engine.resume(&id, Decision::Approve).await.unwrap();

    expect_completed(result);
    assert_eq!(h.executor.count(), 0);
    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.actions[0].outcome, ActionOutcome::Expired);
}

#[tokio::test]
async fn test_session_continues_across_runs() {
    let mut script = full_script(
        action_call(
            "IAM",
            "Dev-App-Role",
            "attach AmazonS3ReadOnlyAccess",
            true,
            false,
        ),
        "Attached.",
    );
    script.extend(full_script(
        action_call("S3", "dev-bucket", "enable versioning", true, false),
        "Versioning enabled.",
    ));
    let h = in_memory(script);
    let id = SessionId::new("multi-run");

    h.engine.start(&id, "Dev-App-Role cannot read from S3").await.unwrap();
    let second = h.engine.start(&id, "Also enable versioning").await.unwrap();

    assert_eq!(expect_completed(second), "Versioning enabled.");
    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.runs, 2);
    assert_eq!(state.actions.len(), 2);
    assert_eq!(
        state.conversation.last_user_text(),
        Some("Also enable versioning")
    );
}

// ============================================================================
// Routing and Tool Binding
// ============================================================================

#[tokio::test]
async fn test_planner_without_tool_call_falls_back_to_diagnosis() {
    let h = in_memory(vec![
        Message::assistant("I think this is an IAM issue."),
        Message::assistant("Nothing to change."),
        Message::assistant("No action was needed."),
    ]);
    let id = SessionId::new("fallback");

    let result = h.engine.start(&id, "Is my role fine?").await.unwrap();

    assert_eq!(expect_completed(result), "No action was needed.");
    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.retrieved_documents, 0);
    assert!(state.diagnosis.unwrap().insufficient_information);
}

#[tokio::test]
async fn test_each_stage_is_offered_only_its_tool() {
    let h = in_memory(full_script(
        action_call("IAM", "Dev-App-Role", "attach policy", true, false),
        "Done.",
    ));

    h.engine
        .start(&SessionId::new("binding"), "Dev-App-Role cannot read from S3")
        .await
        .unwrap();

    let offered = h.generator.offered_tools.lock().unwrap().clone();
    assert_eq!(
        offered,
        vec![
            vec!["search_knowledge".to_string()],
            vec![],
            vec!["apply_cloud_action".to_string()],
            vec![],
        ]
    );
}

#[tokio::test]
async fn test_action_requested_by_planner_is_refused() {
    let h = in_memory(vec![
        action_call("IAM", "Prod-Admin-Role", "remove AdministratorAccess", true, true),
        Message::assistant("Nothing to change."),
        Message::assistant("No action was taken."),
    ]);
    let id = SessionId::new("unbound");

    let result = h.engine.start(&id, "Prod-Admin-Role is over-privileged").await.unwrap();

    expect_completed(result);
    assert_eq!(h.executor.count(), 0);
    let state = h.engine.status(&id).await.unwrap();
    assert!(state.actions.is_empty());
    assert!(state.conversation.messages().iter().any(|m| {
        m.content
            .as_deref()
            .is_some_and(|c| c.contains("not available at this stage"))
    }));
}

#[tokio::test]
async fn test_malformed_proposal_gets_error_result() {
    let h = in_memory(full_script(
        Message::assistant_tool_call(ToolCall::new(
            "apply_cloud_action",
            json!({ "service": "IAM" }),
        )),
        "The proposal was invalid.",
    ));
    let id = SessionId::new("malformed");

    let result = h.engine.start(&id, "Fix the role").await.unwrap();

    expect_completed(result);
    assert_eq!(h.executor.count(), 0);
    let state = h.engine.status(&id).await.unwrap();
    assert!(state.actions.is_empty());
}

#[tokio::test]
async fn test_second_high_impact_call_is_refused_after_reject() {
    let operator = two_actions(
        prod_admin_removal(),
        action_call("IAM", "Prod-Ops-Role", "remove AdministratorAccess", true, true),
    );
    let extra_id = operator.tool_calls[1].id.clone();
    let h = in_memory(full_script(operator, "Neither change was applied."));
    let id = SessionId::new("two-high-impact");

    let pending = h.engine.start(&id, "Two roles are over-privileged").await.unwrap();
    let RunResult::Pending { approval } = pending else {
        panic!("expected pending run");
    };
    assert_eq!(approval.proposal.configuration_item, "Prod-Admin-Role");

    let result = h.engine.resume(&id, Decision::Reject).await.unwrap();

    assert_eq!(expect_completed(result), "Neither change was applied.");
    assert_eq!(h.executor.count(), 0);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.pending_approval.is_none());
    assert_eq!(state.actions.len(), 1);
    assert_eq!(state.actions[0].outcome, ActionOutcome::Rejected);
    assert!(state.conversation.unresolved_calls().is_empty());

    let refusal = tool_result_for(&state, &extra_id).unwrap();
    assert!(refusal.contains("NOT executed"));
    assert!(refusal.contains("Only one action can be applied per run"));
}

#[tokio::test]
async fn test_only_first_permitted_action_executes() {
    let operator = two_actions(
        action_call("IAM", "Dev-App-Role", "attach AmazonS3ReadOnlyAccess", true, false),
        action_call("IAM", "Dev-Web-Role", "attach AmazonS3ReadOnlyAccess", true, false),
    );
    let extra_id = operator.tool_calls[1].id.clone();
    let h = in_memory(full_script(operator, "Dev-App-Role can now read the bucket."));
    let id = SessionId::new("two-permitted");

    let result = h.engine.start(&id, "Dev roles cannot read from S3").await.unwrap();

    expect_completed(result);
    assert_eq!(h.executor.count(), 1);

    let state = h.engine.status(&id).await.unwrap();
    assert_eq!(state.actions.len(), 1);
    assert_eq!(state.actions[0].proposal.configuration_item, "Dev-App-Role");
    assert!(
        tool_result_for(&state, &extra_id)
            .unwrap()
            .contains("Only one action can be applied per run")
    );
}

#[tokio::test]
async fn test_duplicate_call_ids_are_reassigned() {
    let mut planner = Message::assistant_tool_call(
        ToolCall::new("search_knowledge", json!({ "query": "s3 403" })).with_id("dup"),
    );
    planner.tool_calls.push(
        ToolCall::new("search_knowledge", json!({ "query": "iam role s3" })).with_id("dup"),
    );
    let h = in_memory(vec![
        planner,
        diagnosis("Dev-App-Role", "attach AmazonS3ReadOnlyAccess"),
        Message::assistant("No change is needed yet."),
        Message::assistant("Review the role policy."),
    ]);
    let id = SessionId::new("duplicate-ids");

    let result = h.engine.start(&id, "Dev-App-Role cannot read from S3").await.unwrap();

    assert_eq!(expect_completed(result), "Review the role policy.");
    let state = h.engine.status(&id).await.unwrap();
    let calls: Vec<_> = state
        .conversation
        .messages()
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .collect();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].id, calls[1].id);
    assert!(calls.iter().all(|c| state.conversation.has_result(&c.id)));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_upstream_failure_marks_session_failed() {
    let h = harness(
        ScriptedGenerator::failing(3),
        FakeKnowledge::with_guides(),
        Arc::new(InMemorySessionStore::new()),
    );
    let id = SessionId::new("upstream-down");

    let err = h.engine.start(&id, "Dev-App-Role cannot read").await.unwrap_err();

    match err {
        WorkflowError::UpstreamUnavailable {
            service, attempts, ..
        } => {
            assert_eq!(service, "generation");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let state = h.engine.status(&id).await.unwrap();
    assert!(matches!(
        state.status,
        SessionStatus::Failed {
            stage: Stage::RetrievalPlanning,
            ..
        }
    ));
}

#[tokio::test]
async fn test_invalid_session_id_is_rejected() {
    let h = in_memory(Vec::new());
    let err = h
        .engine
        .start(&SessionId::new("../escape"), "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidSessionId(_)));
}

#[tokio::test]
async fn test_list_sessions_most_recent_first() {
    let h = in_memory(vec![
        Message::assistant("a"),
        Message::assistant("b"),
        Message::assistant("c"),
        Message::assistant("d"),
        Message::assistant("e"),
        Message::assistant("f"),
    ]);

    h.engine.start(&SessionId::new("older"), "first").await.unwrap();
    h.engine.start(&SessionId::new("newer"), "second").await.unwrap();

    let sessions = h.engine.list_sessions().await.unwrap();
    let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);
}
