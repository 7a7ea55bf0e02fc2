use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use waypoint_core::traits::TaskStore;
use waypoint_core::{InvokeMode, StepResult, SystemContext, WaypointError};
use waypoint_delegate::{Delegations, ModelRegistry, ToolRegistry};
use waypoint_engine::{
    AsyncTaskCoordinator, FlowDefinition, FlowRunner, RunOutcome, SqliteTaskStore,
};
use waypoint_test_utils::{MockTool, RecordingSubmitter};

const INGEST_FLOW: &str = r#"
root = "ingest"

[[nodes]]
id = "ingest"
delegation = "tool"
[nodes.properties]
tool = "import_csv"
parameters = '[{"name": "file", "value": "sales.csv"}]'
[[nodes.branches]]
when = "on_success"
to = "announce"
[[nodes.branches]]
when = "on_failure"
to = "alert"

[[nodes]]
id = "announce"
delegation = "model"
[nodes.properties]
model = "echo"
prompt = "import finished"

[[nodes]]
id = "alert"
delegation = "tool"
[nodes.properties]
tool = "echo"
parameters = [{ name = "level", value = "page" }]
"#;

fn load_flow() -> waypoint_engine::FlowGraph {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(INGEST_FLOW.as_bytes()).expect("write flow");
    FlowDefinition::load(tmp.path())
        .expect("load flow")
        .into_graph()
        .expect("build graph")
}

fn runner(store: Arc<SqliteTaskStore>) -> FlowRunner {
    let tools = ToolRegistry::with_builtins();
    tools.register_tool(MockTool::new("import_csv").returning(json!({"rows": 120})));
    let delegations = Delegations::standard(
        Arc::new(tools),
        Arc::new(ModelRegistry::with_builtins()),
        Duration::from_secs(5),
    );
    let coordinator = Arc::new(AsyncTaskCoordinator::new(
        store,
        Arc::new(RecordingSubmitter::new()),
    ));
    FlowRunner::new(delegations).with_coordinator(coordinator)
}

/// Pause on the first node, then resume from a freshly opened store.
async fn paused_run(db: &std::path::Path) -> uuid::Uuid {
    let store = Arc::new(SqliteTaskStore::open(db).expect("open store"));
    let outcome = runner(store.clone())
        .run(&load_flow(), SystemContext::new(InvokeMode::Async))
        .await
        .expect("run");

    let RunOutcome::Paused { task_id, node_id, trace, .. } = outcome else {
        panic!("expected the run to pause");
    };
    assert_eq!(node_id, "ingest");
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].result.task_id(), Some(task_id));
    assert_eq!(store.pending_count().expect("count"), 1);
    task_id
}

#[tokio::test]
async fn test_resume_after_store_reopen() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = dir.path().join("tasks.db");
    let task_id = paused_run(&db).await;

    let store = Arc::new(SqliteTaskStore::open(&db).expect("reopen store"));
    let task = store.load(task_id).await.expect("load").expect("task persisted");
    assert_eq!(task.activity_id, "ingest");
    assert_eq!(task.process_ref.as_ref().map(|p| p.node_id.as_str()), Some("ingest"));

    let resumed = runner(store.clone())
        .resume(&load_flow(), task_id, StepResult::success(json!({"rows": 120})))
        .await
        .expect("resume");

    // the next node is async too
    let RunOutcome::Paused { node_id, context, .. } = &resumed else {
        panic!("announce should hand off");
    };
    assert_eq!(node_id, "announce");
    assert_eq!(context.lookup("ingest.data.rows"), Some(json!(120)));
    assert!(store.load(task_id).await.expect("load").is_none());
}

#[tokio::test]
async fn test_failed_callback_routes_to_failure_branch() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = dir.path().join("tasks.db");
    let task_id = paused_run(&db).await;

    let store = Arc::new(SqliteTaskStore::open(&db).expect("reopen store"));
    let failure = StepResult::fail(&WaypointError::ToolExecution {
        tool: "import_csv".into(),
        message: "malformed row 7".into(),
    });
    let resumed = runner(store)
        .resume(&load_flow(), task_id, failure)
        .await
        .expect("resume");

    let visited: Vec<_> = resumed.trace().iter().map(|v| v.node_id.as_str()).collect();
    assert_eq!(visited, vec!["ingest", "alert"]);
    assert!(!resumed.context().output("ingest").expect("recorded").is_success());
}

#[tokio::test]
async fn test_task_resumes_only_once() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = dir.path().join("tasks.db");
    let task_id = paused_run(&db).await;

    let store = Arc::new(SqliteTaskStore::open(&db).expect("reopen store"));
    let runner = runner(store);
    let graph = load_flow();
    runner
        .resume(&graph, task_id, StepResult::success(json!({})))
        .await
        .expect("first resume");

    let err = runner
        .resume(&graph, task_id, StepResult::success(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WaypointError::TaskNotFound(_)));
}

const GATED_FLOW: &str = r#"
root = "score"

[[nodes]]
id = "score"
delegation = "tool"
next = "gate"
[nodes.properties]
tool = "echo"

[[nodes]]
id = "gate"
delegation = "tool"
[nodes.properties]
tool = "echo"
[[nodes.branches]]
when = "score.data.score >= 5"
to = "ship"
[[nodes.branches]]
when = "score.data.score < 5"
to = "hold"

[[nodes]]
id = "ship"
delegation = "tool"
[nodes.properties]
tool = "echo"

[[nodes]]
id = "hold"
delegation = "tool"
[nodes.properties]
tool = "echo"
"#;

#[tokio::test]
async fn test_outputs_before_pause_drive_branches_after_resume() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = dir.path().join("tasks.db");
    let graph = FlowDefinition::parse(GATED_FLOW)
        .expect("parse flow")
        .into_graph()
        .expect("build graph");

    let open = || Arc::new(SqliteTaskStore::open(&db).expect("open store"));

    let outcome = runner(open())
        .run(&graph, SystemContext::new(InvokeMode::Async))
        .await
        .expect("run");
    let RunOutcome::Paused { task_id, .. } = outcome else {
        panic!("score should hand off");
    };

    // score's callback is recorded, then gate pauses with it in its context
    let outcome = runner(open())
        .resume(&graph, task_id, StepResult::success(json!({"score": 9})))
        .await
        .expect("resume score");
    let RunOutcome::Paused { task_id, node_id, .. } = outcome else {
        panic!("gate should hand off");
    };
    assert_eq!(node_id, "gate");

    let store = open();
    let task = store.load(task_id).await.expect("load").expect("gate task persisted");
    assert_eq!(
        task.system_context.lookup("score.data.score"),
        Some(json!(9))
    );

    let outcome = runner(store)
        .resume(&graph, task_id, StepResult::success(json!({})))
        .await
        .expect("resume gate");
    let visited: Vec<_> = outcome.trace().iter().map(|v| v.node_id.as_str()).collect();
    assert_eq!(visited, vec!["gate", "ship"]);
}
