pub mod context;
pub mod coordinator;
pub mod graph;
pub mod step;
pub mod task_store;
pub mod worker;

pub use context::{keys, NodeContext, VisitState};
pub use coordinator::AsyncTaskCoordinator;
pub use graph::{
    Activity, Condition, FlowDefinition, FlowGraph, FlowNode, FlowRunner, NodeVisit, RunOutcome,
};
pub use step::StepExecutor;
pub use task_store::SqliteTaskStore;
pub use worker::{AsyncWorker, Callback, ChannelSubmitter};
