use futures::future::BoxFuture;
use serde_json::{Map, Value};

use waypoint_core::error::Result;
use waypoint_core::traits::ToolExecutor;
use waypoint_core::types::SystemContext;

/// Increments a count kept in the calling activity's previous output.
///
/// Each visit of the same activity returns `count + step`. When `limit` is
/// given the output also carries `done`, which conditional branches use to
/// leave a reflection loop.
pub struct CounterTool;

impl ToolExecutor for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn run(
        &self,
        parameters: Map<String, Value>,
        ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        let previous = ctx
            .current_executor
            .as_deref()
            .and_then(|id| ctx.output(id))
            .filter(|r| r.is_success())
            .and_then(|r| r.data().get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Box::pin(async move {
            let step = parameters.get("step").and_then(Value::as_u64).unwrap_or(1);
            let count = previous + step;

            let mut out = Map::new();
            out.insert("count".into(), Value::from(count));
            if let Some(limit) = parameters.get("limit").and_then(Value::as_u64) {
                out.insert("done".into(), Value::Bool(count >= limit));
            }
            Ok(out)
        })
    }
}
