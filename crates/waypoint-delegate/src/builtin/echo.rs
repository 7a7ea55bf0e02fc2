use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use waypoint_core::error::Result;
use waypoint_core::traits::{ModelExecutor, ToolExecutor};
use waypoint_core::types::{ModelDelta, ModelRequest, Role, SystemContext};

/// Returns its parameters unchanged.
pub struct EchoTool;

impl ToolExecutor for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn run(
        &self,
        parameters: Map<String, Value>,
        _ctx: &SystemContext,
    ) -> BoxFuture<'_, Result<Map<String, Value>>> {
        Box::pin(async move { Ok(parameters) })
    }
}

/// Offline model that replies with the last user message.
pub struct EchoModel;

impl ModelExecutor for EchoModel {
    fn model(&self) -> &str {
        "echo"
    }

    fn invoke(
        &self,
        request: ModelRequest,
        _ctx: &SystemContext,
    ) -> BoxStream<'_, Result<ModelDelta>> {
        let reply = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let input_tokens = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let output_tokens = reply.split_whitespace().count() as u64;

        let deltas = vec![
            Ok(ModelDelta::Text(reply)),
            Ok(ModelDelta::Usage {
                input_tokens,
                output_tokens,
            }),
            Ok(ModelDelta::Stop("end_turn".to_string())),
        ];
        Box::pin(futures::stream::iter(deltas))
    }
}
