use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{
    ModelDelta, ModelRequest, ModelResponse, Request, ResultStream, StepResult, SystemContext,
    Usage,
};

use crate::registry::{ModelRegistry, ToolRegistry};
use crate::request::{GenerateRequest, ToolRequest};

/// A kind of work an activity can delegate to.
pub trait Delegation: Send + Sync + 'static {
    /// Delegation kind, e.g. `"tool"` or `"model"`.
    fn kind(&self) -> &str;

    /// Shape the raw activity properties into this kind's parameter map.
    fn generate_params(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>>;

    /// Build the lazy result of running `request`.
    ///
    /// The returned stream never fails: resolution and execution errors
    /// come back as a failed [`StepResult`].
    fn dispatch(&self, request: Request, ctx: SystemContext) -> ResultStream;
}

/// Runs a registered tool.
pub struct ToolDelegation {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolDelegation {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }
}

impl Delegation for ToolDelegation {
    fn kind(&self) -> &str {
        "tool"
    }

    fn generate_params(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>> {
        ToolRequest::generate_params(raw)
    }

    fn dispatch(&self, request: Request, ctx: SystemContext) -> ResultStream {
        let registry = Arc::clone(&self.registry);
        let default_timeout = self.default_timeout;

        Box::pin(async move {
            match run_tool(&registry, default_timeout, request, &ctx).await {
                Ok(output) => StepResult::success(Value::Object(output)),
                Err(e) => {
                    warn!(error = %e, "Tool delegation failed");
                    StepResult::fail(&e)
                }
            }
        })
    }
}

async fn run_tool(
    registry: &ToolRegistry,
    default_timeout: Duration,
    request: Request,
    ctx: &SystemContext,
) -> Result<Map<String, Value>> {
    let req: ToolRequest = serde_json::from_value(Value::Object(request.param))
        .map_err(|e| WaypointError::InvalidRequest(e.to_string()))?;
    let tool = registry.resolve(&req.tool)?;

    let timeout = tool
        .timeout_secs()
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    debug!(tool = %req.tool, timeout_secs = timeout.as_secs(), "Running tool");

    match tokio::time::timeout(timeout, tool.run(req.parameters, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(WaypointError::ToolTimeout {
            tool: req.tool,
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Invokes a registered model and drains its response stream.
pub struct ModelDelegation {
    registry: Arc<ModelRegistry>,
}

impl ModelDelegation {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

impl Delegation for ModelDelegation {
    fn kind(&self) -> &str {
        "model"
    }

    fn generate_params(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>> {
        ModelRequest::generate_params(raw)
    }

    fn dispatch(&self, request: Request, ctx: SystemContext) -> ResultStream {
        let registry = Arc::clone(&self.registry);

        Box::pin(async move {
            let response = match invoke_model(&registry, request, &ctx).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Model delegation failed");
                    return StepResult::fail(&e);
                }
            };
            match serde_json::to_value(response) {
                Ok(data) => StepResult::success(data),
                Err(e) => StepResult::fail(&WaypointError::Json(e)),
            }
        })
    }
}

async fn invoke_model(
    registry: &ModelRegistry,
    request: Request,
    ctx: &SystemContext,
) -> Result<ModelResponse> {
    let req: ModelRequest = serde_json::from_value(Value::Object(request.param))
        .map_err(|e| WaypointError::InvalidRequest(e.to_string()))?;
    let model = registry.resolve(&req.model)?;

    debug!(model = %req.model, messages = req.messages.len(), "Invoking model");

    let mut response = ModelResponse {
        model: req.model.clone(),
        ..Default::default()
    };

    let mut stream = model.invoke(req, ctx);
    while let Some(delta) = stream.next().await {
        match delta? {
            ModelDelta::Text(text) => response.content.push_str(&text),
            ModelDelta::Usage {
                input_tokens,
                output_tokens,
            } => {
                response.usage = Some(Usage {
                    input_tokens,
                    output_tokens,
                })
            }
            ModelDelta::Stop(reason) => response.finish_reason = Some(reason),
        }
    }

    Ok(response)
}

/// Delegations available to activities, keyed by kind.
#[derive(Clone, Default)]
pub struct Delegations {
    kinds: HashMap<String, Arc<dyn Delegation>>,
}

impl Delegations {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tool and model delegations over the given registries.
    pub fn standard(
        tools: Arc<ToolRegistry>,
        models: Arc<ModelRegistry>,
        tool_timeout: Duration,
    ) -> Self {
        let mut set = Self::new();
        set.insert(Arc::new(ToolDelegation::new(tools, tool_timeout)));
        set.insert(Arc::new(ModelDelegation::new(models)));
        set
    }

    pub fn insert(&mut self, delegation: Arc<dyn Delegation>) {
        self.kinds.insert(delegation.kind().to_string(), delegation);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Delegation>> {
        self.kinds.get(kind).cloned()
    }
}
