use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ProcessRef, ResultStream, StepResult, SystemContext};

/// Handshake keys understood by [`NodeContext::apply_handshake`].
pub mod keys {
    pub const SYSTEM_CONTEXT: &str = "SYSTEM_CONTEXT";
    pub const IS_CALLBACK: &str = "IS_CALLBACK";
    pub const CALLBACK_RESULT: &str = "CALLBACK_RESULT";
    pub const INVOKE_RESULT: &str = "INVOKE_RESULT";
    pub const ORIGIN_REQUEST: &str = "ORIGIN_REQUEST";
}

/// What a visit has to do, decided once when the step executor is entered.
pub enum VisitState {
    /// No prior work: build and run the request.
    Fresh,
    /// A partial step on the same node left a result to continue from.
    Chained(ResultStream),
    /// An async task finished; its result re-enters the graph.
    Resuming(StepResult),
}

impl std::fmt::Debug for VisitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "Fresh"),
            Self::Chained(_) => write!(f, "Chained(..)"),
            Self::Resuming(result) => f.debug_tuple("Resuming").field(result).finish(),
        }
    }
}

/// Per-visit context handed to the step executor by the graph engine.
pub struct NodeContext {
    pub activity_id: String,
    pub system_context: SystemContext,
    /// Raw activity properties ("request so far").
    pub request: Map<String, Value>,
    /// Read back by the graph engine after the visit.
    pub response: Map<String, Value>,
    /// Where this run will resume if the visit pauses.
    pub process_ref: Option<ProcessRef>,
    callback: Option<StepResult>,
    pending: Option<ResultStream>,
    need_pause: bool,
}

impl NodeContext {
    pub fn new(activity_id: impl Into<String>, system_context: SystemContext) -> Self {
        Self {
            activity_id: activity_id.into(),
            system_context,
            request: Map::new(),
            response: Map::new(),
            process_ref: None,
            callback: None,
            pending: None,
            need_pause: false,
        }
    }

    pub fn with_request(mut self, request: Map<String, Value>) -> Self {
        self.request = request;
        self
    }

    /// Mark this visit as the callback of a completed async task.
    pub fn resume_with(&mut self, result: StepResult) {
        self.callback = Some(result);
    }

    pub fn is_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Leave a pending result for the next step on this node, replacing
    /// any previous one.
    pub fn attach(&mut self, stream: ResultStream) {
        self.pending = Some(stream);
    }

    pub fn take_pending(&mut self) -> Option<ResultStream> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Ask the graph engine to suspend this run.
    pub fn request_pause(&mut self) {
        self.need_pause = true;
    }

    pub fn need_pause(&self) -> bool {
        self.need_pause
    }

    /// Decide the visit state, consuming the callback or pending result.
    ///
    /// A callback takes priority. Any pending result is dropped unpolled
    /// in that case, so its work never runs.
    pub fn take_visit_state(&mut self) -> VisitState {
        if let Some(result) = self.callback.take() {
            self.pending = None;
            return VisitState::Resuming(result);
        }
        match self.pending.take() {
            Some(stream) => VisitState::Chained(stream),
            None => VisitState::Fresh,
        }
    }

    /// Apply a handshake map produced by a foreign graph engine.
    pub fn apply_handshake(&mut self, map: &Map<String, Value>) -> Result<()> {
        if let Some(value) = map.get(keys::SYSTEM_CONTEXT) {
            self.system_context = serde_json::from_value(value.clone())?;
        }

        if let Some(origin) = map.get(keys::ORIGIN_REQUEST) {
            let Value::Object(origin) = origin else {
                return Err(WaypointError::InvalidRequest(format!(
                    "{} must be an object",
                    keys::ORIGIN_REQUEST
                )));
            };
            for (k, v) in origin {
                self.request.insert(k.clone(), v.clone());
            }
        }

        let is_callback = map
            .get(keys::IS_CALLBACK)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_callback {
            let result = map.get(keys::CALLBACK_RESULT).ok_or_else(|| {
                WaypointError::InvalidRequest(format!(
                    "{} set without {}",
                    keys::IS_CALLBACK,
                    keys::CALLBACK_RESULT
                ))
            })?;
            self.callback = Some(serde_json::from_value(result.clone())?);
        }

        Ok(())
    }

    /// The terminal result written by the last `execute`, if any.
    pub fn invoke_result(&self) -> Option<StepResult> {
        self.response
            .get(keys::INVOKE_RESULT)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn into_system_context(self) -> SystemContext {
        self.system_context
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("activity_id", &self.activity_id)
            .field("system_context", &self.system_context)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("process_ref", &self.process_ref)
            .field("callback", &self.callback)
            .field("pending", &self.pending.is_some())
            .field("need_pause", &self.need_pause)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use waypoint_core::types::InvokeMode;

    #[test]
    fn test_fresh_by_default() {
        let mut ctx = NodeContext::new("n1", SystemContext::default());
        assert!(matches!(ctx.take_visit_state(), VisitState::Fresh));
    }

    #[test]
    fn test_callback_wins_over_pending() {
        let mut ctx = NodeContext::new("n1", SystemContext::default());
        ctx.attach(futures::future::ready(StepResult::success(json!(1))).boxed());
        ctx.resume_with(StepResult::success(json!(2)));

        match ctx.take_visit_state() {
            VisitState::Resuming(result) => assert_eq!(result.data(), &json!(2)),
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(!ctx.has_pending());
        assert!(!ctx.is_callback());
    }

    #[test]
    fn test_pending_becomes_chained() {
        let mut ctx = NodeContext::new("n1", SystemContext::default());
        ctx.attach(futures::future::ready(StepResult::success(json!(1))).boxed());
        assert!(matches!(ctx.take_visit_state(), VisitState::Chained(_)));
        assert!(matches!(ctx.take_visit_state(), VisitState::Fresh));
    }

    #[test]
    fn test_apply_handshake() {
        let sys = SystemContext::new(InvokeMode::Async);
        let mut map = Map::new();
        map.insert(keys::SYSTEM_CONTEXT.into(), serde_json::to_value(&sys).unwrap());
        map.insert(keys::ORIGIN_REQUEST.into(), json!({"tool": "echo"}));
        map.insert(keys::IS_CALLBACK.into(), json!(true));
        map.insert(
            keys::CALLBACK_RESULT.into(),
            serde_json::to_value(StepResult::success(json!("late"))).unwrap(),
        );

        let mut ctx = NodeContext::new("n1", SystemContext::default());
        ctx.apply_handshake(&map).unwrap();

        assert_eq!(ctx.system_context.invoke_mode, Some(InvokeMode::Async));
        assert_eq!(ctx.request.get("tool"), Some(&json!("echo")));
        assert!(ctx.is_callback());
    }

    #[test]
    fn test_handshake_callback_without_result() {
        let mut map = Map::new();
        map.insert(keys::IS_CALLBACK.into(), json!(true));
        let mut ctx = NodeContext::new("n1", SystemContext::default());
        assert!(ctx.apply_handshake(&map).is_err());
    }
}
