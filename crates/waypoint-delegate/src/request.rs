//! Shaping raw activity properties into typed delegation requests.
//!
//! The graph engine hands each activity a loosely typed property map. Every
//! delegation kind decides how to read it. Numeric fields and list fields
//! are accepted either already typed or as strings, and an empty property
//! map always yields the request type's default value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::{ChatMessage, ModelRequest, Role};

/// Build a typed request from a raw property map.
pub trait GenerateRequest: Sized + Default + Serialize {
    fn generate_request(props: &Map<String, Value>) -> Result<Self>;

    /// Generate the request and flatten it into a parameter map.
    fn generate_params(props: &Map<String, Value>) -> Result<Map<String, Value>> {
        match serde_json::to_value(Self::generate_request(props)?)? {
            Value::Object(map) => Ok(map),
            other => Err(WaypointError::InvalidRequest(format!(
                "request did not serialize to an object: {}",
                other
            ))),
        }
    }
}

/// Typed request for a tool delegation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl GenerateRequest for ToolRequest {
    fn generate_request(props: &Map<String, Value>) -> Result<Self> {
        if props.is_empty() {
            return Ok(Self::default());
        }

        let tool = props
            .get("tool")
            .or_else(|| props.get("tool_name"))
            .map(|v| as_string(v, "tool"))
            .transpose()?
            .unwrap_or_default();

        let parameters = match props.get("parameters") {
            None | Some(Value::Null) => Map::new(),
            Some(value) => flatten_parameters(decode_embedded(value, "parameters")?)?,
        };

        Ok(Self { tool, parameters })
    }
}

/// Turn a declared parameter list into a flat name -> value map.
///
/// Accepts `[{"name": .., "value": ..}, ..]` or an object that is already flat.
fn flatten_parameters(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => {
            let mut out = Map::new();
            for item in items {
                let Value::Object(mut entry) = item else {
                    return Err(WaypointError::InvalidRequest(
                        "parameter entries must be objects".into(),
                    ));
                };
                let name = match entry.remove("name") {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(WaypointError::InvalidRequest(
                            "parameter entry is missing a name".into(),
                        ))
                    }
                };
                out.insert(name, entry.remove("value").unwrap_or(Value::Null));
            }
            Ok(out)
        }
        other => Err(WaypointError::InvalidRequest(format!(
            "parameters must be a list or an object, got {}",
            other
        ))),
    }
}

impl GenerateRequest for ModelRequest {
    fn generate_request(props: &Map<String, Value>) -> Result<Self> {
        if props.is_empty() {
            return Ok(Self::default());
        }

        let model = props
            .get("model")
            .map(|v| as_string(v, "model"))
            .transpose()?
            .unwrap_or_default();

        let mut messages = match props.get("messages") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => parse_messages(decode_embedded(value, "messages")?)?,
        };

        if let Some(prompt) = props.get("prompt") {
            messages.push(ChatMessage::user(as_string(prompt, "prompt")?));
        }

        Ok(Self {
            model,
            temperature: props
                .get("temperature")
                .map(|v| as_f32(v, "temperature"))
                .transpose()?,
            top_p: props.get("top_p").map(|v| as_f32(v, "top_p")).transpose()?,
            max_tokens: props
                .get("max_tokens")
                .map(|v| as_u32(v, "max_tokens"))
                .transpose()?,
            messages,
        })
    }
}

fn parse_messages(value: Value) -> Result<Vec<ChatMessage>> {
    let Value::Array(items) = value else {
        return Err(WaypointError::InvalidRequest(
            "messages must be a list".into(),
        ));
    };

    items
        .into_iter()
        .map(|item| match item {
            // Bare strings are user turns
            Value::String(text) => Ok(ChatMessage {
                role: Role::User,
                content: text,
            }),
            other => serde_json::from_value::<ChatMessage>(other)
                .map_err(|e| WaypointError::InvalidRequest(format!("invalid message: {}", e))),
        })
        .collect()
}

/// Decode a field that may hold JSON encoded as a string.
fn decode_embedded(value: &Value, field: &str) -> Result<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).map_err(|e| {
            WaypointError::InvalidRequest(format!("{} is not valid JSON: {}", field, e))
        }),
        other => Ok(other.clone()),
    }
}

fn as_string(value: &Value, field: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(WaypointError::InvalidRequest(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

fn as_f32(value: &Value, field: &str) -> Result<f32> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.map(|f| f as f32).ok_or_else(|| {
        WaypointError::InvalidRequest(format!("{} must be a number, got {}", field, value))
    })
}

fn as_u32(value: &Value, field: &str) -> Result<u32> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            WaypointError::InvalidRequest(format!(
                "{} must be a non-negative integer, got {}",
                field, value
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_props_yield_default() {
        let empty = Map::new();
        assert_eq!(ToolRequest::generate_request(&empty).unwrap(), ToolRequest::default());
        assert_eq!(ToolRequest::generate_request(&empty).unwrap(), ToolRequest::default());
        assert_eq!(ModelRequest::generate_request(&empty).unwrap(), ModelRequest::default());
        assert_eq!(ModelRequest::generate_request(&empty).unwrap(), ModelRequest::default());
    }

    #[test]
    fn test_tool_parameter_list_flattened() {
        let req = ToolRequest::generate_request(&props(json!({
            "tool": "search",
            "parameters": [
                {"name": "query", "value": "rust async"},
                {"name": "limit", "value": 5},
                {"name": "flag"}
            ]
        })))
        .unwrap();

        assert_eq!(req.tool, "search");
        assert_eq!(req.parameters.get("query"), Some(&json!("rust async")));
        assert_eq!(req.parameters.get("limit"), Some(&json!(5)));
        assert_eq!(req.parameters.get("flag"), Some(&Value::Null));
    }

    #[test]
    fn test_tool_parameters_as_string() {
        let req = ToolRequest::generate_request(&props(json!({
            "tool_name": "search",
            "parameters": r#"[{"name": "query", "value": "x"}]"#
        })))
        .unwrap();
        assert_eq!(req.tool, "search");
        assert_eq!(req.parameters.get("query"), Some(&json!("x")));
    }

    #[test]
    fn test_tool_parameter_without_name_rejected() {
        let err = ToolRequest::generate_request(&props(json!({
            "tool": "search",
            "parameters": [{"value": 1}]
        })))
        .unwrap_err();
        assert!(matches!(err, WaypointError::InvalidRequest(_)));
    }

    #[test]
    fn test_model_coercion() {
        let req = ModelRequest::generate_request(&props(json!({
            "model": "echo",
            "temperature": "0.5",
            "top_p": 0.9,
            "max_tokens": "256",
            "messages": r#"[{"role": "system", "content": "be brief"}, "hello"]"#
        })))
        .unwrap();

        assert_eq!(req.model, "echo");
        assert_eq!(req.temperature, Some(0.5));
        assert_eq!(req.top_p, Some(0.9));
        assert_eq!(req.max_tokens, Some(256));
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1], ChatMessage::user("hello"));
    }

    #[test]
    fn test_model_typed_messages_and_prompt() {
        let req = ModelRequest::generate_request(&props(json!({
            "model": "echo",
            "messages": [{"role": "assistant", "content": "earlier"}],
            "prompt": "now"
        })))
        .unwrap();
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::Assistant);
        assert_eq!(req.messages[1].content, "now");
    }

    #[test]
    fn test_model_bad_number() {
        let err = ModelRequest::generate_request(&props(json!({
            "model": "echo",
            "max_tokens": "lots"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_generate_params_is_flat_map() {
        let params = ToolRequest::generate_params(&props(json!({
            "tool": "echo",
            "parameters": {"a": 1}
        })))
        .unwrap();
        assert_eq!(params.get("tool"), Some(&json!("echo")));
        assert_eq!(params.get("parameters"), Some(&json!({"a": 1})));
    }
}
