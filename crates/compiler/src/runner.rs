//! Inference pass runner: one reasoning invocation with a fixed
//! deterministic decoding configuration.
//!
//! Every pass uses top-1 token selection with zero randomness, so an
//! identical (instruction, content, schema) triple produces an identical
//! request. Reproducibility is a contract here, not a tuning choice.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CompilerError;
use crate::extract::extract_json_object;

// ---------------------------------------------------------------------------
// Service contract
// ---------------------------------------------------------------------------

/// Decoding parameters sent with every reasoning call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecodingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i32,
}

impl DecodingConfig {
    /// The only configuration the compiler ever uses: greedy decoding.
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.0,
            top_k: 1,
        }
    }
}

/// Transport and API failures from the reasoning service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("Reasoning request failed: {0}")]
    Request(String),

    /// The service returned a non-2xx status code.
    #[error("Reasoning service error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// External reasoning service contract.
///
/// `response_schema`, when present, requests constrained structured
/// output shaped by the given (already service-compatible) schema.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        content: &str,
        config: &DecodingConfig,
        response_schema: Option<&serde_json::Value>,
    ) -> Result<String, ServiceError>;
}

// ---------------------------------------------------------------------------
// Enum type bridge
// ---------------------------------------------------------------------------

/// Rewrite integer enum declarations to their string form.
///
/// The reasoning service only accepts primitive string-typed enum
/// members, so `{"type": "integer", "enum": [4, 8]}` is declared as
/// `{"type": "string", "enum": ["4", "8"]}` on the wire and converted
/// back by [`unbridge_value`] after parsing.
fn bridge_response_schema(schema: &serde_json::Value) -> serde_json::Value {
    let Some(node) = schema.as_object() else {
        return schema.clone();
    };

    if is_integer_enum(node) {
        let members: Vec<serde_json::Value> = node["enum"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .map(|v| serde_json::Value::String(v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        return serde_json::json!({"type": "string", "enum": members});
    }

    let mut out = serde_json::Map::new();
    for (key, value) in node {
        let bridged = match key.as_str() {
            "properties" => {
                let mut props = serde_json::Map::new();
                if let Some(map) = value.as_object() {
                    for (name, child) in map {
                        props.insert(name.clone(), bridge_response_schema(child));
                    }
                }
                serde_json::Value::Object(props)
            }
            "items" => bridge_response_schema(value),
            _ => value.clone(),
        };
        out.insert(key.clone(), bridged);
    }
    serde_json::Value::Object(out)
}

/// Convert string-typed values back to integers wherever the original
/// schema declared an integer enum. The inverse of the request-side
/// rewrite in [`bridge_response_schema`].
fn unbridge_value(value: &mut serde_json::Value, schema: &serde_json::Value) {
    let Some(node) = schema.as_object() else {
        return;
    };

    if is_integer_enum(node) {
        if let Some(n) = value.as_str().and_then(|s| s.parse::<i64>().ok()) {
            *value = serde_json::json!(n);
        }
        return;
    }

    if let (Some(props), Some(map)) = (
        node.get("properties").and_then(|p| p.as_object()),
        value.as_object_mut(),
    ) {
        for (name, child_schema) in props {
            if let Some(child) = map.get_mut(name) {
                unbridge_value(child, child_schema);
            }
        }
    } else if let (Some(items), Some(elements)) = (node.get("items"), value.as_array_mut()) {
        for element in elements {
            unbridge_value(element, items);
        }
    }
}

fn is_integer_enum(node: &serde_json::Map<String, serde_json::Value>) -> bool {
    node.get("type").and_then(|t| t.as_str()) == Some("integer") && node.contains_key("enum")
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// A structured pass result: the raw text as returned by the service
/// (appended verbatim to the compilation context) plus the parsed and
/// unbridged payload.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub raw: String,
    pub value: serde_json::Value,
}

/// Executes single reasoning passes against a [`ReasoningService`].
pub struct InferencePassRunner<S> {
    service: S,
}

impl<S: ReasoningService> InferencePassRunner<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// The wrapped service.
    pub fn service_ref(&self) -> &S {
        &self.service
    }

    /// One free-text pass. Fails with [`CompilerError::EmptyResponse`]
    /// when the service yields no usable text.
    pub async fn invoke(
        &self,
        system_instruction: &str,
        content: &str,
    ) -> Result<String, CompilerError> {
        let text = self
            .service
            .generate(
                system_instruction,
                content,
                &DecodingConfig::deterministic(),
                None,
            )
            .await?;
        if text.trim().is_empty() {
            return Err(CompilerError::EmptyResponse);
        }
        Ok(text)
    }

    /// One constrained pass: the response schema is bridged for the
    /// service, the output extracted by balanced-delimiter scanning, and
    /// integer-enum members converted back to numbers.
    pub async fn invoke_structured(
        &self,
        system_instruction: &str,
        content: &str,
        response_schema: &serde_json::Value,
    ) -> Result<StructuredOutput, CompilerError> {
        let bridged = bridge_response_schema(response_schema);
        let text = self
            .service
            .generate(
                system_instruction,
                content,
                &DecodingConfig::deterministic(),
                Some(&bridged),
            )
            .await?;
        if text.trim().is_empty() {
            return Err(CompilerError::EmptyResponse);
        }
        let mut value = extract_json_object(&text)?;
        unbridge_value(&mut value, response_schema);
        Ok(StructuredOutput { raw: text, value })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    /// Records every call and replays scripted responses in order.
    struct ScriptedService {
        replies: Mutex<Vec<String>>,
        calls: Mutex<Vec<(String, String, DecodingConfig, Option<serde_json::Value>)>>,
    }

    impl ScriptedService {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn generate(
            &self,
            system_instruction: &str,
            content: &str,
            config: &DecodingConfig,
            response_schema: Option<&serde_json::Value>,
        ) -> Result<String, ServiceError> {
            self.calls.lock().unwrap().push((
                system_instruction.to_string(),
                content.to_string(),
                *config,
                response_schema.cloned(),
            ));
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn identical_invocations_send_identical_requests() {
        let service = ScriptedService::new(&["out", "out"]);
        let runner = InferencePassRunner::new(service);

        runner.invoke("system", "content").await.unwrap();
        runner.invoke("system", "content").await.unwrap();

        let calls = runner.service.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert_eq!(calls[0].2, DecodingConfig::deterministic());
    }

    #[tokio::test]
    async fn decoding_config_is_greedy() {
        let config = DecodingConfig::deterministic();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.top_p, 0.0);
        assert_eq!(config.top_k, 1);
    }

    #[tokio::test]
    async fn blank_output_is_empty_response() {
        let service = ScriptedService::new(&["   \n  "]);
        let runner = InferencePassRunner::new(service);
        assert_matches!(
            runner.invoke("s", "c").await,
            Err(CompilerError::EmptyResponse)
        );
    }

    #[tokio::test]
    async fn service_error_passes_through() {
        struct FailingService;

        #[async_trait]
        impl ReasoningService for FailingService {
            async fn generate(
                &self,
                _: &str,
                _: &str,
                _: &DecodingConfig,
                _: Option<&serde_json::Value>,
            ) -> Result<String, ServiceError> {
                Err(ServiceError::Api {
                    status: 503,
                    body: "overloaded".into(),
                })
            }
        }

        let runner = InferencePassRunner::new(FailingService);
        assert_matches!(
            runner.invoke("s", "c").await,
            Err(CompilerError::Service(ServiceError::Api { status: 503, .. }))
        );
    }

    #[tokio::test]
    async fn integer_enums_are_bridged_both_ways() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "duration_seconds": {"type": "integer", "enum": [4, 5, 6, 7, 8]},
                "aspect_ratio": {"type": "string", "enum": ["16:9", "9:16"]},
            },
        });
        let service =
            ScriptedService::new(&[r#"{"duration_seconds": "6", "aspect_ratio": "16:9"}"#]);
        let runner = InferencePassRunner::new(service);

        let output = runner
            .invoke_structured("s", "c", &schema)
            .await
            .unwrap();

        // Request side: integer members declared as strings.
        let calls = runner.service.calls.lock().unwrap();
        let sent = calls[0].3.as_ref().unwrap();
        assert_eq!(
            sent["properties"]["duration_seconds"],
            serde_json::json!({"type": "string", "enum": ["4", "5", "6", "7", "8"]})
        );
        // String enums are untouched.
        assert_eq!(
            sent["properties"]["aspect_ratio"],
            schema["properties"]["aspect_ratio"]
        );

        // Response side: converted back to numbers.
        assert_eq!(output.value["duration_seconds"], 6);
        assert_eq!(output.value["aspect_ratio"], "16:9");
    }

    #[tokio::test]
    async fn nested_and_array_integer_enums_unbridged() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "picks": {
                    "type": "array",
                    "items": {"type": "integer", "enum": [1, 2, 3]},
                },
            },
        });
        let service = ScriptedService::new(&[r#"{"picks": ["2", "3"]}"#]);
        let runner = InferencePassRunner::new(service);
        let output = runner.invoke_structured("s", "c", &schema).await.unwrap();
        assert_eq!(output.value["picks"], serde_json::json!([2, 3]));
    }

    #[tokio::test]
    async fn structured_output_tolerates_rationale_prose() {
        let service =
            ScriptedService::new(&[r#"Here is the payload: {"target": "veo"} as requested."#]);
        let runner = InferencePassRunner::new(service);
        let schema = serde_json::json!({"type": "object"});
        let output = runner.invoke_structured("s", "c", &schema).await.unwrap();
        assert_eq!(output.value["target"], "veo");
        assert!(output.raw.starts_with("Here is the payload"));
    }
}
