//! Compiler orchestrator: tagging, exploratory pass, and the bounded
//! decide/validate retry loop.
//!
//! The loop body has a three-way outcome: a validated request (done), a
//! continuable rejection (extraction or schema failure, fed back into the
//! context for the next attempt), or a fatal error (reasoning service
//! failure, propagated immediately). The result is always exactly one
//! validated payload or one error, never a partial result.

use mediagen_core::reference::{self, TagOutcome};
use mediagen_core::schema::{FieldKind, SchemaRegistry, StructuredRequest, TargetSchema};

use crate::context::CompilationContext;
use crate::error::CompilerError;
use crate::extract::extract_json_object;
use crate::runner::{InferencePassRunner, ReasoningService};

/// System instruction for the exploratory pass.
const EXPLORE_INSTRUCTION: &str = "\
You match media generation requests to the most suitable generation targets. \
Reply with a JSON object {\"candidates\": [{\"target\": ..., \"rationale\": ...}]} \
ranking up to three suitable targets, best first. Refer to media placeholders \
by their tags; never invent locators.";

/// System instruction for the decisive pass.
const DECIDE_INSTRUCTION: &str = "\
You produce the final payload for one media generation request. Using the \
full conversation so far, reply with a JSON object {\"target\": ..., \
\"fields\": {...}, \"rationale\": ...} containing one concrete, complete \
payload for the chosen target. Keep media placeholder tags exactly as they \
appear; never expand them. If validation errors from a previous attempt are \
present, correct every one of them.";

/// Ranges wider than this are declared as plain integers rather than
/// enumerated member-by-member in the response schema.
const MAX_ENUMERATED_RANGE: i64 = 16;

/// Tunables for one compiler instance.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Maximum decisive attempts per compilation.
    pub max_attempts: u32,
    /// Prompts longer than this are rejected before any external call.
    pub max_prompt_chars: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_prompt_chars: 8_000,
        }
    }
}

/// A successfully compiled request plus its reasoning trail.
#[derive(Debug, Clone)]
pub struct CompiledRequest {
    pub request: StructuredRequest,
    /// Every context entry, in order, with tags resolved back to the
    /// locators the user originally typed.
    pub reasons: Vec<String>,
}

/// One decisive-loop iteration result. Fatal errors short-circuit via
/// `Result` instead.
enum AttemptOutcome {
    Complete {
        request: StructuredRequest,
        residual_text: String,
    },
    Rejected {
        summary: String,
        error: CompilerError,
    },
}

/// Turns one free-text prompt into one validated [`StructuredRequest`].
pub struct PromptCompiler<S> {
    runner: InferencePassRunner<S>,
    registry: SchemaRegistry,
    config: CompilerConfig,
}

impl<S: ReasoningService> PromptCompiler<S> {
    pub fn new(service: S, registry: SchemaRegistry) -> Self {
        Self::with_config(service, registry, CompilerConfig::default())
    }

    pub fn with_config(service: S, registry: SchemaRegistry, config: CompilerConfig) -> Self {
        Self {
            runner: InferencePassRunner::new(service),
            registry,
            config,
        }
    }

    /// Compile a prompt. See the module docs for the loop contract.
    pub async fn compile(&self, prompt: &str) -> Result<CompiledRequest, CompilerError> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(CompilerError::InvalidPrompt("prompt is empty".into()));
        }
        if trimmed.chars().count() > self.config.max_prompt_chars {
            return Err(CompilerError::InvalidPrompt(format!(
                "prompt exceeds {} characters",
                self.config.max_prompt_chars
            )));
        }

        let tagged = reference::tag(trimmed);
        let mut ctx = CompilationContext::new();
        ctx.push(format!(
            "User request (references tagged):\n{}",
            tagged.tagged_text
        ));

        // Exploratory pass: capability hints for every target, ranked
        // candidates out. The raw output joins the context either way;
        // the parsed top candidate only narrows the decisive schema.
        let explore_content = format!(
            "Available generation targets:\n\n{}\n{}",
            self.registry.capability_hints(),
            ctx.joined(),
        );
        let exploration = self.runner.invoke(EXPLORE_INSTRUCTION, &explore_content).await?;
        ctx.push(format!("Exploration:\n{exploration}"));
        let top_candidate = self.parse_top_candidate(&exploration);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tracing::debug!(attempt, "Decisive compilation pass");
            match self.decisive_attempt(&mut ctx, &tagged, top_candidate, attempt).await? {
                AttemptOutcome::Complete {
                    request,
                    residual_text,
                } => {
                    tracing::info!(
                        target = %request.target,
                        attempt,
                        references = tagged.references.len(),
                        "Prompt compiled",
                    );
                    let mut reasons: Vec<String> = ctx
                        .entries()
                        .iter()
                        .map(|entry| reference::expand_tags(entry, &tagged.references))
                        .collect();
                    if !residual_text.is_empty() {
                        reasons.push(format!("Residual request text: {residual_text}"));
                    }
                    return Ok(CompiledRequest { request, reasons });
                }
                AttemptOutcome::Rejected { summary, error } => {
                    if attempt >= self.config.max_attempts {
                        tracing::warn!(attempt, %summary, "Compilation attempts exhausted");
                        return Err(error);
                    }
                    ctx.push(format!(
                        "Validation errors on the previous payload:\n{summary}"
                    ));
                }
            }
        }
    }

    /// One decisive attempt: constrained pass, extraction, restoration,
    /// validation. Fatal errors return `Err`; continuable ones return
    /// [`AttemptOutcome::Rejected`].
    async fn decisive_attempt(
        &self,
        ctx: &mut CompilationContext,
        tagged: &TagOutcome,
        top_candidate: Option<&'static str>,
        attempt: u32,
    ) -> Result<AttemptOutcome, CompilerError> {
        let response_schema = self.decisive_response_schema(top_candidate);
        let output = match self
            .runner
            .invoke_structured(DECIDE_INSTRUCTION, &ctx.joined(), &response_schema)
            .await
        {
            Ok(output) => output,
            Err(error) if error.is_continuable() => {
                return Ok(AttemptOutcome::Rejected {
                    summary: error.to_string(),
                    error,
                });
            }
            Err(error) => return Err(error),
        };
        ctx.push(format!("Attempt {attempt} payload:\n{}", output.raw));

        let target = output
            .value
            .get("target")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let fields = output.value.get("fields").cloned();
        let (Some(target), Some(fields)) = (target, fields) else {
            let summary = "payload must carry \"target\" and \"fields\" members".to_string();
            return Ok(AttemptOutcome::Rejected {
                error: CompilerError::SchemaRejected(vec![mediagen_core::schema::SchemaViolation {
                    path: "".into(),
                    message: summary.clone(),
                }]),
                summary,
            });
        };

        // Restore references before validating, so the validator sees
        // canonical URIs (and media objects) rather than tags.
        let media_paths = self
            .registry
            .lookup(&target)
            .map(TargetSchema::media_object_paths)
            .unwrap_or_default();
        let restored = reference::restore(
            fields,
            &tagged.tagged_text,
            &tagged.references,
            &media_paths,
        );

        match self.registry.validate(&target, &restored.fields) {
            Ok(normalized) => Ok(AttemptOutcome::Complete {
                request: StructuredRequest {
                    target,
                    fields: normalized,
                },
                residual_text: restored.text,
            }),
            Err(violations) => {
                let summary = violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(AttemptOutcome::Rejected {
                    summary,
                    error: CompilerError::SchemaRejected(violations),
                })
            }
        }
    }

    /// Best-effort parse of the exploratory ranking. Anything malformed
    /// just means the decisive schema stays unconstrained.
    fn parse_top_candidate(&self, exploration: &str) -> Option<&'static str> {
        let value = extract_json_object(exploration).ok()?;
        let target = value.get("candidates")?.get(0)?.get("target")?.as_str()?;
        self.registry.lookup(target).ok().map(|schema| schema.target)
    }

    /// Response schema for the decisive pass, derived mechanically from
    /// the target descriptors. With a known top candidate the fields are
    /// fully constrained; otherwise the payload shape is kept open and
    /// validation catches the rest.
    fn decisive_response_schema(&self, top_candidate: Option<&str>) -> serde_json::Value {
        let (target_domain, fields_schema) = match top_candidate
            .and_then(|t| self.registry.lookup(t).ok())
        {
            Some(schema) => (vec![schema.target.to_string()], fields_schema_for(schema)),
            None => (
                self.registry.targets().map(str::to_string).collect(),
                serde_json::json!({"type": "object"}),
            ),
        };
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": {"type": "string", "enum": target_domain},
                "fields": fields_schema,
                "rationale": {"type": "string"},
            },
            "required": ["target", "fields"],
        })
    }
}

/// Derive a response schema for one target's fields from its descriptor.
fn fields_schema_for(schema: &TargetSchema) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for field in &schema.fields {
        let node = match &field.kind {
            FieldKind::Text { .. } | FieldKind::MediaObject => {
                serde_json::json!({"type": "string"})
            }
            FieldKind::Integer { min, max, .. } => {
                if max - min < MAX_ENUMERATED_RANGE {
                    let members: Vec<i64> = (*min..=*max).collect();
                    serde_json::json!({"type": "integer", "enum": members})
                } else {
                    serde_json::json!({"type": "integer"})
                }
            }
            FieldKind::Boolean => serde_json::json!({"type": "boolean"}),
            FieldKind::Choice { values, .. } => {
                serde_json::json!({"type": "string", "enum": values})
            }
        };
        properties.insert(field.name.to_string(), node);
        if field.required {
            required.push(field.name.to_string());
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{DecodingConfig, ServiceError};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted replies in order and records every request.
    struct ScriptedService {
        replies: Mutex<Vec<Result<String, u16>>>,
        contents: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(replies: Vec<Result<&str, u16>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                contents: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.contents.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn generate(
            &self,
            _system_instruction: &str,
            content: &str,
            _config: &DecodingConfig,
            _response_schema: Option<&serde_json::Value>,
        ) -> Result<String, ServiceError> {
            self.contents.lock().unwrap().push(content.to_string());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(status)) => Err(ServiceError::Api {
                    status,
                    body: "scripted failure".into(),
                }),
                None => panic!("unscripted reasoning call"),
            }
        }
    }

    fn compiler(service: ScriptedService) -> PromptCompiler<ScriptedService> {
        PromptCompiler::new(service, SchemaRegistry::builtin())
    }

    const EXPLORE_IMAGEN: &str =
        r#"{"candidates": [{"target": "imagen", "rationale": "a still image request"}]}"#;

    #[tokio::test]
    async fn empty_prompt_rejected_before_any_call() {
        let compiler = compiler(ScriptedService::new(vec![]));
        assert_matches!(
            compiler.compile("   ").await,
            Err(CompilerError::InvalidPrompt(_))
        );
        assert_eq!(compiler.runner_calls(), 0);
    }

    #[tokio::test]
    async fn over_length_prompt_rejected_before_any_call() {
        let compiler = compiler(ScriptedService::new(vec![]));
        let long = "x".repeat(8_001);
        assert_matches!(
            compiler.compile(&long).await,
            Err(CompilerError::InvalidPrompt(_))
        );
        assert_eq!(compiler.runner_calls(), 0);
    }

    #[tokio::test]
    async fn compiles_on_first_attempt() {
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            Ok(r#"{"target": "imagen", "fields": {"prompt": "a red fox"}, "rationale": "simple"}"#),
        ]));
        let compiled = compiler.compile("paint a red fox").await.unwrap();
        assert_eq!(compiled.request.target, "imagen");
        assert_eq!(compiled.request.fields["prompt"], "a red fox");
        // Defaults filled by validation.
        assert_eq!(compiled.request.fields["sample_count"], 1);
        assert_eq!(compiled.request.fields["aspect_ratio"], "1:1");
        assert_eq!(compiler.runner_calls(), 2);
    }

    #[tokio::test]
    async fn validation_error_feeds_back_and_converges_on_attempt_two() {
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            // Missing the required prompt field.
            Ok(r#"{"target": "imagen", "fields": {"aspect_ratio": "1:1"}}"#),
            Ok(r#"{"target": "imagen", "fields": {"prompt": "a red fox", "aspect_ratio": "1:1"}}"#),
        ]));
        let compiled = compiler.compile("paint a red fox").await.unwrap();
        assert_eq!(compiled.request.fields["prompt"], "a red fox");
        assert_eq!(compiler.runner_calls(), 3);

        // The second decisive call saw the first attempt's errors.
        let contents = compiler.runner.service_ref().contents.lock().unwrap();
        assert!(contents[2].contains("required field is missing"));
        assert!(contents[2].contains("Validation errors on the previous payload"));
    }

    #[tokio::test]
    async fn attempts_exhausted_propagates_validation_errors() {
        let bad = r#"{"target": "imagen", "fields": {"aspect_ratio": "1:1"}}"#;
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            Ok(bad),
            Ok(bad),
            Ok(bad),
        ]));
        let err = compiler.compile("paint a red fox").await.unwrap_err();
        assert_matches!(err, CompilerError::SchemaRejected(violations) => {
            assert_eq!(violations[0].path, "prompt");
        });
        assert_eq!(compiler.runner_calls(), 4);
    }

    #[tokio::test]
    async fn extraction_failure_is_retried_like_validation() {
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            Ok("I could not settle on a payload, sorry."),
            Ok(r#"{"target": "imagen", "fields": {"prompt": "a red fox"}}"#),
        ]));
        let compiled = compiler.compile("paint a red fox").await.unwrap();
        assert_eq!(compiled.request.fields["prompt"], "a red fox");
        assert_eq!(compiler.runner_calls(), 3);
    }

    #[tokio::test]
    async fn hallucinated_target_is_retried() {
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            Ok(r#"{"target": "sora", "fields": {"prompt": "a red fox"}}"#),
            Ok(r#"{"target": "imagen", "fields": {"prompt": "a red fox"}}"#),
        ]));
        let compiled = compiler.compile("paint a red fox").await.unwrap();
        assert_eq!(compiled.request.target, "imagen");
    }

    #[tokio::test]
    async fn service_failure_mid_loop_is_never_retried() {
        let compiler = compiler(ScriptedService::new(vec![
            Ok(EXPLORE_IMAGEN),
            Err(503),
        ]));
        let err = compiler.compile("paint a red fox").await.unwrap_err();
        assert_matches!(err, CompilerError::Service(ServiceError::Api { status: 503, .. }));
        assert_eq!(compiler.runner_calls(), 2);
    }

    #[tokio::test]
    async fn references_are_restored_into_payload_and_reasons() {
        let explore =
            r#"{"candidates": [{"target": "veo", "rationale": "animate the image"}]}"#;
        let compiler = compiler(ScriptedService::new(vec![
            Ok(explore),
            Ok(r#"{"target": "veo", "fields": {"prompt": "animate <IMAGE_1/> gently", "image": "<IMAGE_1/>"}}"#),
        ]));
        let compiled = compiler
            .compile("animate gs://media/cat.jpg gently")
            .await
            .unwrap();

        assert_eq!(
            compiled.request.fields["image"],
            serde_json::json!({"uri": "gs://media/cat.jpg", "mime_type": "image/jpeg"})
        );
        assert_eq!(
            compiled.request.fields["prompt"],
            "animate gs://media/cat.jpg gently"
        );
        // The reasoning trail shows the user's locator, not internal tags.
        let joined = compiled.reasons.join("\n");
        assert!(joined.contains("gs://media/cat.jpg"));
        assert!(!joined.contains("<IMAGE_1/>"));
    }

    #[tokio::test]
    async fn decisive_schema_narrows_to_top_candidate() {
        let compiler = compiler(ScriptedService::new(vec![]));
        let schema = compiler.decisive_response_schema(Some("veo"));
        assert_eq!(schema["properties"]["target"]["enum"], serde_json::json!(["veo"]));
        assert_eq!(
            schema["properties"]["fields"]["properties"]["duration_seconds"],
            serde_json::json!({"type": "integer", "enum": [4, 5, 6, 7, 8]})
        );
        assert_eq!(
            schema["properties"]["fields"]["required"],
            serde_json::json!(["prompt"])
        );

        let open = compiler.decisive_response_schema(None);
        let domain = open["properties"]["target"]["enum"].as_array().unwrap();
        assert_eq!(domain.len(), 3);
        assert_eq!(open["properties"]["fields"], serde_json::json!({"type": "object"}));
    }

    // Test-only accessors.
    impl PromptCompiler<ScriptedService> {
        fn runner_calls(&self) -> usize {
            self.runner.service_ref().call_count()
        }
    }
}
