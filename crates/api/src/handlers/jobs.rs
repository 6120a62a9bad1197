//! Handlers for the `/jobs` resource.
//!
//! Job creation accepts either a free-text prompt (routed through the
//! compiler) or an already-structured request (validated directly).
//! Compilation failures surface as a failed job record, not as an HTTP
//! error: the caller always gets a job back for a well-formed request.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mediagen_compiler::CompilerError;
use mediagen_core::job::JobError;
use mediagen_core::schema::StructuredRequest;
use mediagen_core::types::JobId;
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body for `POST /api/v1/jobs`: exactly one of `prompt` / `request`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJob {
    /// Opaque owner identifier recorded on the job.
    #[validate(length(min = 1, max = 128))]
    pub owner: String,
    /// Free-text request, compiled into a structured payload.
    pub prompt: Option<String>,
    /// Already-structured request, validated against its target schema.
    pub request: Option<StructuredRequest>,
}

/// POST /api/v1/jobs
///
/// Create a job and start it inline. Returns 201 with the record as it
/// stands after the start attempt: `succeeded` for synchronous targets,
/// `running` for long-running ones, `failed` when compilation or the
/// start call failed.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let job = match (input.prompt, input.request) {
        (Some(prompt), None) => match state.compiler.compile(&prompt).await {
            Ok(compiled) => {
                let job = state
                    .lifecycle
                    .create(&input.owner, compiled.request, compiled.reasons)
                    .await?;
                state.lifecycle.start(job.id).await?
            }
            Err(error) => {
                tracing::warn!(error = %error, "Prompt compilation failed");
                let placeholder = StructuredRequest {
                    target: "unresolved".into(),
                    fields: serde_json::json!({"prompt": prompt}),
                };
                state
                    .lifecycle
                    .create_failed(
                        &input.owner,
                        placeholder,
                        JobError::new(compiler_error_code(&error), error.to_string()),
                    )
                    .await?
            }
        },
        (None, Some(request)) => {
            let normalized = state
                .schemas
                .validate(&request.target, &request.fields)
                .map_err(|violations| {
                    AppError::Validation(
                        violations
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join("; "),
                    )
                })?;
            let request = StructuredRequest {
                target: request.target,
                fields: normalized,
            };
            let job = state
                .lifecycle
                .create(&input.owner, request, Vec::new())
                .await?;
            state.lifecycle.start(job.id).await?
        }
        _ => {
            return Err(AppError::Validation(
                "provide exactly one of \"prompt\" or \"request\"".into(),
            ))
        }
    };

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.lifecycle.get(id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/{id}/poll
///
/// Poll-callback entry point for external scheduler delivery. Safe to
/// call at any time: polling a terminal job is a no-op.
pub async fn poll_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.lifecycle.poll(id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.lifecycle.cancel(id).await?;
    Ok(Json(job))
}

/// Stable machine-readable code for a compilation failure.
fn compiler_error_code(error: &CompilerError) -> &'static str {
    match error {
        CompilerError::InvalidPrompt(_) => "invalid_prompt",
        CompilerError::NoJsonFound => "no_json_found",
        CompilerError::UnbalancedJson => "unbalanced_json",
        CompilerError::EmptyResponse => "empty_response",
        CompilerError::SchemaRejected(_) => "schema_rejected",
        CompilerError::Service(_) => "reasoning_service_error",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
