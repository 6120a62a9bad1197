//! Generation-target adapters.
//!
//! One adapter per generation target, all behind [`TargetAdapter`]. The
//! adapter owns its wire shape entirely: the rest of the system only sees
//! validated payload fields going in and a [`StartOutcome`] /
//! [`OperationStatus`] / [`GeneratedOutput`] coming back. Target
//! dispatch is a single registry lookup, keeping adapter selection in
//! lockstep with the schema registry's target identifiers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mediagen_core::schema::StructuredRequest;

pub mod imagen;
pub mod lyria;
pub mod veo;

pub use imagen::ImagenAdapter;
pub use lyria::LyriaAdapter;
pub use veo::VeoAdapter;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// What a start call produced.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// The target completed synchronously; this is the final output data.
    Completed(serde_json::Value),
    /// The target accepted a long-running operation to be polled.
    Operation { handle: String },
}

/// Status of a long-running operation.
#[derive(Debug, Clone)]
pub struct OperationStatus {
    pub done: bool,
    /// Error reported by the operation itself (terminal).
    pub error: Option<String>,
    /// Output data, present when `done` and successful.
    pub data: Option<serde_json::Value>,
}

/// Normalized output extracted from target-specific response data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeneratedOutput {
    /// Locator of the primary generated artifact, when one exists.
    pub uri: Option<String>,
    /// Inline textual output, when the target produces one.
    pub text: Option<String>,
    /// Target-specific extras preserved for the caller.
    pub metadata: Option<serde_json::Value>,
}

/// Errors from the adapter layer.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// No adapter is registered for the requested target.
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("Generation request failed: {0}")]
    Request(String),

    /// The generation API returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response arrived but did not have the expected shape.
    #[error("Malformed generation response: {0}")]
    Malformed(String),

    /// The adapter does not support this call (e.g. polling a
    /// synchronous target).
    #[error("Unsupported adapter operation: {0}")]
    Unsupported(&'static str),
}

/// One generation target.
#[async_trait]
pub trait TargetAdapter: Send + Sync + std::fmt::Debug {
    /// Target identifier this adapter serves. Must match the schema
    /// registry's identifier for the same target.
    fn target(&self) -> &'static str;

    /// Submit a validated request. Synchronous targets return
    /// [`StartOutcome::Completed`]; long-running ones return an
    /// operation handle for polling.
    async fn start(&self, request: &StructuredRequest) -> Result<StartOutcome, AdapterError>;

    /// Query a long-running operation.
    async fn poll_status(&self, handle: &str) -> Result<OperationStatus, AdapterError>;

    /// Extract normalized output from completed response data.
    fn extract_output(&self, data: &serde_json::Value) -> Result<GeneratedOutput, AdapterError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Connection settings shared by the built-in adapters.
#[derive(Debug, Clone)]
pub struct TargetApiConfig {
    /// Base URL, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    pub api_key: String,
    pub veo_model: String,
    pub imagen_model: String,
    pub lyria_model: String,
}

/// Target-id-to-adapter dispatch table.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn TargetAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in adapters sharing one HTTP client.
    pub fn builtin(config: &TargetApiConfig) -> Self {
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        registry.register(Arc::new(VeoAdapter::new(
            client.clone(),
            config.base_url.clone(),
            config.veo_model.clone(),
            config.api_key.clone(),
        )));
        registry.register(Arc::new(ImagenAdapter::new(
            client.clone(),
            config.base_url.clone(),
            config.imagen_model.clone(),
            config.api_key.clone(),
        )));
        registry.register(Arc::new(LyriaAdapter::new(
            client,
            config.base_url.clone(),
            config.lyria_model.clone(),
            config.api_key.clone(),
        )));
        registry
    }

    /// Register an adapter under its own target identifier. A second
    /// registration for the same target replaces the first.
    pub fn register(&mut self, adapter: Arc<dyn TargetAdapter>) {
        self.adapters.insert(adapter.target(), adapter);
    }

    /// Resolve the adapter for a target identifier.
    pub fn resolve(&self, target: &str) -> Result<Arc<dyn TargetAdapter>, AdapterError> {
        self.adapters
            .get(target)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownTarget(target.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

/// Ensure a success status, mapping failures to [`AdapterError::Api`]
/// with the body preserved for debugging.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(AdapterError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

pub(crate) async fn parse_json(
    response: reqwest::Response,
) -> Result<serde_json::Value, AdapterError> {
    let response = ensure_success(response).await?;
    response
        .json()
        .await
        .map_err(|e| AdapterError::Request(e.to_string()))
}
