//! Shared application state.

use std::sync::Arc;

use async_trait::async_trait;
use mediagen_compiler::{CompiledRequest, CompilerError, PromptCompiler, ReasoningService};
use mediagen_core::schema::SchemaRegistry;
use mediagen_jobs::JobLifecycle;

/// Compile entry point behind a trait object so handlers (and their
/// tests) do not care which reasoning service backs the compiler.
#[async_trait]
pub trait RequestCompiler: Send + Sync {
    async fn compile(&self, prompt: &str) -> Result<CompiledRequest, CompilerError>;
}

#[async_trait]
impl<S: ReasoningService> RequestCompiler for PromptCompiler<S> {
    async fn compile(&self, prompt: &str) -> Result<CompiledRequest, CompilerError> {
        PromptCompiler::compile(self, prompt).await
    }
}

/// Shared state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; all inner data is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<JobLifecycle>,
    pub compiler: Arc<dyn RequestCompiler>,
    pub schemas: Arc<SchemaRegistry>,
}
