//! Prompt-to-request compiler: turns one free-text prompt into one
//! schema-valid [`StructuredRequest`](mediagen_core::schema::StructuredRequest)
//! plus an ordered reasoning trail.
//!
//! The pipeline is: tag resource references, run an exploratory reasoning
//! pass over the capability hints, then run a decisive pass inside a
//! bounded validate/refine retry loop, feeding validation errors back
//! into the accumulated context until the payload converges or attempts
//! run out.

pub mod context;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod orchestrator;
pub mod runner;

pub use context::CompilationContext;
pub use error::CompilerError;
pub use orchestrator::{CompiledRequest, CompilerConfig, PromptCompiler};
pub use runner::{DecodingConfig, InferencePassRunner, ReasoningService, ServiceError};
