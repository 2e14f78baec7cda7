//! LLM provider abstraction for narrative generation
//!
//! This crate provides provider-agnostic abstractions for text completion:
//!
//! - Message types for LLM communication
//! - Completion request/response types
//! - Provider trait for LLM implementations
//! - Gemini and OpenAI-compatible providers

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;
pub mod providers;

// Re-export main types
pub use completion::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};
pub use error::{LLMError, Result};
pub use messages::{Message, Role};
pub use provider::{LLMProvider, provider_from_lookup};
