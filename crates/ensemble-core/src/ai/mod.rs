//! LLM client adapter.
//!
//! Normalizes provider differences behind two calls: a blocking
//! [`ModelBackend::generate`] and a streaming [`ModelBackend::stream`].
//! Everything above this module (loop, compactor, team, graph) talks to the
//! `ModelBackend` trait, which is what tests mock.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod client;
pub mod format;
pub mod models;
pub mod retry;
pub mod types;

pub use client::{LlmClient, LlmClientConfig};
pub use types::{ChatMessage, LlmResponse, Role, StreamPart, ToolCall, ToolDef, Usage};

/// The two-method surface the runtime requires from a model provider.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        max_tokens: Option<usize>,
    ) -> Result<LlmResponse>;

    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        max_tokens: Option<usize>,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>>;
}
