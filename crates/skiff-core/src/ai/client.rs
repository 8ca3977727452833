//! Model client contract
//!
//! Backends implement both calling conventions: `complete` returns one whole
//! response, `stream` yields incremental chunks that the assembler folds back
//! into the same shape.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::types::{AssembledResponse, Message, StopReason, ToolDefinition, Usage};

/// Everything a backend needs for one turn
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: usize,
}

/// One incremental piece of a streamed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text { delta: String },
    Reasoning { delta: String },
    ToolStart { id: String, name: String },
    ToolInput { id: String, partial_json: String },
    Done {
        stop_reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    Error { message: String },
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Backend identifier used in session metadata ("anthropic", "scripted", ...)
    fn provider(&self) -> &str;

    async fn complete(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<AssembledResponse>;

    async fn stream(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<BoxStream<'static, StreamChunk>>;
}
