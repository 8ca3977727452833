//! Response assembly for the turn loop.
//!
//! Both calling conventions end in one `AssembledResponse`:
//! - batch: the client returns the whole response, which is validated,
//!   replayed to the caller as text events and reshaped text-first
//! - streaming: chunks are buffered (text, plus one JSON fragment buffer per
//!   tool id in first-seen order) and forwarded as `TurnEvent`s in the same
//!   pass; `done` finalizes the buffers
//!
//! A tool input that fails to parse fails the whole turn.

use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::client::{ModelClient, ModelRequest, StreamChunk};
use crate::ai::types::{AssembledResponse, Content, StopReason};
use crate::error::{AgentError, AgentResult};

use super::events::TurnEvent;

pub(crate) const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Reject responses with no content unless generation hit the token limit.
pub fn validate_response(response: &AssembledResponse) -> AgentResult<()> {
    if response.content.is_empty() && response.stop_reason != StopReason::MaxTokens {
        return Err(AgentError::EmptyResponse);
    }
    Ok(())
}

/// Obtain one validated response from `model` in the requested mode.
pub async fn assemble(
    model: &dyn ModelClient,
    request: ModelRequest,
    streaming: bool,
    event_tx: &mpsc::UnboundedSender<TurnEvent>,
    cancel: &CancellationToken,
) -> AgentResult<AssembledResponse> {
    let response = if streaming {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            stream = model.stream(request, cancel) => stream.map_err(AgentError::Transport)?,
        };
        assemble_chunks(stream, event_tx, cancel, STREAM_TIMEOUT).await?
    } else {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            response = model.complete(request, cancel) => response.map_err(AgentError::Transport)?,
        };
        for block in &response.content {
            if let Content::Text { text } = block {
                if !text.is_empty() {
                    let _ = event_tx.send(TurnEvent::Text { text: text.clone() });
                }
            }
        }
        AssembledResponse {
            content: text_first(response.content),
            ..response
        }
    };

    validate_response(&response)?;
    Ok(response)
}

/// Fold every text block into one leading block, keeping the other blocks
/// in order. This is the shape the chunk buffers finalize into.
fn text_first(content: Vec<Content>) -> Vec<Content> {
    let mut text = String::new();
    let mut rest = Vec::with_capacity(content.len());
    for block in content {
        match block {
            Content::Text { text: part } => text.push_str(&part),
            other => rest.push(other),
        }
    }
    if text.is_empty() {
        return rest;
    }
    let mut out = Vec::with_capacity(rest.len() + 1);
    out.push(Content::Text { text });
    out.extend(rest);
    out
}

struct PendingTool {
    id: String,
    name: String,
    json: String,
}

/// Buffer and forward a chunk stream until its `done` marker.
pub async fn assemble_chunks(
    mut stream: BoxStream<'_, StreamChunk>,
    event_tx: &mpsc::UnboundedSender<TurnEvent>,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> AgentResult<AssembledResponse> {
    let mut text_buffer = String::new();
    let mut tools: Vec<PendingTool> = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            next = tokio::time::timeout(idle_timeout, stream.next()) => match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Err(AgentError::IncompleteStream),
                Err(_) => return Err(AgentError::StreamTimeout(idle_timeout)),
            },
        };

        match chunk {
            StreamChunk::Text { delta } => {
                text_buffer.push_str(&delta);
                let _ = event_tx.send(TurnEvent::Text { text: delta });
            }
            StreamChunk::Reasoning { delta } => {
                let _ = event_tx.send(TurnEvent::ReasoningDelta { delta });
            }
            StreamChunk::ToolStart { id, name } => {
                if !tools.iter().any(|t| t.id == id) {
                    tools.push(PendingTool {
                        id: id.clone(),
                        name: name.clone(),
                        json: String::new(),
                    });
                }
                let _ = event_tx.send(TurnEvent::ToolInputDelta {
                    id,
                    name: Some(name),
                    delta: String::new(),
                });
            }
            StreamChunk::ToolInput { id, partial_json } => {
                let Some(tool) = tools.iter_mut().find(|t| t.id == id) else {
                    return Err(AgentError::Model(format!(
                        "tool input for unannounced call {}",
                        id
                    )));
                };
                tool.json.push_str(&partial_json);
                let _ = event_tx.send(TurnEvent::ToolInputDelta {
                    id,
                    name: None,
                    delta: partial_json,
                });
            }
            StreamChunk::Done { stop_reason, usage } => {
                let mut content = Vec::with_capacity(tools.len() + 1);
                if !text_buffer.is_empty() {
                    content.push(Content::Text { text: text_buffer });
                }
                for tool in tools {
                    let input = if tool.json.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&tool.json).map_err(|source| {
                            AgentError::MalformedToolInput {
                                id: tool.id.clone(),
                                name: tool.name.clone(),
                                source,
                            }
                        })?
                    };
                    content.push(Content::ToolUse {
                        id: tool.id,
                        name: tool.name,
                        input,
                    });
                }
                return Ok(AssembledResponse {
                    content,
                    stop_reason,
                    usage,
                });
            }
            StreamChunk::Error { message } => return Err(AgentError::Model(message)),
        }
    }
}
