//! Scripted model client
//!
//! Replays prepared turns in order, in either calling convention. Backs the
//! loop tests and the CLI fixture runner.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::client::{ModelClient, ModelRequest, StreamChunk};
use super::types::{AssembledResponse, Content};

/// One prepared model turn
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptedTurn {
    /// A complete response, served as-is by `complete` or chunked by `stream`
    Response(AssembledResponse),
    /// Raw chunks, only servable by `stream`
    Chunks { chunks: Vec<StreamChunk> },
    /// Transport failure
    Fail { error: String },
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default = "default_model")]
    model: String,
    turns: Vec<ScriptedTurn>,
}

fn default_model() -> String {
    "scripted".to_string()
}

pub struct ScriptedModelClient {
    model: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            model: default_model(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses(responses: Vec<AssembledResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptedTurn::Response).collect())
    }

    /// Load a fixture file: `{"model": "...", "turns": [...]}`
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid fixture {}", path.display()))?;
        let mut client = Self::new(fixture.turns);
        client.model = fixture.model;
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }

    fn next_turn(&self, request: ModelRequest, cancel: &CancellationToken) -> Result<ScriptedTurn> {
        if cancel.is_cancelled() {
            bail!("request cancelled");
        }
        self.requests.lock().push(request);
        match self.turns.lock().pop_front() {
            Some(ScriptedTurn::Fail { error }) => bail!(error),
            Some(turn) => Ok(turn),
            None => bail!("no scripted response left"),
        }
    }
}

/// Break a complete response into the chunk sequence a streaming backend
/// would deliver for it. Tool input JSON is split in two fragments.
pub fn to_chunks(response: &AssembledResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();

    for block in &response.content {
        match block {
            Content::Text { text } => {
                let mid = floor_char_boundary(text, text.len() / 2);
                for part in [&text[..mid], &text[mid..]] {
                    if !part.is_empty() {
                        chunks.push(StreamChunk::Text {
                            delta: part.to_string(),
                        });
                    }
                }
            }
            Content::ToolUse { id, name, input } => {
                chunks.push(StreamChunk::ToolStart {
                    id: id.clone(),
                    name: name.clone(),
                });
                let json = input.to_string();
                let mid = floor_char_boundary(&json, json.len() / 2);
                for part in [&json[..mid], &json[mid..]] {
                    chunks.push(StreamChunk::ToolInput {
                        id: id.clone(),
                        partial_json: part.to_string(),
                    });
                }
            }
            Content::ToolResult { .. } => {}
        }
    }

    chunks.push(StreamChunk::Done {
        stop_reason: response.stop_reason,
        usage: response.usage,
    });
    chunks
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        match self.next_turn(request, cancel)? {
            ScriptedTurn::Response(response) => Ok(response),
            ScriptedTurn::Chunks { .. } => bail!("chunk script cannot be served in batch mode"),
            ScriptedTurn::Fail { error } => bail!(error),
        }
    }

    async fn stream(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, StreamChunk>> {
        let chunks = match self.next_turn(request, cancel)? {
            ScriptedTurn::Response(response) => to_chunks(&response),
            ScriptedTurn::Chunks { chunks } => chunks,
            ScriptedTurn::Fail { error } => bail!(error),
        };
        Ok(stream::iter(chunks).boxed())
    }
}
