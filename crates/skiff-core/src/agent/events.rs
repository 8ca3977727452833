//! Canonical event protocol for the turn loop.
//!
//! `TurnEvent` is the only thing the loop emits. A UI or a non-interactive
//! runner consumes these in order; `Done` and `Error` are the only
//! terminators, and exactly one of them ends every run.

use serde::Serialize;

use crate::ai::types::Usage;
use crate::error::ErrorKind;

use super::permissions::ConfirmationRequest;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    // ── Streaming ──────────────────────────────────────────────────────
    /// Assistant text (a delta when streaming, a whole block in batch mode).
    Text { text: String },

    /// Reasoning delta from a streaming backend.
    ReasoningDelta { delta: String },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    /// Tool call is entering the execution pipeline.
    ToolStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool input fragment as it streams in. The first fragment for a call
    /// carries the tool name and an empty delta.
    ToolInputDelta {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        delta: String,
    },

    /// Pipeline finished for one call (exactly once per call).
    ToolResult {
        id: String,
        name: String,
        success: bool,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ── Permissions ────────────────────────────────────────────────────
    /// A tool call needs an external answer before it may run.
    PermissionRequest { request: ConfirmationRequest },

    /// Still waiting on the answer for request `id`.
    WaitingForPermission { id: String },

    // ── Terminal ───────────────────────────────────────────────────────
    Error { message: String, kind: ErrorKind },

    Done {
        text: String,
        usage: Usage,
        turns: usize,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}
