//! Tool execution pipeline for the turn loop.
//!
//! Per call, in order:
//! - `ToolStart` event
//! - `PreToolUse` hooks (any veto ends the call, no post hooks)
//! - permission gate (a denial ends the call, no post hooks)
//! - registry execution (failures become a failed `ToolResult`)
//! - `PostToolUse` / `PostToolUseFailure` hooks
//!
//! Every path emits exactly one `ToolResult` event and yields exactly one
//! `tool_result` block. Calls run one after another in model order.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{Content, ModelInfo, ToolCall};
use crate::tools::registry::{QuestionAsker, ToolContext, ToolRegistry, ToolResult};

use super::events::TurnEvent;
use super::hooks::{block_reason, HookDispatcher, HookEventName, HookPayload};
use super::permissions::{PermissionDecision, PermissionGate};

pub(crate) const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// How a batch of tool calls ended
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every call produced a result
    Completed(Vec<Content>),
    /// Cancellation stopped the batch; holds the results produced so far
    Interrupted(Vec<Content>),
}

/// Everything one pipeline run needs, borrowed from the agent
pub struct ToolPipeline<'a> {
    pub registry: &'a ToolRegistry,
    pub hooks: &'a HookDispatcher,
    pub gate: &'a PermissionGate,
    pub working_dir: &'a Path,
    pub session_id: Option<&'a str>,
    pub model: &'a ModelInfo,
    pub asker: Option<Arc<dyn QuestionAsker>>,
}

impl ToolPipeline<'_> {
    /// Run `calls` sequentially. Stops before the next call once `cancel` fires.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            if cancel.is_cancelled() {
                return BatchOutcome::Interrupted(results);
            }
            results.push(self.execute_call(call, event_tx, cancel).await);
        }

        if cancel.is_cancelled() {
            return BatchOutcome::Interrupted(results);
        }
        BatchOutcome::Completed(results)
    }

    pub async fn execute_call(
        &self,
        call: &ToolCall,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Content {
        let _ = event_tx.send(TurnEvent::ToolStart {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });

        let payload = |event| {
            HookPayload::new(event, self.working_dir)
                .with_tool(&call.name, &call.input)
                .with_session(self.session_id)
        };

        // ── PreToolUse ─────────────────────────────────────────────
        let outcomes = self
            .hooks
            .trigger(HookEventName::PreToolUse, &payload(HookEventName::PreToolUse))
            .await;
        if let Some(reason) = block_reason(&outcomes) {
            tracing::info!(tool = %call.name, id = %call.id, "Tool call vetoed by hook");
            let result = ToolResult::error(format!("Blocked by PreToolUse hook: {}", reason));
            return finish(call, result, event_tx);
        }

        // ── Permission ─────────────────────────────────────────────
        let category = self.registry.category(&call.name);
        let subject = self
            .registry
            .get(&call.name)
            .and_then(|tool| tool.permission_subject(&call.input));
        let decision = self
            .gate
            .check(call, category, subject.as_deref(), event_tx, cancel)
            .await;
        if let PermissionDecision::Deny { reason } = decision {
            tracing::info!(tool = %call.name, id = %call.id, reason = %reason, "Tool call denied");
            let result = ToolResult::error(format!("Permission denied: {}", reason));
            return finish(call, result, event_tx);
        }

        // ── Execute ────────────────────────────────────────────────
        let ctx = ToolContext {
            working_dir: self.working_dir.to_path_buf(),
            asker: self.asker.clone(),
            model: self.model.clone(),
            cancel: cancel.clone(),
            timeout: None,
            tool_use_id: Some(call.id.clone()),
        };
        let start = Instant::now();
        let result = self
            .registry
            .execute(&call.name, call.input.clone(), &ctx)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // ── PostToolUse / PostToolUseFailure ───────────────────────
        let event = if result.success {
            HookEventName::PostToolUse
        } else {
            HookEventName::PostToolUseFailure
        };
        let post = payload(event).with_result(json!({
            "success": result.success,
            "output": result.output,
            "error": result.error,
            "duration_ms": duration_ms,
        }));
        self.hooks.trigger(event, &post).await;

        finish(call, result, event_tx)
    }
}

/// Emit the `ToolResult` event and fold the result into a content block.
fn finish(
    call: &ToolCall,
    result: ToolResult,
    event_tx: &mpsc::UnboundedSender<TurnEvent>,
) -> Content {
    let output = truncate_output(&result.output);
    let _ = event_tx.send(TurnEvent::ToolResult {
        id: call.id.clone(),
        name: call.name.clone(),
        success: result.success,
        output: output.clone(),
        error: result.error.clone(),
    });

    let content = if result.success {
        output
    } else {
        truncate_output(&result.model_text())
    };
    Content::ToolResult {
        tool_use_id: call.id.clone(),
        content,
        is_error: !result.success,
    }
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
