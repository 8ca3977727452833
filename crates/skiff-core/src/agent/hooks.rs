//! Hook dispatch for lifecycle events
//!
//! Handlers are registered per event name behind a tool matcher. `trigger`
//! runs every matching handler in registration order, one at a time, and
//! reports one outcome per handler. A veto never short-circuits the rest;
//! callers decide what "any outcome blocked" means.
//!
//! ## Built-in handlers
//! - `ShellHook` - runs a configured command (exit 2 vetoes)
//! - `SafetyHook` - vetoes dangerous Bash commands
//! - `LoggingHook` - logs tool completions

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HookMatcherConfig;

use super::hook_handlers::ShellHook;

/// Recognized lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEventName {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    SessionStart,
    Stop,
}

impl HookEventName {
    pub fn all() -> &'static [HookEventName] {
        &[
            HookEventName::PreToolUse,
            HookEventName::PostToolUse,
            HookEventName::PostToolUseFailure,
            HookEventName::SessionStart,
            HookEventName::Stop,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HookEventName::PreToolUse => "PreToolUse",
            HookEventName::PostToolUse => "PostToolUse",
            HookEventName::PostToolUseFailure => "PostToolUseFailure",
            HookEventName::SessionStart => "SessionStart",
            HookEventName::Stop => "Stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.display_name() == s)
    }
}

impl std::fmt::Display for HookEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// What a handler sees. Also the JSON written to shell hooks' stdin.
#[derive(Debug, Clone, Serialize)]
pub struct HookPayload {
    pub hook_event_name: HookEventName,
    pub cwd: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HookPayload {
    pub fn new(event: HookEventName, cwd: impl Into<PathBuf>) -> Self {
        Self {
            hook_event_name: event,
            cwd: cwd.into(),
            tool_name: None,
            tool_input: None,
            tool_result: None,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool(mut self, name: &str, input: &Value) -> Self {
        self.tool_name = Some(name.to_string());
        self.tool_input = Some(input.clone());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.tool_result = Some(result);
        self
    }

    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }
}

/// Result of one handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
    /// Continue with execution
    Continue,
    /// Veto the in-flight action
    Block { reason: String },
}

#[async_trait]
pub trait HookHandler: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` is a handler failure, recorded and skipped. Vetoes are `Ok(Block)`.
    async fn handle(&self, payload: &HookPayload) -> Result<HookResult>;
}

/// Per-handler report from `trigger`
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub handler: String,
    pub blocked: bool,
    pub reason: Option<String>,
    pub error: Option<String>,
}

/// Tool-name predicate for a matcher entry
#[derive(Debug, Clone)]
pub enum ToolMatcher {
    Wildcard,
    Pattern(Regex),
}

impl ToolMatcher {
    /// `None`, `""` and `"*"` match everything; anything else is an anchored regex
    /// (`"Write|Edit"`).
    pub fn parse(pattern: Option<&str>) -> Result<Self> {
        match pattern.map(str::trim) {
            None | Some("") | Some("*") => Ok(ToolMatcher::Wildcard),
            Some(p) => {
                let re = Regex::new(&format!("^(?:{})$", p))
                    .with_context(|| format!("Invalid hook matcher '{}'", p))?;
                Ok(ToolMatcher::Pattern(re))
            }
        }
    }

    /// Events without a tool name match every matcher.
    pub fn matches(&self, tool_name: Option<&str>) -> bool {
        match (self, tool_name) {
            (ToolMatcher::Wildcard, _) | (_, None) => true,
            (ToolMatcher::Pattern(re), Some(name)) => re.is_match(name),
        }
    }
}

struct HookMatcher {
    matcher: ToolMatcher,
    handlers: Vec<Arc<dyn HookHandler>>,
}

#[derive(Default)]
pub struct HookDispatcher {
    matchers: HashMap<HookEventName, Vec<HookMatcher>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build shell hooks from the `[hooks]` settings table. Unknown event
    /// names are skipped with a warning.
    pub fn from_settings(hooks: &HashMap<String, Vec<HookMatcherConfig>>) -> Result<Self> {
        let mut dispatcher = Self::new();

        let mut events: Vec<_> = hooks.keys().collect();
        events.sort();

        for event_name in events {
            let Some(event) = HookEventName::parse(event_name) else {
                tracing::warn!(event = %event_name, "Ignoring hooks for unknown event");
                continue;
            };
            for entry in &hooks[event_name] {
                let matcher = ToolMatcher::parse(entry.matcher.as_deref())?;
                let handlers = entry
                    .hooks
                    .iter()
                    .map(|cmd| {
                        let timeout = cmd.timeout_secs.map(Duration::from_secs);
                        Arc::new(ShellHook::new(&cmd.command, timeout)) as Arc<dyn HookHandler>
                    })
                    .collect();
                dispatcher.register_all(event, matcher, handlers);
            }
        }

        Ok(dispatcher)
    }

    pub fn register(
        &mut self,
        event: HookEventName,
        matcher: ToolMatcher,
        handler: Arc<dyn HookHandler>,
    ) {
        self.register_all(event, matcher, vec![handler]);
    }

    pub fn register_all(
        &mut self,
        event: HookEventName,
        matcher: ToolMatcher,
        handlers: Vec<Arc<dyn HookHandler>>,
    ) {
        self.matchers
            .entry(event)
            .or_default()
            .push(HookMatcher { matcher, handlers });
    }

    pub fn has_handlers(&self, event: HookEventName) -> bool {
        self.matchers
            .get(&event)
            .is_some_and(|entries| entries.iter().any(|m| !m.handlers.is_empty()))
    }

    /// Run every matching handler for `event`, sequentially.
    pub async fn trigger(&self, event: HookEventName, payload: &HookPayload) -> Vec<HookOutcome> {
        let Some(entries) = self.matchers.get(&event) else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        for entry in entries {
            if !entry.matcher.matches(payload.tool_name.as_deref()) {
                continue;
            }
            for handler in &entry.handlers {
                let outcome = match handler.handle(payload).await {
                    Ok(HookResult::Continue) => HookOutcome {
                        handler: handler.name().to_string(),
                        ..Default::default()
                    },
                    Ok(HookResult::Block { reason }) => {
                        tracing::info!(
                            event = %event,
                            handler = handler.name(),
                            tool = payload.tool_name.as_deref().unwrap_or(""),
                            "Hook blocked action: {}",
                            reason
                        );
                        HookOutcome {
                            handler: handler.name().to_string(),
                            blocked: true,
                            reason: Some(reason),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            event = %event,
                            handler = handler.name(),
                            "Hook handler failed: {:#}",
                            e
                        );
                        HookOutcome {
                            handler: handler.name().to_string(),
                            error: Some(format!("{:#}", e)),
                            ..Default::default()
                        }
                    }
                };
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

/// First veto reason among `outcomes`, if any handler blocked
pub fn block_reason(outcomes: &[HookOutcome]) -> Option<String> {
    outcomes.iter().find(|o| o.blocked).map(|o| {
        o.reason
            .clone()
            .unwrap_or_else(|| format!("blocked by {}", o.handler))
    })
}
