//! Permission gate and confirmation rendezvous.
//!
//! `decide` resolves a tool call against static rules. When the answer is
//! `Ask`, `check` publishes a `ConfirmationRequest`, parks on a oneshot keyed
//! by the request id in the shared `ConfirmationBroker`, and re-emits
//! `WaitingForPermission` on every heartbeat until the answer arrives or the
//! run is cancelled (which resolves as a denial).
//!
//! Rule syntax: `Tool` or `Tool(specifier)`. The specifier is a glob matched
//! against the call's primary argument; a trailing `:*` is a word prefix
//! (`Bash(git:*)` matches `git status`). For Bash, allow rules must cover
//! every simple command of a chained line, while deny rules fire on any of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::types::ToolCall;
use crate::config::PermissionSettings;
use crate::tools::registry::ToolCategory;

use super::events::TurnEvent;
use super::hook_handlers::simple_commands;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Ask before any state-changing tool runs
    #[default]
    Supervised,
    /// Run everything not explicitly denied
    Autonomous,
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone)]
enum RuleSpec {
    Prefix(String),
    Glob(glob::Pattern),
}

#[derive(Debug, Clone)]
pub struct PermissionRule {
    raw: String,
    tool: String,
    spec: Option<RuleSpec>,
}

impl PermissionRule {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (tool, spec) = match raw.split_once('(') {
            None => (raw, None),
            Some((tool, rest)) => {
                let Some(inner) = rest.strip_suffix(')') else {
                    bail!("Unclosed parenthesis in permission rule '{}'", raw);
                };
                let spec = match inner.strip_suffix(":*") {
                    Some(prefix) => RuleSpec::Prefix(prefix.to_string()),
                    None => RuleSpec::Glob(
                        glob::Pattern::new(inner)
                            .with_context(|| format!("Invalid pattern in rule '{}'", raw))?,
                    ),
                };
                (tool, Some(spec))
            }
        };
        if tool.is_empty() {
            bail!("Permission rule '{}' has no tool name", raw);
        }
        Ok(Self {
            raw: raw.to_string(),
            tool: tool.to_string(),
            spec,
        })
    }

    /// Whether the rule grants `subject`. A chained Bash command is granted
    /// only when every simple command in it is.
    pub fn matches(&self, tool: &str, subject: Option<&str>) -> bool {
        if self.tool != tool {
            return false;
        }
        match (&self.spec, subject) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(spec), Some(subject)) if tool == "Bash" => {
                if has_substitution(subject) {
                    return false;
                }
                let parts = bash_parts(subject);
                match parts.as_slice() {
                    [] => false,
                    [_] => spec.matches(subject),
                    parts => parts.iter().all(|part| spec.matches(part)),
                }
            }
            (Some(spec), Some(subject)) => spec.matches(subject),
        }
    }

    /// Whether the rule hits `subject` or, for Bash, any simple command in it
    pub fn matches_any_part(&self, tool: &str, subject: Option<&str>) -> bool {
        if self.matches(tool, subject) {
            return true;
        }
        match (&self.spec, subject) {
            (Some(spec), Some(subject)) if self.tool == tool && tool == "Bash" => {
                bash_parts(subject).iter().any(|part| spec.matches(part))
            }
            _ => false,
        }
    }
}

impl RuleSpec {
    fn matches(&self, subject: &str) -> bool {
        match self {
            RuleSpec::Prefix(prefix) => {
                subject == prefix
                    || subject
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with(char::is_whitespace))
            }
            RuleSpec::Glob(pattern) => pattern.matches(subject),
        }
    }
}

fn bash_parts(command: &str) -> Vec<String> {
    simple_commands(command)
        .into_iter()
        .map(|words| words.join(" "))
        .collect()
}

fn has_substitution(command: &str) -> bool {
    command.contains("$(") || command.contains('`')
}

impl std::fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_rules(raw: &[String]) -> Result<Vec<PermissionRule>> {
    raw.iter().map(|r| PermissionRule::parse(r)).collect()
}

#[derive(Default)]
struct RuleSet {
    allow: Vec<PermissionRule>,
    deny: Vec<PermissionRule>,
    /// Granted through "allow always" answers or command pre-authorization
    approved: Vec<PermissionRule>,
}

/// Patterns offered with a confirmation request, most specific first
pub fn suggestions(tool: &str, subject: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(subject) = subject.filter(|s| !s.is_empty()) {
        if tool == "Bash" {
            if let Some(program) = subject.split_whitespace().next() {
                out.push(format!("Bash({}:*)", program));
            }
        }
        out.push(format!("{}({})", tool, subject));
    }
    out.push(tool.to_string());
    out
}

// ============================================================================
// Confirmation rendezvous
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationRequest {
    pub id: String,
    pub tool: String,
    pub input: Value,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAction {
    AllowOnce,
    /// Allow and add the first suggestion to the approved rules
    AllowAlways,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationResponse {
    pub id: String,
    pub action: ConfirmationAction,
}

/// Correlates confirmation requests with the answers produced by a front end.
///
/// Shared (behind an `Arc`) between the agent and whoever answers prompts.
#[derive(Default)]
pub struct ConfirmationBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<ConfirmationAction>>>,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str) -> oneshot::Receiver<ConfirmationAction> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.to_string(), tx);
        rx
    }

    /// Deliver an answer. Returns false for unknown or already-answered ids.
    pub fn respond(&self, response: ConfirmationResponse) -> bool {
        let Some(tx) = self.pending.lock().remove(&response.id) else {
            tracing::debug!(request_id = %response.id, "Ignoring response for unknown request");
            return false;
        };
        tx.send(response.action).is_ok()
    }

    pub fn abandon(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Drop every pending request. Test harnesses only.
    pub fn reset(&self) {
        self.pending.lock().clear();
    }
}

// ============================================================================
// Gate
// ============================================================================

pub struct PermissionGate {
    mode: PermissionMode,
    rules: RwLock<RuleSet>,
    broker: Arc<ConfirmationBroker>,
    heartbeat: Duration,
}

impl PermissionGate {
    pub fn new(mode: PermissionMode, broker: Arc<ConfirmationBroker>) -> Self {
        Self {
            mode,
            rules: RwLock::new(RuleSet::default()),
            broker,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    pub fn from_settings(settings: &PermissionSettings, broker: Arc<ConfirmationBroker>) -> Result<Self> {
        let gate = Self::new(settings.mode, broker);
        {
            let mut rules = gate.rules.write();
            rules.allow = parse_rules(&settings.allow)?;
            rules.deny = parse_rules(&settings.deny)?;
        }
        Ok(gate)
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn broker(&self) -> &Arc<ConfirmationBroker> {
        &self.broker
    }

    /// Add an approved pattern. Applies from the next `decide` call.
    pub fn grant(&self, pattern: &str) -> Result<()> {
        let rule = PermissionRule::parse(pattern)?;
        tracing::info!(rule = %rule, "Granted permission rule");
        self.rules.write().approved.push(rule);
        Ok(())
    }

    /// Pre-authorize tools named by a command (`allowed-tools` frontmatter).
    /// Unparseable entries are skipped.
    pub fn allow_tools(&self, tools: &[String]) {
        for tool in tools {
            if let Err(e) = self.grant(tool) {
                tracing::warn!(rule = %tool, "Skipping pre-authorized tool: {:#}", e);
            }
        }
    }

    /// Static decision. `category` is `None` for tools the registry does not
    /// know; those are let through to fail at execution.
    pub fn decide(
        &self,
        tool: &str,
        category: Option<ToolCategory>,
        subject: Option<&str>,
    ) -> PermissionDecision {
        let rules = self.rules.read();

        if let Some(rule) = rules
            .deny
            .iter()
            .find(|r| r.matches_any_part(tool, subject))
        {
            return PermissionDecision::Deny {
                reason: format!("denied by rule {}", rule),
            };
        }
        if rules
            .allow
            .iter()
            .chain(rules.approved.iter())
            .any(|r| r.matches(tool, subject))
        {
            return PermissionDecision::Allow;
        }
        if self.mode == PermissionMode::Autonomous {
            return PermissionDecision::Allow;
        }
        match category {
            None | Some(ToolCategory::ReadOnly) | Some(ToolCategory::Interactive) => {
                PermissionDecision::Allow
            }
            Some(ToolCategory::Write) => PermissionDecision::Ask,
        }
    }

    /// Decide, and if needed wait for an external answer. Never returns `Ask`.
    pub async fn check(
        &self,
        call: &ToolCall,
        category: Option<ToolCategory>,
        subject: Option<&str>,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        match self.decide(&call.name, category, subject) {
            PermissionDecision::Ask => {}
            decided => return decided,
        }

        let request = ConfirmationRequest {
            id: Uuid::new_v4().to_string(),
            tool: call.name.clone(),
            input: call.input.clone(),
            suggestions: suggestions(&call.name, subject),
        };
        let id = request.id.clone();
        let first_suggestion = request.suggestions.first().cloned();
        let mut response_rx = self.broker.register(&id);

        tracing::info!(tool = %call.name, request_id = %id, "Waiting for permission");
        let _ = event_tx.send(TurnEvent::PermissionRequest { request });
        let _ = event_tx.send(TurnEvent::WaitingForPermission { id: id.clone() });

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.broker.abandon(&id);
                    tracing::info!(tool = %call.name, request_id = %id, "Permission wait cancelled");
                    return PermissionDecision::Deny {
                        reason: "request cancelled".to_string(),
                    };
                }
                answer = &mut response_rx => {
                    return match answer {
                        Ok(ConfirmationAction::AllowOnce) => PermissionDecision::Allow,
                        Ok(ConfirmationAction::AllowAlways) => {
                            if let Some(pattern) = &first_suggestion {
                                if let Err(e) = self.grant(pattern) {
                                    tracing::warn!(rule = %pattern, "Failed to record approval: {:#}", e);
                                }
                            }
                            PermissionDecision::Allow
                        }
                        Ok(ConfirmationAction::Deny) => PermissionDecision::Deny {
                            reason: "denied by user".to_string(),
                        },
                        Err(_) => PermissionDecision::Deny {
                            reason: "request abandoned".to_string(),
                        },
                    };
                }
                _ = heartbeat.tick() => {
                    let _ = event_tx.send(TurnEvent::WaitingForPermission { id: id.clone() });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(mode: PermissionMode, allow: &[&str], deny: &[&str]) -> PermissionGate {
        let settings = PermissionSettings {
            mode,
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        };
        PermissionGate::from_settings(&settings, Arc::new(ConfirmationBroker::new())).unwrap()
    }

    fn write_call() -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: "Write".to_string(),
            input: json!({"file_path": "src/lib.rs", "content": ""}),
        }
    }

    #[test]
    fn rule_matching() {
        let prefix = PermissionRule::parse("Bash(git:*)").unwrap();
        assert!(prefix.matches("Bash", Some("git status")));
        assert!(prefix.matches("Bash", Some("git")));
        assert!(!prefix.matches("Bash", Some("gitk")));
        assert!(!prefix.matches("Bash", None));

        let glob = PermissionRule::parse("Write(src/*)").unwrap();
        assert!(glob.matches("Write", Some("src/lib.rs")));
        assert!(!glob.matches("Write", Some("docs/a.md")));

        assert!(PermissionRule::parse("Read").unwrap().matches("Read", None));
        assert!(PermissionRule::parse("Bash(ls").is_err());
    }

    #[test]
    fn chained_bash_needs_every_part_allowed() {
        let gate = gate(PermissionMode::Supervised, &[], &["Bash(rm:*)"]);
        gate.grant("Bash(git:*)").unwrap();
        let write = Some(ToolCategory::Write);

        assert_eq!(
            gate.decide("Bash", write, Some("git status && git diff")),
            PermissionDecision::Allow
        );
        assert_eq!(
            gate.decide("Bash", write, Some("git status && make install")),
            PermissionDecision::Ask
        );
        assert_eq!(
            gate.decide("Bash", write, Some("git log | sh")),
            PermissionDecision::Ask
        );
        assert_eq!(
            gate.decide("Bash", write, Some("git show $(cat ref)")),
            PermissionDecision::Ask
        );
        assert!(matches!(
            gate.decide("Bash", write, Some("git status && rm -rf src")),
            PermissionDecision::Deny { .. }
        ));
    }

    #[test]
    fn decision_order() {
        let gate = gate(
            PermissionMode::Supervised,
            &["Bash(cargo:*)"],
            &["Bash(cargo publish)"],
        );
        let write = Some(ToolCategory::Write);

        assert!(matches!(
            gate.decide("Bash", write, Some("cargo publish")),
            PermissionDecision::Deny { .. }
        ));
        assert_eq!(
            gate.decide("Bash", write, Some("cargo test")),
            PermissionDecision::Allow
        );
        assert_eq!(gate.decide("Bash", write, Some("ls")), PermissionDecision::Ask);
        assert_eq!(
            gate.decide("Read", Some(ToolCategory::ReadOnly), Some("a")),
            PermissionDecision::Allow
        );

        let autonomous = self::gate(PermissionMode::Autonomous, &[], &["Write"]);
        assert_eq!(autonomous.decide("Bash", write, Some("ls")), PermissionDecision::Allow);
        assert!(matches!(
            autonomous.decide("Write", write, None),
            PermissionDecision::Deny { .. }
        ));
    }

    #[test]
    fn bash_suggestions_start_with_prefix_rule() {
        assert_eq!(
            suggestions("Bash", Some("npm test --watch")),
            vec!["Bash(npm:*)", "Bash(npm test --watch)", "Bash"]
        );
        assert_eq!(suggestions("Write", None), vec!["Write"]);
    }

    #[tokio::test]
    async fn ask_waits_for_matching_response() {
        let gate = gate(PermissionMode::Supervised, &[], &[]);
        let broker = gate.broker().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let answer = tokio::spawn(async move {
            let request = loop {
                match rx.recv().await {
                    Some(TurnEvent::PermissionRequest { request }) => break request,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            };
            assert!(!broker.respond(ConfirmationResponse {
                id: "someone-else".to_string(),
                action: ConfirmationAction::Deny,
            }));
            assert!(broker.respond(ConfirmationResponse {
                id: request.id.clone(),
                action: ConfirmationAction::AllowAlways,
            }));
            assert!(!broker.respond(ConfirmationResponse {
                id: request.id,
                action: ConfirmationAction::Deny,
            }));
        });

        let call = write_call();
        let decision = gate
            .check(&call, Some(ToolCategory::Write), Some("src/lib.rs"), &tx, &cancel)
            .await;
        answer.await.unwrap();

        assert_eq!(decision, PermissionDecision::Allow);
        // "allow always" applies to the next call
        assert_eq!(
            gate.decide("Write", Some(ToolCategory::Write), Some("src/lib.rs")),
            PermissionDecision::Allow
        );
    }

    #[tokio::test]
    async fn cancellation_resolves_pending_wait_as_deny() {
        let gate = gate(PermissionMode::Supervised, &[], &[]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let decision = gate
            .check(&write_call(), Some(ToolCategory::Write), None, &tx, &cancel)
            .await;

        assert!(matches!(decision, PermissionDecision::Deny { .. }));
        assert!(gate.broker().pending_ids().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_re_emits_waiting_events() {
        let gate = gate(PermissionMode::Supervised, &[], &[])
            .with_heartbeat(Duration::from_millis(10));
        let broker = gate.broker().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let answer = tokio::spawn(async move {
            let mut waiting = 0;
            while let Some(event) = rx.recv().await {
                if let TurnEvent::WaitingForPermission { id } = event {
                    waiting += 1;
                    if waiting == 3 {
                        broker.respond(ConfirmationResponse {
                            id,
                            action: ConfirmationAction::Deny,
                        });
                        break;
                    }
                }
            }
            waiting
        });

        let decision = gate
            .check(&write_call(), Some(ToolCategory::Write), None, &tx, &cancel)
            .await;
        assert_eq!(answer.await.unwrap(), 3);
        assert_eq!(
            decision,
            PermissionDecision::Deny {
                reason: "denied by user".to_string()
            }
        );
    }
}
