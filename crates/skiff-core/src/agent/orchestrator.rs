//! Agent turn loop
//!
//! `Agent` owns everything that outlives a single `run`: the session handle,
//! cached project context, the lazily built tool and command registries, the
//! permission gate and the hook dispatcher.
//!
//! ```text
//!  run(prompt) ──► Requesting ──► Assembling ──► Done
//!                      ▲               │
//!                      └── ToolExecuting ◄┘ (stop_reason == tool_use)
//! ```
//!
//! Every run ends with exactly one `Done` or `Error` event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ai::client::{ModelClient, ModelRequest};
use crate::ai::types::{Content, Message, ModelInfo, Role, StopReason, Usage};
use crate::commands::{parse_invocation, CommandRegistry, CommandRegistryFactory, MarkdownCommandLoader};
use crate::config::Settings;
use crate::error::{AgentError, AgentResult};
use crate::session::{InMemorySessionFactory, Session, SessionFactory};
use crate::tools::registry::{BuiltinTools, QuestionAsker, ToolRegistry, ToolRegistryFactory};

use super::context::{ContextLoader, LongTermContext, ProjectContextLoader};
use super::events::TurnEvent;
use super::executor::{BatchOutcome, ToolPipeline};
use super::hook_handlers::{LoggingHook, SafetyHook};
use super::hooks::{HookDispatcher, HookEventName, HookPayload, ToolMatcher};
use super::lazy::LazyShared;
use super::permissions::{ConfirmationBroker, PermissionGate};
use super::stream;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a coding assistant working in the user's project. \
Use the available tools to inspect and change files, and explain what you did.";

/// Collaborators the agent talks to
pub struct AgentServices {
    pub model: Arc<dyn ModelClient>,
    pub sessions: Arc<dyn SessionFactory>,
    pub tools: Arc<dyn ToolRegistryFactory>,
    pub commands: Arc<dyn CommandRegistryFactory>,
    pub context: Arc<dyn ContextLoader>,
    pub broker: Arc<ConfirmationBroker>,
    pub asker: Option<Arc<dyn QuestionAsker>>,
}

impl AgentServices {
    /// Default collaborators: in-memory sessions, built-in tools, markdown
    /// commands and project instruction files under `working_dir`.
    pub fn new(model: Arc<dyn ModelClient>, working_dir: &Path) -> Self {
        Self {
            model,
            sessions: Arc::new(InMemorySessionFactory::new()),
            tools: Arc::new(BuiltinTools),
            commands: Arc::new(MarkdownCommandLoader::new(working_dir)),
            context: Arc::new(ProjectContextLoader::new()),
            broker: Arc::new(ConfirmationBroker::new()),
            asker: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistryFactory>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandRegistryFactory>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextLoader>) -> Self {
        self.context = context;
        self
    }

    pub fn with_broker(mut self, broker: Arc<ConfirmationBroker>) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_asker(mut self, asker: Arc<dyn QuestionAsker>) -> Self {
        self.asker = Some(asker);
        self
    }
}

/// Result of a successful run
struct RunSummary {
    text: String,
    usage: Usage,
}

pub struct Agent {
    services: AgentServices,
    settings: Settings,
    working_dir: PathBuf,
    tools: LazyShared<ToolRegistry>,
    commands: LazyShared<CommandRegistry>,
    gate: PermissionGate,
    hooks: HookDispatcher,
    session: Option<Arc<dyn Session>>,
    context: Option<LongTermContext>,
    model_override: Option<String>,
    turns: usize,
}

impl Agent {
    pub fn new(services: AgentServices, settings: Settings, working_dir: PathBuf) -> Result<Self> {
        let gate = PermissionGate::from_settings(&settings.permissions, services.broker.clone())?;

        let mut hooks = HookDispatcher::from_settings(&settings.hooks)?;
        if settings.safety_hook {
            hooks.register(
                HookEventName::PreToolUse,
                ToolMatcher::parse(Some("Bash"))?,
                Arc::new(SafetyHook::new()),
            );
        }
        if settings.log_tool_calls {
            for event in [HookEventName::PostToolUse, HookEventName::PostToolUseFailure] {
                hooks.register(event, ToolMatcher::Wildcard, Arc::new(LoggingHook::new()));
            }
        }

        Ok(Self {
            services,
            settings,
            working_dir,
            tools: LazyShared::new("tool registry"),
            commands: LazyShared::new("command registry"),
            gate,
            hooks,
            session: None,
            context: None,
            model_override: None,
            turns: 0,
        })
    }

    /// Resume an existing session instead of creating one on first run
    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub fn hooks_mut(&mut self) -> &mut HookDispatcher {
        &mut self.hooks
    }

    /// Answers permission requests published by this agent
    pub fn broker(&self) -> Arc<ConfirmationBroker> {
        self.services.broker.clone()
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    /// Turns used by the current (or last) run
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Run the loop on a spawned task. The agent is handed back when the run ends.
    pub fn spawn_run(
        mut self,
        prompt: String,
        cancel: CancellationToken,
    ) -> (mpsc::UnboundedReceiver<TurnEvent>, JoinHandle<Agent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            self.run(&prompt, &event_tx, &cancel).await;
            self
        });
        (event_rx, handle)
    }

    /// Drive one prompt to completion. Emits exactly one terminal event.
    pub async fn run(
        &mut self,
        prompt: &str,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) {
        match self.run_inner(prompt, event_tx, cancel).await {
            Ok(summary) => {
                tracing::info!(turns = self.turns, "Run finished");
                let _ = event_tx.send(TurnEvent::Done {
                    text: summary.text,
                    usage: summary.usage,
                    turns: self.turns,
                });
                let payload = HookPayload::new(HookEventName::Stop, &self.working_dir)
                    .with_session(self.session.as_ref().map(|s| s.id()));
                self.hooks.trigger(HookEventName::Stop, &payload).await;
            }
            Err(e) => {
                match &e {
                    AgentError::Cancelled => tracing::info!("Run cancelled"),
                    AgentError::MaxTurnsExceeded(max) => {
                        tracing::warn!(max_turns = max, "Run stopped at turn budget")
                    }
                    _ => tracing::error!(turns = self.turns, "Run failed: {}", e),
                }
                let _ = event_tx.send(TurnEvent::Error {
                    message: e.to_string(),
                    kind: e.kind(),
                });
            }
        }
    }

    async fn run_inner(
        &mut self,
        prompt: &str,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> AgentResult<RunSummary> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        self.turns = 0;
        self.model_override = None;

        let session = self.ensure_session().await?;
        self.ensure_context().await;

        let effective_prompt = self.preprocess_command(prompt, event_tx).await;
        session
            .add_message(Message::user_text(effective_prompt), &self.model_info())
            .await
            .map_err(AgentError::Session)?;

        let max_turns = self.settings.max_turns;
        let mut text = String::new();
        let mut usage = Usage::default();

        while self.turns < max_turns {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            self.turns += 1;
            tracing::debug!(turn = self.turns, session_id = %session.id(), "Requesting model response");

            let registry = self.ensure_tools().await?;
            let request = self.build_request(&registry, session.as_ref()).await?;
            let response = stream::assemble(
                self.services.model.as_ref(),
                request,
                self.settings.model.streaming,
                event_tx,
                cancel,
            )
            .await?;

            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if let Some(turn_usage) = &response.usage {
                usage.accumulate(turn_usage);
            }

            let (turn_text, calls) = response.split();
            if !turn_text.is_empty() {
                if !text.is_empty() {
                    text.push_str("\n\n");
                }
                text.push_str(&turn_text);
            }

            let executing = response.stop_reason == StopReason::ToolUse && !calls.is_empty();
            let mut content = response.content.clone();
            if !executing && !calls.is_empty() {
                // Calls that will never run must not reach history without results
                tracing::warn!(
                    turn = self.turns,
                    count = calls.len(),
                    stop_reason = ?response.stop_reason,
                    "Dropping tool calls outside a tool_use stop"
                );
                content.retain(|block| !matches!(block, Content::ToolUse { .. }));
            }

            if !content.is_empty() {
                session
                    .add_message(Message::assistant_blocks(content), &self.model_info())
                    .await
                    .map_err(AgentError::Session)?;
            }

            if !executing {
                return Ok(RunSummary { text, usage });
            }

            tracing::info!(turn = self.turns, count = calls.len(), "Executing tool calls");
            let model = self.model_info();
            let pipeline = ToolPipeline {
                registry: &registry,
                hooks: &self.hooks,
                gate: &self.gate,
                working_dir: &self.working_dir,
                session_id: Some(session.id()),
                model: &model,
                asker: self.services.asker.clone(),
            };

            match pipeline.execute_batch(&calls, event_tx, cancel).await {
                BatchOutcome::Completed(results) => {
                    if let Err(e) = session.add_message(Message::user_blocks(results), &model).await {
                        if let Err(discard) = self.discard_incomplete_turn().await {
                            tracing::warn!("Failed to discard unpaired turn: {:#}", discard);
                        }
                        return Err(AgentError::Session(e));
                    }
                }
                BatchOutcome::Interrupted(_) => {
                    if let Err(e) = self.discard_incomplete_turn().await {
                        tracing::warn!("Failed to discard interrupted turn: {:#}", e);
                    }
                    return Err(AgentError::Cancelled);
                }
            }
        }

        Err(AgentError::MaxTurnsExceeded(max_turns))
    }

    /// Remove a trailing assistant message whose tool calls never got results.
    /// Returns whether anything was removed.
    pub async fn discard_incomplete_turn(&self) -> Result<bool> {
        let Some(session) = &self.session else {
            return Ok(false);
        };
        let messages = session.messages_for_llm().await?;
        let incomplete = messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant && !m.tool_use_ids().is_empty());
        if incomplete {
            session.remove_last_message().await?;
            tracing::info!(session_id = %session.id(), "Discarded incomplete assistant turn");
        }
        Ok(incomplete)
    }

    async fn ensure_session(&mut self) -> AgentResult<Arc<dyn Session>> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        let session = self
            .services
            .sessions
            .create(&self.working_dir)
            .await
            .map_err(AgentError::Session)?;
        self.session = Some(session.clone());

        let payload = HookPayload::new(HookEventName::SessionStart, &self.working_dir)
            .with_session(Some(session.id()));
        self.hooks.trigger(HookEventName::SessionStart, &payload).await;
        Ok(session)
    }

    async fn ensure_context(&mut self) {
        if self.context.is_some() {
            return;
        }
        match self
            .services
            .context
            .load(&self.working_dir, self.settings.context.strategy)
            .await
        {
            Ok(context) => {
                tracing::debug!(sections = context.sections.len(), "Loaded project context");
                self.context = Some(context);
            }
            Err(e) => tracing::warn!("Failed to load project context: {:#}", e),
        }
    }

    async fn ensure_tools(&self) -> AgentResult<Arc<ToolRegistry>> {
        let factory = self.services.tools.clone();
        self.tools
            .get_or_init(move || async move { factory.build().await })
            .await
    }

    async fn ensure_commands(&self) -> AgentResult<Arc<CommandRegistry>> {
        let factory = self.services.commands.clone();
        self.commands
            .get_or_init(move || async move { factory.build().await })
            .await
    }

    /// Expand `/name args` through the command registry. Anything that does
    /// not resolve is used verbatim.
    async fn preprocess_command(
        &mut self,
        prompt: &str,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> String {
        let Some((name, args)) = parse_invocation(prompt) else {
            return prompt.to_string();
        };

        let registry = match self.ensure_commands().await {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(command = %name, "Command lookup failed: {}", e);
                return prompt.to_string();
            }
        };
        let Some(parsed) = registry.parse_command(&name, &args) else {
            return prompt.to_string();
        };

        tracing::info!(command = %name, "Expanded command");
        self.gate.allow_tools(&parsed.pre_authorized_tools);
        if parsed.model_override.is_some() {
            self.model_override = parsed.model_override;
        }
        let _ = event_tx.send(TurnEvent::Text {
            text: format!("[Command: /{}]\n", name),
        });
        parsed.expanded_prompt
    }

    async fn build_request(
        &self,
        registry: &ToolRegistry,
        session: &dyn Session,
    ) -> AgentResult<ModelRequest> {
        let messages = session
            .messages_for_llm()
            .await
            .map_err(AgentError::Session)?;

        Ok(ModelRequest {
            model: self.active_model(),
            system_prompt: self.system_prompt(),
            messages,
            tools: registry.get_filtered_definitions(self.settings.allowed_tools.as_deref()),
            max_tokens: self.settings.model.max_tokens,
        })
    }

    fn system_prompt(&self) -> String {
        let base = self
            .settings
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        match &self.context {
            Some(context) if !context.is_empty() => format!("{}\n\n{}", base, context.render()),
            _ => base.to_string(),
        }
    }

    fn active_model(&self) -> String {
        self.model_override
            .clone()
            .unwrap_or_else(|| self.settings.model.model.clone())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self
                .settings
                .model
                .provider
                .clone()
                .unwrap_or_else(|| self.services.model.provider().to_string()),
            model: self.active_model(),
        }
    }
}
