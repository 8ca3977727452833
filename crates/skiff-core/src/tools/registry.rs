//! Tool registry for managing available tools
//!
//! Built once per agent (see `agent::lazy`) and read-only afterwards. The
//! registry owns the per-call timeout, cancellation and panic containment, so
//! `execute` always hands back a `ToolResult`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{ModelInfo, ToolDefinition};

/// Tool category for permission checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Never modifies state.
    ReadOnly,
    /// Modifies files, runs commands, etc.
    Write,
    /// Needs the user.
    Interactive,
}

/// Default tool execution timeout (2 minutes)
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool execution result
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn success_with_metadata(output: impl Into<String>, metadata: Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::success(output)
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(msg.to_string()),
            metadata: None,
        }
    }

    /// Failed result that still carries output (e.g. a command's stderr)
    pub fn error_with_output(msg: impl std::fmt::Display, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::error(msg)
        }
    }

    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error(format!("Invalid parameters: {}", msg))
    }

    /// Text the model sees for this result
    pub fn model_text(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) if self.output.is_empty() => error.clone(),
            (Some(error), false) => format!("{}\n\n{}", error, self.output),
            _ => self.output.clone(),
        }
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params).map_err(ToolResult::invalid_parameters)
}

/// Answers `AskUserQuestion` calls. Implemented by whatever front end runs the loop.
#[async_trait]
pub trait QuestionAsker: Send + Sync {
    async fn ask(&self, questions: &Value) -> anyhow::Result<String>;
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub asker: Option<Arc<dyn QuestionAsker>>,
    pub model: ModelInfo,
    pub cancel: CancellationToken,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
    pub tool_use_id: Option<String>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            asker: None,
            model: ModelInfo::default(),
            cancel: CancellationToken::new(),
            timeout: None,
            tool_use_id: None,
        }
    }
}

impl ToolContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    /// Argument the permission rules match against (`Bash(git:*)` matches `command`)
    fn permission_subject(&self, params: &Value) -> Option<String> {
        ["file_path", "path", "command", "pattern"]
            .iter()
            .find_map(|key| params.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    }

    /// Bound for this call when its arguments carry one. Used when the
    /// context sets no override; the registry default applies otherwise.
    fn execution_timeout(&self, _params: &Value) -> Option<Duration> {
        None
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Registry holding every built-in tool
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::implementations::register_builtins(&mut registry);
        registry
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn category(&self, name: &str) -> Option<ToolCategory> {
        self.tools.get(name).map(|t| t.category())
    }

    /// Sorted tool names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the model, restricted to `allow_list` when given, sorted by name
    pub fn get_filtered_definitions(&self, allow_list: Option<&[String]>) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| allow_list.map_or(true, |allow| allow.iter().any(|a| a == t.name())))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute a tool by name with timeout, cancellation and panic containment
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = name, "Unknown tool requested");
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let timeout = ctx
            .timeout
            .or_else(|| tool.execution_timeout(&params))
            .unwrap_or(self.default_timeout);
        let start = Instant::now();
        let run = AssertUnwindSafe(tool.execute(params, ctx)).catch_unwind();

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => ToolResult::error(format!("Tool '{}' cancelled", name)),
            outcome = tokio::time::timeout(timeout, run) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    tracing::error!(tool = name, "Tool panicked during execution");
                    ToolResult::error(format!("Tool '{}' panicked during execution", name))
                }
                Err(_) => {
                    tracing::warn!(
                        tool = name,
                        timeout_secs = timeout.as_secs(),
                        "Tool execution timed out"
                    );
                    ToolResult::error(format!(
                        "Tool '{}' timed out after {} seconds",
                        name,
                        timeout.as_secs()
                    ))
                }
            },
        };

        tracing::debug!(
            tool = name,
            duration_ms = start.elapsed().as_millis() as u64,
            success = result.success,
            "Tool finished"
        );
        result
    }
}

/// Builds the tool registry on first use
#[async_trait]
pub trait ToolRegistryFactory: Send + Sync {
    async fn build(&self) -> anyhow::Result<ToolRegistry>;
}

/// Factory for the built-in tool set
pub struct BuiltinTools;

#[async_trait]
impl ToolRegistryFactory for BuiltinTools {
    async fn build(&self) -> anyhow::Result<ToolRegistry> {
        Ok(ToolRegistry::with_builtins())
    }
}
