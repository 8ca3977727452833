//! Settings loaded from `settings.toml`
//!
//! Lookup order: `<cwd>/.skiff/settings.toml`, then `~/.skiff/settings.toml`,
//! then built-in defaults. The first file found is used as-is.
//!
//! ```toml
//! max_turns = 30
//! allowed_tools = ["Read", "Glob", "Bash"]
//!
//! [model]
//! model = "claude-sonnet"
//! streaming = true
//!
//! [permissions]
//! mode = "supervised"
//! allow = ["Bash(cargo:*)"]
//! deny = ["Bash(rm:*)"]
//!
//! [[hooks.PreToolUse]]
//! matcher = "Write|Edit"
//!
//! [[hooks.PreToolUse.hooks]]
//! command = "./scripts/check-write.sh"
//! timeout_secs = 10
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::context::ContextStrategy;
use crate::agent::permissions::PermissionMode;
use crate::paths;

pub const DEFAULT_MAX_TURNS: usize = 50;
pub const DEFAULT_MAX_TOKENS: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_turns: usize,
    pub system_prompt: Option<String>,
    /// Restricts the tool catalogue sent to the model
    pub allowed_tools: Option<Vec<String>>,
    /// Veto dangerous Bash commands before they run
    pub safety_hook: bool,
    /// Log every tool completion
    pub log_tool_calls: bool,
    pub model: ModelSettings,
    pub permissions: PermissionSettings,
    pub context: ContextSettings,
    /// Event name -> matcher entries
    pub hooks: HashMap<String, Vec<HookMatcherConfig>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: None,
            allowed_tools: None,
            safety_hook: true,
            log_tool_calls: true,
            model: ModelSettings::default(),
            permissions: PermissionSettings::default(),
            context: ContextSettings::default(),
            hooks: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    pub streaming: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: "default".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    pub mode: PermissionMode,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub strategy: ContextStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookMatcherConfig {
    /// Tool-name regex; absent or `*` matches every tool
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub hooks: Vec<HookCommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommandConfig {
    pub command: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid settings {}", path.display()))
    }

    /// Load settings for a working directory. Returns the file used, if any.
    pub fn load(cwd: &Path) -> Result<(Self, Option<PathBuf>)> {
        Self::load_from(&[paths::project_settings_file(cwd), paths::user_settings_file()])
    }

    fn load_from(candidates: &[PathBuf]) -> Result<(Self, Option<PathBuf>)> {
        for path in candidates {
            if path.is_file() {
                let settings = Self::from_file(path)?;
                tracing::info!(path = %path.display(), "Loaded settings");
                return Ok((settings, Some(path.clone())));
            }
        }
        Ok((Self::default(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_settings() {
        let settings: Settings = toml::from_str(
            r#"
            max_turns = 7
            allowed_tools = ["Read", "Bash"]
            safety_hook = false

            [model]
            model = "claude-sonnet"
            streaming = false

            [permissions]
            mode = "autonomous"
            deny = ["Bash(rm:*)"]

            [context]
            strategy = "all"

            [[hooks.PreToolUse]]
            matcher = "Write|Edit"

            [[hooks.PreToolUse.hooks]]
            command = "exit 0"
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(settings.max_turns, 7);
        assert!(!settings.safety_hook);
        assert!(!settings.model.streaming);
        assert_eq!(settings.model.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.permissions.mode, PermissionMode::Autonomous);
        assert_eq!(settings.context.strategy, ContextStrategy::All);
        let pre = &settings.hooks["PreToolUse"];
        assert_eq!(pre[0].matcher.as_deref(), Some("Write|Edit"));
        assert_eq!(pre[0].hooks[0].timeout_secs, Some(5));
    }

    #[test]
    fn defaults_apply_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, path) = Settings::load_from(&[dir.path().join("missing.toml")]).unwrap();
        assert!(path.is_none());
        assert_eq!(settings.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(settings.permissions.mode, PermissionMode::Supervised);
        assert!(settings.model.streaming);
    }

    #[test]
    fn first_existing_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project.toml");
        let user = dir.path().join("user.toml");
        std::fs::write(&project, "max_turns = 3").unwrap();
        std::fs::write(&user, "max_turns = 9").unwrap();

        let (settings, path) = Settings::load_from(&[project.clone(), user]).unwrap();
        assert_eq!(settings.max_turns, 3);
        assert_eq!(path, Some(project));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_turns = \"many\"").unwrap();
        assert!(Settings::from_file(&path).is_err());
    }
}
