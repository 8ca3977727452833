//! Slash commands
//!
//! A command is a markdown file `<name>.md` with optional YAML frontmatter:
//!
//! ```markdown
//! ---
//! description: Review the staged diff
//! allowed-tools: Bash(git diff:*), Read
//! model: claude-opus
//! ---
//! Review the staged changes. Focus on $ARGUMENTS.
//! ```
//!
//! Files in subdirectories are namespaced with `:` (`git/review.md` is
//! `/git:review`). Project commands shadow user commands of the same name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::paths;

static INVOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^/([A-Za-z0-9_:-]+)(?:\s+(.*))?$").unwrap());

const ARGUMENTS_PLACEHOLDER: &str = "$ARGUMENTS";

/// Result of resolving a command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub expanded_prompt: String,
    pub pre_authorized_tools: Vec<String>,
    pub model_override: Option<String>,
}

/// Split `/name args...` into name and argument string.
pub fn parse_invocation(prompt: &str) -> Option<(String, String)> {
    let caps = INVOCATION.captures(prompt.trim())?;
    let name = caps.get(1)?.as_str().to_string();
    let args = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((name, args))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolList {
    Inline(String),
    List(Vec<String>),
}

impl ToolList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ToolList::List(items) => items,
            ToolList::Inline(raw) => split_tool_list(&raw),
        }
    }
}

/// Split on commas that are not inside parentheses
fn split_tool_list(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    description: Option<String>,
    #[serde(rename = "allowed-tools")]
    allowed_tools: Option<ToolList>,
    model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub name: String,
    pub description: Option<String>,
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
    pub template: String,
    pub source: Option<PathBuf>,
}

impl CommandDefinition {
    pub fn parse(name: &str, content: &str) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(content);
        let meta: Frontmatter = match frontmatter {
            Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)
                .with_context(|| format!("Invalid frontmatter in command '{}'", name))?,
            _ => Frontmatter::default(),
        };

        Ok(Self {
            name: name.to_string(),
            description: meta.description,
            allowed_tools: meta.allowed_tools.map(ToolList::into_vec).unwrap_or_default(),
            model: meta.model,
            template: body.trim().to_string(),
            source: None,
        })
    }

    pub fn expand(&self, args: &str) -> ParsedCommand {
        let expanded_prompt = if self.template.contains(ARGUMENTS_PLACEHOLDER) {
            self.template.replace(ARGUMENTS_PLACEHOLDER, args)
        } else if args.is_empty() {
            self.template.clone()
        } else {
            format!("{}\n\n{}", self.template, args)
        };

        ParsedCommand {
            expanded_prompt,
            pre_authorized_tools: self.allowed_tools.clone(),
            model_override: self.model.clone(),
        }
    }
}

fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let body = &rest[end + 4..];
            let body = body.split_once('\n').map_or("", |(_, b)| b);
            (Some(&rest[..end]), body)
        }
        None => (None, content),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandDefinition>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. An existing command with the same name is kept.
    pub fn register(&mut self, command: CommandDefinition) -> bool {
        if self.commands.contains_key(&command.name) {
            return false;
        }
        self.commands.insert(command.name.clone(), command);
        true
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Expand `name` with `args`, or `None` when no such command exists.
    pub fn parse_command(&self, name: &str, args: &str) -> Option<ParsedCommand> {
        self.commands.get(name).map(|c| c.expand(args))
    }

    /// Load every `*.md` under `dirs`. Earlier directories take precedence.
    pub fn load_dirs(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::new();
        for dir in dirs {
            for command in load_commands_from_dir(dir) {
                let name = command.name.clone();
                if !registry.register(command) {
                    tracing::debug!(command = %name, dir = %dir.display(), "Shadowed command skipped");
                }
            }
        }
        registry
    }
}

fn load_commands_from_dir(dir: &Path) -> Vec<CommandDefinition> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut commands = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(relative) = path.with_extension("").strip_prefix(dir).map(Path::to_path_buf) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":");

        let loaded = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|content| CommandDefinition::parse(&name, &content));
        match loaded {
            Ok(mut command) => {
                command.source = Some(path.to_path_buf());
                commands.push(command);
            }
            Err(e) => tracing::warn!(path = %path.display(), "Skipping command: {:#}", e),
        }
    }
    commands
}

/// Builds the command registry on first use
#[async_trait]
pub trait CommandRegistryFactory: Send + Sync {
    async fn build(&self) -> Result<CommandRegistry>;
}

/// Loads markdown commands from the project and user command directories
pub struct MarkdownCommandLoader {
    dirs: Vec<PathBuf>,
}

impl MarkdownCommandLoader {
    pub fn new(cwd: &Path) -> Self {
        Self {
            dirs: vec![paths::project_commands_dir(cwd), paths::user_commands_dir()],
        }
    }

    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl CommandRegistryFactory for MarkdownCommandLoader {
    async fn build(&self) -> Result<CommandRegistry> {
        let dirs = self.dirs.clone();
        let registry = tokio::task::spawn_blocking(move || CommandRegistry::load_dirs(&dirs))
            .await
            .context("Command loading task failed")?;
        tracing::info!(count = registry.commands.len(), "Loaded commands");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_parsing() {
        assert_eq!(
            parse_invocation("/review  src/lib.rs please"),
            Some(("review".to_string(), "src/lib.rs please".to_string()))
        );
        assert_eq!(
            parse_invocation("/git:commit"),
            Some(("git:commit".to_string(), String::new()))
        );
        assert_eq!(parse_invocation("fix /tmp handling"), None);
        assert_eq!(parse_invocation("/"), None);
    }

    #[test]
    fn frontmatter_and_placeholder_expansion() {
        let command = CommandDefinition::parse(
            "review",
            "---\ndescription: Review code\nallowed-tools: Bash(git diff:*), Read\nmodel: big\n---\nReview $ARGUMENTS carefully.\n",
        )
        .unwrap();

        assert_eq!(command.description.as_deref(), Some("Review code"));
        assert_eq!(command.allowed_tools, vec!["Bash(git diff:*)", "Read"]);

        let parsed = command.expand("src/main.rs");
        assert_eq!(parsed.expanded_prompt, "Review src/main.rs carefully.");
        assert_eq!(parsed.model_override.as_deref(), Some("big"));
    }

    #[test]
    fn arguments_are_appended_without_placeholder() {
        let command = CommandDefinition::parse("explain", "Explain this code.").unwrap();
        assert_eq!(
            command.expand("the parser").expanded_prompt,
            "Explain this code.\n\nthe parser"
        );
        assert_eq!(command.expand("").expanded_prompt, "Explain this code.");
        assert!(command.allowed_tools.is_empty());
    }

    #[test]
    fn unknown_command_is_none() {
        let registry = CommandRegistry::new();
        assert!(registry.parse_command("nope", "").is_none());
    }

    #[tokio::test]
    async fn project_commands_shadow_user_commands() {
        let project = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("git")).unwrap();
        std::fs::write(project.path().join("review.md"), "project review").unwrap();
        std::fs::write(project.path().join("git/commit.md"), "commit it").unwrap();
        std::fs::write(user.path().join("review.md"), "user review").unwrap();
        std::fs::write(user.path().join("notes.txt"), "ignored").unwrap();

        let loader = MarkdownCommandLoader::with_dirs(vec![
            project.path().to_path_buf(),
            user.path().to_path_buf(),
        ]);
        let registry = loader.build().await.unwrap();

        assert_eq!(registry.names(), vec!["git:commit", "review"]);
        assert_eq!(
            registry.parse_command("review", "").unwrap().expanded_prompt,
            "project review"
        );
    }
}
