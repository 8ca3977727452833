//! Long-term project context.
//!
//! Instruction files in the working directory (SKIFF.md, AGENTS.md, ...) are
//! rendered into the system prompt. Loaded once per agent and cached.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instruction files to search for in the working directory (priority order).
const PROJECT_FILES: &[&str] = &[
    "SKIFF.md",
    "skiff.md",
    "AGENTS.md",
    "agents.md",
    "CLAUDE.md",
    "claude.md",
    ".cursorrules",
    ".windsurfrules",
    ".github/copilot-instructions.md",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Use the highest-priority file found
    #[default]
    FirstMatch,
    /// Concatenate every file found, in priority order
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LongTermContext {
    pub sections: Vec<ContextSection>,
}

impl LongTermContext {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Text appended to the system prompt
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| {
                format!(
                    "[PROJECT INSTRUCTIONS - {}]\n\n{}\n\n[END PROJECT INSTRUCTIONS]",
                    s.source,
                    s.content.trim_end()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, cwd: &Path, strategy: ContextStrategy) -> Result<LongTermContext>;
}

/// Reads instruction files from the working directory
pub struct ProjectContextLoader {
    files: Vec<String>,
}

impl Default for ProjectContextLoader {
    fn default() -> Self {
        Self {
            files: PROJECT_FILES.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl ProjectContextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: Vec<String>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl ContextLoader for ProjectContextLoader {
    async fn load(&self, cwd: &Path, strategy: ContextStrategy) -> Result<LongTermContext> {
        let mut context = LongTermContext::default();

        for filename in &self.files {
            let path = cwd.join(filename);
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
            };
            if content.trim().is_empty() {
                continue;
            }

            tracing::debug!(file = %filename, "Loaded project instructions");
            context.sections.push(ContextSection {
                source: filename.clone(),
                content,
            });
            if strategy == ContextStrategy::FirstMatch {
                break;
            }
        }

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Run cargo fmt.\n").unwrap();
        std::fs::write(dir.path().join(".cursorrules"), "Prefer small diffs.").unwrap();
        std::fs::write(dir.path().join("CLAUDE.md"), "   \n").unwrap();
        dir
    }

    #[tokio::test]
    async fn first_match_keeps_highest_priority_file() {
        let dir = project();
        let context = ProjectContextLoader::new()
            .load(dir.path(), ContextStrategy::FirstMatch)
            .await
            .unwrap();

        assert_eq!(context.sections.len(), 1);
        assert_eq!(context.sections[0].source, "AGENTS.md");
        assert_eq!(
            context.render(),
            "[PROJECT INSTRUCTIONS - AGENTS.md]\n\nRun cargo fmt.\n\n[END PROJECT INSTRUCTIONS]"
        );
    }

    #[tokio::test]
    async fn all_strategy_concatenates_non_empty_files() {
        let dir = project();
        let context = ProjectContextLoader::new()
            .load(dir.path(), ContextStrategy::All)
            .await
            .unwrap();

        let sources: Vec<_> = context.sections.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["AGENTS.md", ".cursorrules"]);
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProjectContextLoader::new()
            .load(dir.path(), ContextStrategy::All)
            .await
            .unwrap();
        assert!(context.is_empty());
        assert_eq!(context.render(), "");
    }
}
