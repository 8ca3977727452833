//! Glob tool - Find files by pattern

use std::path::Path;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext, ToolResult};

const MAX_RESULTS: usize = 200;
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv"];

pub struct GlobTool;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern such as `**/*.rs` or `src/**/mod.rs`. Paths are returned relative to the search root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (defaults to the working directory)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let pattern = match Pattern::new(&params.pattern) {
            Ok(p) => p,
            Err(e) => return ToolResult::invalid_parameters(format!("Bad pattern: {}", e)),
        };
        let root = match &params.path {
            Some(p) => ctx.resolve_path(p),
            None => ctx.working_dir.clone(),
        };
        if !root.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", root.display()));
        }

        let found = match tokio::task::spawn_blocking(move || find_matches(&root, &pattern)).await
        {
            Ok(found) => found,
            Err(e) => return ToolResult::error(format!("Search failed: {}", e)),
        };

        let total = found.len();
        let mut output = found
            .into_iter()
            .take(MAX_RESULTS)
            .collect::<Vec<_>>()
            .join("\n");
        if total > MAX_RESULTS {
            output.push_str(&format!("\n... ({} more)", total - MAX_RESULTS));
        }
        if total == 0 {
            output = "No files found".to_string();
        }

        ToolResult::success_with_metadata(output, json!({ "count": total }))
    }
}

fn find_matches(root: &Path, pattern: &Pattern) -> Vec<String> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut found: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            pattern
                .matches_path_with(relative, options)
                .then(|| relative.to_string_lossy().into_owned())
        })
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_nested_files_and_skips_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/agent")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/agent/mod.rs"), "").unwrap();
        std::fs::write(root.join("target/debug/build.rs"), "").unwrap();
        std::fs::write(root.join("README.md"), "").unwrap();

        let ctx = ToolContext::new(root.to_path_buf());
        let result = GlobTool.execute(json!({"pattern": "**/*.rs"}), &ctx).await;

        assert!(result.success);
        assert_eq!(result.output, "src/agent/mod.rs\nsrc/lib.rs");
    }

    #[tokio::test]
    async fn no_match_is_still_success() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());
        let result = GlobTool.execute(json!({"pattern": "*.py"}), &ctx).await;
        assert!(result.success);
        assert_eq!(result.output, "No files found");
    }
}
