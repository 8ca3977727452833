//! Read tool - Read file contents

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext, ToolResult};

const DEFAULT_LINE_LIMIT: usize = 2000;

pub struct ReadTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Read a file with line numbers. Supports line offset/limit for large files. Detects binary files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "number",
                    "description": "The line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "number",
                    "description": "The number of lines to read"
                }
            },
            "required": ["file_path"],
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

        let path = ctx.resolve_path(&params.file_path);
        if !path.exists() {
            return ToolResult::error(format!("File not found: {}", params.file_path));
        }
        if !path.is_file() {
            return ToolResult::error(format!("Path is not a file: {}", path.display()));
        }

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        if bytes[..bytes.len().min(8192)].contains(&0) {
            return ToolResult::success(format!(
                "Binary file: {} ({} bytes)",
                path.display(),
                bytes.len()
            ));
        }

        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("File is not valid UTF-8: {}", e)),
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        if total_lines == 0 {
            return ToolResult::success_with_metadata("", json!({ "total_lines": 0 }));
        }

        let start = params.offset.unwrap_or(1).max(1) - 1;
        if start >= total_lines {
            return ToolResult::error(format!(
                "Start line {} is beyond file length ({})",
                start + 1,
                total_lines
            ));
        }
        let end = (start + params.limit.unwrap_or(DEFAULT_LINE_LIMIT)).min(total_lines);

        let numbered: Vec<String> = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{}", start + i + 1, line))
            .collect();

        ToolResult::success_with_metadata(
            numbered.join("\n"),
            json!({
                "total_lines": total_lines,
                "start_line": start + 1,
                "lines_returned": end - start
            }),
        )
    }
}
