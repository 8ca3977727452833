//! Edit tool - Exact string replacement in a file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct EditTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Replace text in a file. old_string must match exactly once unless replace_all is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)",
                    "default": false
                }
            },
            "required": ["file_path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.old_string.is_empty() {
            return ToolResult::invalid_parameters("old_string must not be empty");
        }
        if params.old_string == params.new_string {
            return ToolResult::invalid_parameters("old_string and new_string are identical");
        }

        let path = ctx.resolve_path(&params.file_path);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::error(format!("File not found: {}", params.file_path))
            }
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let count = content.matches(&params.old_string).count();
        let updated = match (count, params.replace_all) {
            (0, _) => {
                return ToolResult::error(format!(
                    "String not found in file: {:?}",
                    params.old_string
                ))
            }
            (1, _) | (_, true) => content.replace(&params.old_string, &params.new_string),
            (n, false) => {
                return ToolResult::error(format!(
                    "String found {} times. Use replace_all=true to replace all occurrences, or provide more context to make it unique.",
                    n
                ))
            }
        };

        match fs::write(&path, updated).await {
            Ok(()) => ToolResult::success_with_metadata(
                format!("Replaced {} occurrence(s) in {}", count, path.display()),
                json!({ "replacements": count }),
            ),
            Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
        }
    }
}
