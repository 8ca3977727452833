//! Write tool - Create or overwrite files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

pub struct WriteTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. Creates parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let path = ctx.resolve_path(&params.file_path);
        let existed = path.exists();

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directories: {}", e));
            }
        }

        if let Err(e) = fs::write(&path, &params.content).await {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        tracing::debug!(path = %path.display(), bytes = params.content.len(), "Wrote file");

        ToolResult::success_with_metadata(
            format!(
                "{} {} ({} bytes)",
                if existed { "Overwrote" } else { "Created" },
                path.display(),
                params.content.len()
            ),
            json!({ "created": !existed, "bytes": params.content.len() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = WriteTool
            .execute(json!({"file_path": "a/b/c.txt", "content": "hello"}), &ctx)
            .await;

        assert!(result.success);
        assert!(result.output.starts_with("Created"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn missing_content_is_invalid() {
        let ctx = ToolContext::default();
        let result = WriteTool.execute(json!({"file_path": "x"}), &ctx).await;
        assert!(!result.success);
        assert!(result.model_text().contains("Invalid parameters"));
    }
}
