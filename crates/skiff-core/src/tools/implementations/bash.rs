//! Bash tool - Run a shell command in the working directory

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolResult};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
/// Added to the command's own limit for the registry's outer bound
const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    /// Milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command with `sh -c` in the working directory. Returns combined stdout and stderr; a non-zero exit status is reported as a failure."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (default 120000, max 600000)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn execution_timeout(&self, params: &Value) -> Option<Duration> {
        let requested = params.get("timeout").and_then(Value::as_u64);
        Some(command_timeout(requested) + TIMEOUT_MARGIN)
    }

    fn permission_subject(&self, params: &Value) -> Option<String> {
        params
            .get("command")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
        };

        let limit = command_timeout(params.timeout);
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return ToolResult::error("Command cancelled"),
            res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
                Ok(res) => res,
                Err(_) => return ToolResult::error(format!(
                    "Command timed out after {}ms",
                    limit.as_millis()
                )),
            },
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => return ToolResult::error(format!("Command failed: {}", e)),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        let text = text.trim_end().to_string();

        let exit_code = output.status.code();
        let metadata = json!({ "exit_code": exit_code });

        if output.status.success() {
            ToolResult::success_with_metadata(text, metadata)
        } else {
            let mut result = ToolResult::error_with_output(
                match exit_code {
                    Some(code) => format!("Command exited with code {}", code),
                    None => "Command terminated by signal".to_string(),
                },
                text,
            );
            result.metadata = Some(metadata);
            result
        }
    }
}

fn command_timeout(requested: Option<u64>) -> Duration {
    Duration::from_millis(requested.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS))
}
