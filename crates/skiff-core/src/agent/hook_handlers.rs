//! Built-in hook handlers
//!
//! ## Exit code protocol for `ShellHook`
//! - 0: continue
//! - 2: veto, stderr becomes the reason shown to the model
//! - anything else: handler failure, logged and skipped

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::hooks::{HookHandler, HookPayload, HookResult};

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);
const VETO_EXIT_CODE: i32 = 2;

/// Runs a shell command with the payload as JSON on stdin
pub struct ShellHook {
    command: String,
    timeout: Duration,
}

impl ShellHook {
    pub fn new(command: &str, timeout: Option<Duration>) -> Self {
        Self {
            command: command.to_string(),
            timeout: timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT),
        }
    }
}

#[async_trait]
impl HookHandler for ShellHook {
    fn name(&self) -> &str {
        &self.command
    }

    async fn handle(&self, payload: &HookPayload) -> Result<HookResult> {
        let input = serde_json::to_string(payload).context("Failed to serialize hook payload")?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if payload.cwd.is_dir() {
            command.current_dir(&payload.cwd);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn hook '{}'", self.command))?;

        let stdin = child.stdin.take();
        let command_name = &self.command;
        // The stdin write counts against the timeout
        let run = async move {
            if let Some(mut stdin) = stdin {
                // A hook that ignores stdin may exit before reading it
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(command = %command_name, "Hook stdin closed early: {}", e);
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| anyhow!("Hook timed out after {:?}", self.timeout))?
            .context("Hook execution failed")?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        tracing::debug!(
            command = %self.command,
            exit_code,
            stderr_len = stderr.len(),
            "Hook execution complete"
        );

        match exit_code {
            0 => Ok(HookResult::Continue),
            VETO_EXIT_CODE => Ok(HookResult::Block {
                reason: if stderr.is_empty() {
                    "Hook blocked execution".to_string()
                } else {
                    stderr
                },
            }),
            code if stderr.is_empty() => bail!("Hook exited with code {}", code),
            code => bail!("Hook exited with code {}: {}", code, stderr),
        }
    }
}

static FORK_BOMB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").unwrap());
static PIPE_TO_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash|zsh)\b").unwrap());
static RAW_DISK_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)>\s*/dev/(sd|nvme|vd|xvd|disk)").unwrap());

const SEPARATORS: &[&str] = &[";", "|", "||", "&", "&&"];

/// Vetoes dangerous `Bash` commands before they reach the shell
#[derive(Default)]
pub struct SafetyHook;

impl SafetyHook {
    pub fn new() -> Self {
        Self
    }

    /// Reason the command is refused, if it is
    pub fn check_command(command: &str) -> Option<&'static str> {
        if FORK_BOMB.is_match(command) {
            return Some("fork bomb");
        }
        if PIPE_TO_SHELL.is_match(command) {
            return Some("network script piped to shell");
        }
        if RAW_DISK_REDIRECT.is_match(command) {
            return Some("raw disk redirection");
        }

        simple_commands(command)
            .iter()
            .find_map(|words| dangerous_simple_command(words))
    }
}

/// Split a command line into simple commands (word lists), cutting at
/// unquoted separators.
pub(crate) fn simple_commands(command: &str) -> Vec<Vec<String>> {
    let words = shell_words::split(command)
        .unwrap_or_else(|_| command.split_whitespace().map(str::to_string).collect());

    let mut commands = Vec::new();
    let mut current = Vec::new();
    for word in words {
        if SEPARATORS.contains(&word.as_str()) {
            commands.push(std::mem::take(&mut current));
            continue;
        }
        match word.strip_suffix(';') {
            Some(head) => {
                if !head.is_empty() {
                    current.push(head.to_string());
                }
                commands.push(std::mem::take(&mut current));
            }
            None => current.push(word),
        }
    }
    commands.push(current);
    commands.retain(|c| !c.is_empty());
    commands
}

fn dangerous_simple_command(words: &[String]) -> Option<&'static str> {
    // Skip `FOO=bar` prefixes
    let words: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .skip_while(|w| {
            w.split_once('=').is_some_and(|(key, _)| {
                !key.is_empty() && key.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
            })
        })
        .collect();
    let program = words.first()?.to_ascii_lowercase();
    let args = &words[1..];

    match program.as_str() {
        "sudo" | "doas" | "su" => Some("privilege escalation"),
        "rm" if is_destructive_rm(args) => Some("destructive rm target"),
        "chmod" if args.iter().any(|a| matches!(*a, "777" | "0777")) => Some("unsafe chmod 777"),
        "dd" if args
            .iter()
            .any(|a| a.starts_with("of=/dev/") || a.starts_with("if=/dev/")) =>
        {
            Some("direct disk access with dd")
        }
        p if p.starts_with("mkfs") => Some("filesystem formatting command"),
        _ => None,
    }
}

fn is_destructive_rm(args: &[&str]) -> bool {
    let has_flag = |short: &[char], long: &str| {
        args.iter().any(|a| match a.strip_prefix("--") {
            Some(name) => name == long,
            None => a.starts_with('-') && a.chars().any(|c| short.contains(&c)),
        })
    };
    if !(has_flag(&['r', 'R'], "recursive") && has_flag(&['f'], "force")) {
        return false;
    }

    args.iter().filter(|a| !a.starts_with('-')).any(|target| {
        matches!(
            *target,
            "/" | "/*" | "~" | "~/" | "$HOME" | "$HOME/" | "${HOME}" | "${HOME}/" | "." | ".."
        ) || ["/etc", "/usr", "/var", "/bin", "/boot"]
            .iter()
            .any(|root| target.starts_with(root))
    })
}

#[async_trait]
impl HookHandler for SafetyHook {
    fn name(&self) -> &str {
        "safety"
    }

    async fn handle(&self, payload: &HookPayload) -> Result<HookResult> {
        if payload.tool_name.as_deref() != Some("Bash") {
            return Ok(HookResult::Continue);
        }

        let command = payload
            .tool_input
            .as_ref()
            .and_then(|input| input.get("command"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match Self::check_command(command) {
            Some(reason) => {
                tracing::warn!(
                    tool = "Bash",
                    command = command,
                    blocked_pattern = reason,
                    "Safety hook blocked dangerous command"
                );
                Ok(HookResult::Block {
                    reason: format!("Blocked dangerous command: {}", reason),
                })
            }
            None => Ok(HookResult::Continue),
        }
    }
}

/// Logs every completed tool call
#[derive(Default)]
pub struct LoggingHook;

impl LoggingHook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HookHandler for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, payload: &HookPayload) -> Result<HookResult> {
        let result = payload.tool_result.as_ref();
        let field = |key: &str| result.and_then(|r| r.get(key));

        tracing::info!(
            tool = payload.tool_name.as_deref().unwrap_or(""),
            event = %payload.hook_event_name,
            duration_ms = field("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0),
            is_error = !field("success").and_then(|v| v.as_bool()).unwrap_or(false),
            output_len = field("output").and_then(|v| v.as_str()).map_or(0, str::len),
            "Tool execution completed"
        );
        Ok(HookResult::Continue)
    }
}
