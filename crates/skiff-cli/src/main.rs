//! Skiff - non-interactive runner for the agent loop
//!
//! Drives one prompt against a recorded model fixture and prints the event
//! stream. Permission prompts are answered on stdin (or auto-approved with
//! `--yes`); Ctrl-C cancels the run.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skiff_core::agent::{
    Agent, AgentServices, ConfirmationAction, ConfirmationRequest, ConfirmationResponse,
    TurnEvent,
};
use skiff_core::ai::ScriptedModelClient;
use skiff_core::commands::{CommandRegistryFactory, MarkdownCommandLoader};
use skiff_core::config::Settings;
use skiff_core::paths;

/// Skiff - coding agent runner
#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Run the Skiff agent loop against a recorded model", long_about = None)]
struct Cli {
    /// Working directory (defaults to the current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Log to stderr instead of ~/.skiff/logs/skiff.log
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one prompt to completion
    Run {
        /// Fixture file with the scripted model turns
        #[arg(long)]
        fixture: PathBuf,

        /// Use the streaming calling convention
        #[arg(long, conflicts_with = "batch")]
        stream: bool,

        /// Use the batch calling convention
        #[arg(long)]
        batch: bool,

        /// Approve every permission request
        #[arg(short, long)]
        yes: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Override the turn budget
        #[arg(long)]
        max_turns: Option<usize>,

        prompt: String,
    },

    /// List available slash commands
    #[command(name = "commands")]
    ListCommands,
}

fn init_logging(log_stderr: bool) -> Result<()> {
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let log_dir = paths::ensure_logs_dir().context("Failed to create log directory")?;
    let log_file = std::fs::File::create(log_dir.join("skiff.log"))
        .with_context(|| format!("Failed to create log file in {}", log_dir.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_stderr) {
        eprintln!("{:#}, falling back to stderr logging", e);
        init_logging(true)?;
    }

    let cwd = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    match cli.command {
        Commands::Run {
            fixture,
            stream,
            batch,
            yes,
            json,
            max_turns,
            prompt,
        } => {
            let (mut settings, source) = Settings::load(&cwd)?;
            if let Some(path) = source {
                tracing::info!(path = %path.display(), "Using settings file");
            }
            if stream {
                settings.model.streaming = true;
            } else if batch {
                settings.model.streaming = false;
            }
            if let Some(max_turns) = max_turns {
                settings.max_turns = max_turns;
            }

            let options = RunOptions { yes, json };
            run(&cwd, &fixture, settings, &prompt, options).await
        }
        Commands::ListCommands => {
            let registry = MarkdownCommandLoader::new(&cwd).build().await?;
            for name in registry.names() {
                let description = registry
                    .get(&name)
                    .and_then(|c| c.description.clone())
                    .unwrap_or_default();
                println!("/{:<24} {}", name, description);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

struct RunOptions {
    yes: bool,
    json: bool,
}

async fn run(
    cwd: &Path,
    fixture: &Path,
    settings: Settings,
    prompt: &str,
    options: RunOptions,
) -> Result<ExitCode> {
    let model = Arc::new(ScriptedModelClient::from_file(fixture)?);
    tracing::info!(fixture = %fixture.display(), model = model.model(), "Starting run");

    let services = AgentServices::new(model, cwd);
    let agent = Agent::new(services, settings, cwd.to_path_buf())?;
    let broker = agent.broker();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    let (mut events, handle) = agent.spawn_run(prompt.to_string(), cancel);
    let mut answers = if options.yes {
        None
    } else {
        Some(spawn_stdin_reader())
    };
    let mut pending: Option<ConfirmationRequest> = None;

    let mut failed = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if options.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    print_event(&event);
                }

                match event {
                    TurnEvent::PermissionRequest { request } if options.yes => {
                        broker.respond(ConfirmationResponse {
                            id: request.id,
                            action: ConfirmationAction::AllowOnce,
                        });
                    }
                    TurnEvent::PermissionRequest { request } => {
                        if !options.json {
                            prompt_permission(&request);
                        }
                        pending = Some(request);
                    }
                    TurnEvent::Error { .. } => failed = true,
                    _ => {}
                }
            }
            line = next_answer(&mut answers), if pending.is_some() => {
                if let Some(request) = pending.take() {
                    let response = ConfirmationResponse {
                        id: request.id,
                        action: parse_answer(line.as_deref()),
                    };
                    let id = response.id.clone();
                    if !broker.respond(response) {
                        tracing::debug!(request_id = %id, "Permission answer arrived after request closed");
                    }
                }
            }
        }
    }

    handle.await.context("Agent task failed")?;
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Lines typed on stdin, read on a detached thread so an unanswered prompt
/// never holds up shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("skiff-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read permission answer: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start stdin reader: {}", e);
    }
    rx
}

/// Next answer line; `None` once stdin is closed
async fn next_answer(answers: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match answers {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

fn parse_answer(line: Option<&str>) -> ConfirmationAction {
    match line.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("y") | Some("yes") => ConfirmationAction::AllowOnce,
        Some("a") | Some("always") => ConfirmationAction::AllowAlways,
        _ => ConfirmationAction::Deny,
    }
}

fn prompt_permission(request: &ConfirmationRequest) {
    eprint!(
        "Allow {}? [y]es / [a]lways{} / [n]o: ",
        request.tool,
        request
            .suggestions
            .first()
            .map(|s| format!(" ({})", s))
            .unwrap_or_default()
    );
    let _ = std::io::stderr().flush();
}

fn print_event(event: &TurnEvent) {
    let mut stdout = std::io::stdout();
    match event {
        TurnEvent::Text { text } => {
            print!("{}", text);
            let _ = stdout.flush();
        }
        TurnEvent::ToolStart { name, input, .. } => {
            println!("\n> {} {}", name, input);
        }
        TurnEvent::ToolResult {
            name,
            success,
            output,
            error,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            let detail = error
                .as_deref()
                .or_else(|| output.lines().next())
                .unwrap_or("");
            println!("< {} [{}] {}", name, status, detail);
        }
        TurnEvent::Error { message, kind } => {
            let kind = serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            eprintln!("\nerror ({}): {}", kind, message);
        }
        TurnEvent::Done { usage, turns, .. } => {
            println!(
                "\n\n[done: {} turns, {} in / {} out tokens]",
                turns, usage.input_tokens, usage.output_tokens
            );
        }
        TurnEvent::ReasoningDelta { .. }
        | TurnEvent::ToolInputDelta { .. }
        | TurnEvent::PermissionRequest { .. }
        | TurnEvent::WaitingForPermission { .. } => {}
    }
}
