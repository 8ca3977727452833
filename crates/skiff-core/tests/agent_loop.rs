//! End-to-end tests of the turn loop against a scripted model

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skiff_core::agent::{
    Agent, AgentServices, HookEventName, HookHandler, HookPayload, HookResult, ToolMatcher,
    TurnEvent,
};
use skiff_core::ai::{
    AssembledResponse, Content, Message, MessageContent, Role, ScriptedModelClient, ScriptedTurn,
    StopReason, Usage,
};
use skiff_core::commands::MarkdownCommandLoader;
use skiff_core::config::Settings;
use skiff_core::error::ErrorKind;

fn tool_use(id: &str, name: &str, input: Value) -> Content {
    Content::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}

fn respond(content: Vec<Content>, stop_reason: StopReason) -> AssembledResponse {
    AssembledResponse {
        content,
        stop_reason,
        usage: Some(Usage {
            input_tokens: 20,
            output_tokens: 8,
        }),
    }
}

fn settings(streaming: bool) -> Settings {
    let mut settings = Settings::default();
    settings.model.streaming = streaming;
    settings
}

fn build_agent(model: Arc<ScriptedModelClient>, dir: &Path, settings: Settings) -> Agent {
    let services = AgentServices::new(model, dir).with_commands(Arc::new(
        MarkdownCommandLoader::with_dirs(vec![dir.join(".skiff/commands")]),
    ));
    Agent::new(services, settings, dir.to_path_buf()).unwrap()
}

async fn run(agent: &mut Agent, prompt: &str) -> Vec<TurnEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    agent.run(prompt, &tx, &CancellationToken::new()).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

async fn history(agent: &Agent) -> Vec<Message> {
    agent
        .session()
        .expect("session created by run")
        .messages_for_llm()
        .await
        .unwrap()
}

struct Recorder {
    seen: Arc<Mutex<Vec<(HookEventName, String)>>>,
    veto: bool,
}

#[async_trait]
impl HookHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn handle(&self, payload: &HookPayload) -> anyhow::Result<HookResult> {
        self.seen.lock().push((
            payload.hook_event_name,
            payload.tool_name.clone().unwrap_or_default(),
        ));
        Ok(if self.veto {
            HookResult::Block {
                reason: "Write is frozen".to_string(),
            }
        } else {
            HookResult::Continue
        })
    }
}

#[tokio::test]
async fn every_run_ends_with_exactly_one_terminal_event() {
    let fixtures: Vec<Vec<ScriptedTurn>> = vec![
        vec![ScriptedTurn::Response(respond(
            vec![Content::text("hello")],
            StopReason::EndTurn,
        ))],
        vec![ScriptedTurn::Fail {
            error: "connection reset".to_string(),
        }],
        vec![ScriptedTurn::Response(respond(Vec::new(), StopReason::EndTurn))],
        vec![
            ScriptedTurn::Response(respond(
                vec![tool_use("g1", "Glob", json!({"pattern": "*.rs"}))],
                StopReason::ToolUse,
            )),
            ScriptedTurn::Response(respond(vec![Content::text("none")], StopReason::EndTurn)),
        ],
    ];

    for streaming in [false, true] {
        for turns in &fixtures {
            let dir = tempfile::tempdir().unwrap();
            let model = Arc::new(ScriptedModelClient::new(turns.clone()));
            let mut agent = build_agent(model, dir.path(), settings(streaming));

            let events = run(&mut agent, "go").await;
            let terminals = events.iter().filter(|e| e.is_terminal()).count();
            assert_eq!(terminals, 1, "events: {:?}", events);
            assert!(events.last().is_some_and(TurnEvent::is_terminal));
        }
    }
}

#[tokio::test]
async fn pre_tool_use_veto_blocks_only_the_matching_tool() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "one\ntwo\n").unwrap();

    let model = Arc::new(ScriptedModelClient::from_responses(vec![
        respond(
            vec![
                tool_use("w1", "Write", json!({"file_path": "out.txt", "content": "x"})),
                tool_use("r1", "Read", json!({"file_path": "notes.txt"})),
            ],
            StopReason::ToolUse,
        ),
        respond(vec![Content::text("ok")], StopReason::EndTurn),
    ]));
    let mut settings = settings(false);
    settings.permissions.allow = vec!["Write".to_string()];
    let mut agent = build_agent(model, dir.path(), settings);

    let seen = Arc::new(Mutex::new(Vec::new()));
    agent.hooks_mut().register(
        HookEventName::PreToolUse,
        ToolMatcher::parse(Some("Write")).unwrap(),
        Arc::new(Recorder {
            seen: seen.clone(),
            veto: true,
        }),
    );
    for event in [HookEventName::PostToolUse, HookEventName::PostToolUseFailure] {
        agent.hooks_mut().register(
            event,
            ToolMatcher::Wildcard,
            Arc::new(Recorder {
                seen: seen.clone(),
                veto: false,
            }),
        );
    }

    let events = run(&mut agent, "write and read").await;
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    assert!(!dir.path().join("out.txt").exists());

    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResult {
                name,
                success,
                error,
                ..
            } => Some((name.clone(), *success, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "Write");
    assert!(!results[0].1);
    assert!(results[0].2.as_deref().unwrap().contains("Write is frozen"));
    assert_eq!(results[1].0, "Read");
    assert!(results[1].1);

    assert_eq!(
        seen.lock().clone(),
        vec![
            (HookEventName::PreToolUse, "Write".to_string()),
            (HookEventName::PostToolUse, "Read".to_string()),
        ]
    );

    let messages = history(&agent).await;
    let MessageContent::Blocks(blocks) = &messages[2].content else {
        panic!("tool results should be blocks");
    };
    assert!(matches!(
        &blocks[0],
        Content::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "w1"
    ));
    assert!(matches!(
        &blocks[1],
        Content::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "r1"
    ));
}

#[tokio::test]
async fn turn_budget_stops_before_second_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    let model = Arc::new(ScriptedModelClient::from_responses(vec![
        respond(
            vec![tool_use("r1", "Read", json!({"file_path": "a.txt"}))],
            StopReason::ToolUse,
        ),
        respond(vec![Content::text("unused")], StopReason::EndTurn),
    ]));
    let mut settings = settings(false);
    settings.max_turns = 1;
    let mut agent = build_agent(model.clone(), dir.path(), settings);

    let events = run(&mut agent, "read it").await;

    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::ToolResult { success: true, .. })));
    assert_eq!(
        events.last(),
        Some(&TurnEvent::Error {
            message: "Max turns exceeded (1)".to_string(),
            kind: ErrorKind::BudgetExhausted,
        })
    );
    assert_eq!(model.requests().len(), 1);
    assert_eq!(model.remaining(), 1);

    // Tool results were still recorded, so a fresh run continues cleanly.
    let messages = history(&agent).await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].tool_result_ids(), vec!["r1"]);
}

#[tokio::test]
async fn unknown_command_passes_through_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModelClient::from_responses(vec![respond(
        vec![Content::text("?")],
        StopReason::EndTurn,
    )]));
    let mut agent = build_agent(model.clone(), dir.path(), settings(false));

    let events = run(&mut agent, "/nope").await;

    assert!(!events.iter().any(|e| matches!(
        e,
        TurnEvent::Text { text } if text.starts_with("[Command:")
    )));
    assert_eq!(model.requests()[0].messages, vec![Message::user_text("/nope")]);
}

#[tokio::test]
async fn allow_listed_read_event_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.rs"), "fn main() {}\n").unwrap();
    let model = Arc::new(ScriptedModelClient::from_responses(vec![
        respond(
            vec![tool_use("r1", "Read", json!({"file_path": "lib.rs"}))],
            StopReason::ToolUse,
        ),
        respond(vec![Content::text("It is empty.")], StopReason::EndTurn),
    ]));
    let mut settings = settings(false);
    settings.permissions.allow = vec!["Read(*.rs)".to_string()];
    let mut agent = build_agent(model, dir.path(), settings);

    let events = run(&mut agent, "what is in lib.rs").await;

    assert_eq!(events.len(), 4, "events: {:?}", events);
    assert!(matches!(&events[0], TurnEvent::ToolStart { name, .. } if name == "Read"));
    assert!(matches!(
        &events[1],
        TurnEvent::ToolResult { name, success: true, output, .. }
            if name == "Read" && output.contains("fn main()")
    ));
    assert_eq!(
        events[2],
        TurnEvent::Text {
            text: "It is empty.".to_string()
        }
    );
    assert_eq!(
        events[3],
        TurnEvent::Done {
            text: "It is empty.".to_string(),
            usage: Usage {
                input_tokens: 40,
                output_tokens: 16,
            },
            turns: 2,
        }
    );
}

#[tokio::test]
async fn cancelling_a_pending_confirmation_denies_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModelClient::from_responses(vec![respond(
        vec![tool_use(
            "w1",
            "Write",
            json!({"file_path": "out.txt", "content": "x"}),
        )],
        StopReason::ToolUse,
    )]));
    let agent = build_agent(model.clone(), dir.path(), settings(true));
    let broker = agent.broker();

    let cancel = CancellationToken::new();
    let (mut rx, handle) = agent.spawn_run("write a file".to_string(), cancel.clone());

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if matches!(event, TurnEvent::PermissionRequest { .. }) {
            assert_eq!(broker.pending_ids().len(), 1);
            cancel.cancel();
        }
        events.push(event);
    }
    let agent = handle.await.unwrap();

    let result_pos = events
        .iter()
        .position(|e| matches!(e, TurnEvent::ToolResult { success: false, .. }))
        .expect("failed tool_result for the cancelled call");
    assert_eq!(result_pos, events.len() - 2);
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Error {
            kind: ErrorKind::Cancelled,
            ..
        })
    ));
    assert!(broker.pending_ids().is_empty());
    assert!(!dir.path().join("out.txt").exists());

    // The unpaired tool_use turn was retracted; only the prompt remains.
    let messages = history(&agent).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn batch_and_streaming_runs_record_the_same_history() {
    let turns = || {
        vec![
            respond(
                vec![
                    Content::text("Looking around."),
                    tool_use("g1", "Glob", json!({"pattern": "*.md"})),
                ],
                StopReason::ToolUse,
            ),
            respond(vec![Content::text("Nothing there.")], StopReason::EndTurn),
        ]
    };

    let mut histories = Vec::new();
    let mut finals = Vec::new();
    for streaming in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModelClient::from_responses(turns()));
        let mut agent = build_agent(model, dir.path(), settings(streaming));
        let events = run(&mut agent, "find docs").await;
        finals.push(events.last().cloned());
        histories.push(history(&agent).await);
    }

    assert_eq!(histories[0], histories[1]);
    assert_eq!(finals[0], finals[1]);
    assert!(matches!(&finals[0], Some(TurnEvent::Done { turns: 2, .. })));
}
