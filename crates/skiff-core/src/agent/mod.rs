//! Agent system for Skiff
//!
//! ## Turn loop
//! - `Agent` - Drives one prompt through request / assemble / execute turns
//! - `TurnEvent` - Event protocol between the loop and its consumer
//! - `AgentServices` - Collaborators the loop depends on
//!
//! ## Per-turn machinery
//! - `stream` - Batch and streamed responses folded into one shape
//! - `ToolPipeline` - Hooks, permission and execution for each tool call
//! - `LazyShared` - Singleflight construction of the shared registries
//!
//! ## Hooks
//! - `HookDispatcher` - Matcher table and sequential trigger
//! - `ShellHook` - Configured external commands
//! - `SafetyHook` - Blocks dangerous bash commands
//! - `LoggingHook` - Logs all tool executions
//!
//! ## Permissions
//! - `PermissionGate` - Allow / deny / ask decisions
//! - `ConfirmationBroker` - Correlates prompt answers back to waiting calls

pub mod context;
pub mod events;
pub mod executor;
pub mod hook_handlers;
pub mod hooks;
pub mod lazy;
pub mod orchestrator;
pub mod permissions;
pub mod stream;

pub use context::{ContextLoader, ContextStrategy, LongTermContext, ProjectContextLoader};
pub use events::TurnEvent;
pub use executor::{BatchOutcome, ToolPipeline};
pub use hook_handlers::{LoggingHook, SafetyHook, ShellHook};
pub use hooks::{
    HookDispatcher, HookEventName, HookHandler, HookOutcome, HookPayload, HookResult, ToolMatcher,
};
pub use lazy::LazyShared;
pub use orchestrator::{Agent, AgentServices};
pub use permissions::{
    ConfirmationAction, ConfirmationBroker, ConfirmationRequest, ConfirmationResponse,
    PermissionDecision, PermissionGate, PermissionMode,
};
