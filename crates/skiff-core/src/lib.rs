//! Skiff core
//!
//! The orchestration core of a coding agent: the turn loop, the tool
//! execution pipeline with its hooks and permission gate, and the
//! collaborators around them (model client contract, built-in tools,
//! commands, project context, sessions, settings).

pub mod agent;
pub mod ai;
pub mod commands;
pub mod config;
pub mod error;
pub mod paths;
pub mod session;
pub mod tools;

pub use agent::{Agent, AgentServices, TurnEvent};
pub use config::Settings;
pub use error::{AgentError, AgentResult, ErrorKind};
