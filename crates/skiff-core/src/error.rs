//! Error taxonomy for agent runs
//!
//! Collaborators (tools, sessions, loaders, hooks) speak `anyhow`. The loop
//! converts whatever reaches it into an `AgentError`, and every `AgentError`
//! becomes exactly one terminal `error` event.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification carried on the `error` event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Transport,
    Validation,
    Persistence,
    Initialization,
    BudgetExhausted,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Model request failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Malformed input for tool call {name} ({id}): {source}")]
    MalformedToolInput {
        id: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream ended without a completion marker")]
    IncompleteStream,

    #[error("Stream timeout - no response for {} seconds", .0.as_secs())]
    StreamTimeout(Duration),

    #[error("Model reported an error: {0}")]
    Model(String),

    #[error("Session error: {0:#}")]
    Session(anyhow::Error),

    #[error("Failed to initialize {name}: {message}")]
    Init { name: String, message: String },

    #[error("Max turns exceeded ({0})")]
    MaxTurnsExceeded(usize),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Transport(_)
            | AgentError::StreamTimeout(_)
            | AgentError::IncompleteStream
            | AgentError::Model(_) => ErrorKind::Transport,
            AgentError::EmptyResponse | AgentError::MalformedToolInput { .. } => {
                ErrorKind::Validation
            }
            AgentError::Session(_) => ErrorKind::Persistence,
            AgentError::Init { .. } => ErrorKind::Initialization,
            AgentError::MaxTurnsExceeded(_) => ErrorKind::BudgetExhausted,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhaustion_is_its_own_kind() {
        let err = AgentError::MaxTurnsExceeded(1);
        assert_eq!(err.kind(), ErrorKind::BudgetExhausted);
        assert_eq!(err.to_string(), "Max turns exceeded (1)");
    }

    #[test]
    fn malformed_tool_input_is_validation() {
        let source = serde_json::from_str::<serde_json::Value>("{\"a\":").unwrap_err();
        let err = AgentError::MalformedToolInput {
            id: "call_1".to_string(),
            name: "Write".to_string(),
            source,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("Write"));
    }
}
