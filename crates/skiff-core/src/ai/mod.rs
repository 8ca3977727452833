//! Model-facing types and the client contract

pub mod client;
pub mod scripted;
pub mod types;

pub use client::{ModelClient, ModelRequest, StreamChunk};
pub use scripted::{ScriptedModelClient, ScriptedTurn};
pub use types::{
    AssembledResponse, Content, Message, MessageContent, ModelInfo, Role, StopReason, ToolCall,
    ToolDefinition, Usage,
};
