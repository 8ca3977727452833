//! Tools the model can call

pub mod implementations;
pub mod registry;

pub use registry::{
    parse_params, BuiltinTools, QuestionAsker, Tool, ToolCategory, ToolContext, ToolRegistry,
    ToolRegistryFactory, ToolResult, DEFAULT_TOOL_TIMEOUT,
};
