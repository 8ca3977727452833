//! Built-in tool implementations
//!
//! - Read: Read files
//! - Write: Create/overwrite files
//! - Edit: Exact string replacement
//! - Bash: Execute shell commands
//! - Glob: Find files by pattern
//! - AskUserQuestion: Interactive user prompts

pub mod ask_user;
pub mod bash;
pub mod edit;
pub mod glob;
pub mod read;
pub mod write;

use std::sync::Arc;

pub use ask_user::AskUserQuestionTool;
pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use read::ReadTool;
pub use write::WriteTool;

use super::registry::ToolRegistry;

pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ReadTool));
    registry.register(Arc::new(WriteTool));
    registry.register(Arc::new(EditTool));
    registry.register(Arc::new(BashTool));
    registry.register(Arc::new(GlobTool));
    registry.register(Arc::new(AskUserQuestionTool));
}
