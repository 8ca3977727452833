//! AskUserQuestion tool - Interactive user prompts
//!
//! Routed through the context's `QuestionAsker`. Non-interactive runs have no
//! asker and get a clean failure the model can react to.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolResult};

pub struct AskUserQuestionTool;

#[async_trait]
impl Tool for AskUserQuestionTool {
    fn name(&self) -> &str {
        "AskUserQuestion"
    }

    fn description(&self) -> &str {
        r#"Ask the user a question to clarify requirements or get their preference.

Use this tool when requirements are ambiguous or several valid approaches
exist and the user's preference matters. Provide 2-4 distinct options with a
short description of each trade-off."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "description": "Questions to ask (usually just one)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "header": { "type": "string", "description": "Short label" },
                            "question": { "type": "string", "description": "Full question text" },
                            "options": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "label": { "type": "string" },
                                        "description": { "type": "string" }
                                    },
                                    "required": ["label"]
                                }
                            }
                        },
                        "required": ["question"]
                    }
                }
            },
            "required": ["questions"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Interactive
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(questions) = params.get("questions").filter(|q| q.is_array()) else {
            return ToolResult::invalid_parameters("`questions` must be an array");
        };
        let Some(asker) = &ctx.asker else {
            return ToolResult::error("No interactive user is available to answer questions");
        };

        match asker.ask(questions).await {
            Ok(answer) => ToolResult::success(answer),
            Err(e) => ToolResult::error(format!("Failed to get an answer: {:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::QuestionAsker;
    use std::sync::Arc;

    struct AlwaysFirst;

    #[async_trait]
    impl QuestionAsker for AlwaysFirst {
        async fn ask(&self, questions: &Value) -> anyhow::Result<String> {
            Ok(questions[0]["options"][0]["label"]
                .as_str()
                .unwrap_or("")
                .to_string())
        }
    }

    fn questions() -> Value {
        json!({"questions": [{"question": "Which db?", "options": [{"label": "sqlite"}, {"label": "postgres"}]}]})
    }

    #[tokio::test]
    async fn routes_through_asker() {
        let ctx = ToolContext {
            asker: Some(Arc::new(AlwaysFirst)),
            ..Default::default()
        };
        let result = AskUserQuestionTool.execute(questions(), &ctx).await;
        assert!(result.success);
        assert_eq!(result.output, "sqlite");
    }

    #[tokio::test]
    async fn fails_without_asker() {
        let result = AskUserQuestionTool
            .execute(questions(), &ToolContext::default())
            .await;
        assert!(!result.success);
    }
}
