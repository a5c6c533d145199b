use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::ToolDeclaration;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the call arguments.
    fn input_schema(&self) -> Value;
    async fn call(&self, input: Value) -> Result<Value, ToolError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            })
            .collect();
        declarations.sort_by(|left, right| left.name.cmp(&right.name));
        declarations
    }

    /// Runs a model-requested call. Failures come back as an `{"error": ...}` result for
    /// the model to read; they never abort the turn.
    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> Value {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(event_name = "agent.tool.unknown", tool = name, "model requested unknown tool");
            return json!({ "error": format!("unknown tool `{name}`") });
        };

        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(raw_arguments) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.tool.bad_arguments",
                        tool = name,
                        error = %error,
                        "tool arguments were not valid json"
                    );
                    return json!({ "error": format!("invalid arguments for `{name}`: {error}") });
                }
            }
        };

        match tool.call(arguments).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.tool.failed",
                    tool = name,
                    error = %error,
                    "tool call failed"
                );
                json!({ "error": error.to_string() })
            }
        }
    }
}
