use std::sync::Arc;

use async_trait::async_trait;
use fixflow_core::domain::conversation::Role;
use thiserror::Error;

use crate::classifier::TurnContext;
use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError};
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] LlmError),
    #[error("model returned an empty reply")]
    EmptyCompletion,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Produces the candidate reply for `input`. `context.history` holds the session's
    /// stored turns in order.
    async fn respond(&self, context: &TurnContext, input: &str) -> Result<String, HandlerError>;
}

pub struct LlmHandler {
    name: String,
    instructions: String,
    client: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    max_tool_rounds: usize,
}

impl LlmHandler {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            client,
            tools: ToolRegistry::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    fn opening_messages(&self, context: &TurnContext, input: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.history.len() + 2);
        messages.push(ChatMessage::system(self.instructions.clone()));
        for turn in &context.history {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content.clone()),
                Role::Assistant => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(input));
        messages
    }
}

#[async_trait]
impl Handler for LlmHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, context: &TurnContext, input: &str) -> Result<String, HandlerError> {
        let mut messages = self.opening_messages(context, input);

        if !self.tools.is_empty() {
            let declarations = self.tools.declarations();
            for round in 0..self.max_tool_rounds {
                let response = self
                    .client
                    .chat(ChatRequest::new(messages.clone()).with_tools(declarations.clone()))
                    .await?;

                if response.tool_calls.is_empty() {
                    return response
                        .non_empty_content()
                        .map(str::to_string)
                        .ok_or(HandlerError::EmptyCompletion);
                }

                tracing::debug!(
                    event_name = "agent.handler.tool_round",
                    handler = %self.name,
                    round,
                    tool_calls = response.tool_calls.len(),
                    "model requested tool calls"
                );

                messages.push(ChatMessage::assistant_tool_calls(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));
                for call in &response.tool_calls {
                    let result = self.tools.invoke(&call.name, &call.arguments).await;
                    messages.push(ChatMessage::tool_result(call.id.clone(), result.to_string()));
                }
            }
        }

        let response = self.client.chat(ChatRequest::new(messages)).await?;
        response.non_empty_content().map(str::to_string).ok_or(HandlerError::EmptyCompletion)
    }
}
