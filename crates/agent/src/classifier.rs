use std::sync::Arc;

use async_trait::async_trait;
use fixflow_core::config::GuardrailConfig;
use fixflow_core::domain::conversation::Turn;
use fixflow_core::domain::routing::DomainKey;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::extract::parse_object_lenient;
use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError};

/// Conversation state handed to classifiers and handlers for one turn.
#[derive(Clone, Debug)]
pub struct TurnContext {
    pub domain_key: DomainKey,
    pub label: String,
    pub history: Vec<Turn>,
}

/// Result of one classifier run. Only `tripped` drives control flow.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub tripped: bool,
    pub reason: Option<String>,
    pub payload: Value,
}

impl Verdict {
    pub fn pass() -> Self {
        Self { tripped: false, reason: None, payload: Value::Null }
    }

    pub fn trip(reason: impl Into<String>) -> Self {
        Self { tripped: true, reason: Some(reason.into()), payload: Value::Null }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error(transparent)]
    Transport(#[from] LlmError),
    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Short phrase describing what a trip means, used in fallback replies.
    fn violation(&self) -> &str;

    async fn classify(&self, context: &TurnContext, input: &str)
        -> Result<Verdict, ClassifierError>;
}

/// Model-backed classifier that reads one boolean flag out of a JSON verdict.
pub struct LlmClassifier {
    name: String,
    instructions: String,
    client: Arc<dyn LlmClient>,
    flag: String,
    trips_on: bool,
    violation: String,
}

impl LlmClassifier {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            client,
            flag: "unsafe".to_string(),
            trips_on: true,
            violation: "outside the scope of this service".to_string(),
        }
    }

    /// Trip when `flag` in the verdict equals `value`.
    pub fn trips_when(mut self, flag: impl Into<String>, value: bool) -> Self {
        self.flag = flag.into();
        self.trips_on = value;
        self
    }

    pub fn with_violation(mut self, violation: impl Into<String>) -> Self {
        self.violation = violation.into();
        self
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\nRespond with a single JSON object containing a boolean field `{}` and a short `reason` string. Do not add any other text.",
            self.instructions.trim(),
            self.flag
        )
    }

    fn verdict_from(&self, object: Map<String, Value>) -> Result<Verdict, ClassifierError> {
        let flag = object.get(&self.flag).and_then(Value::as_bool).ok_or_else(|| {
            ClassifierError::MalformedVerdict(format!(
                "verdict is missing boolean field `{}`",
                self.flag
            ))
        })?;

        let reason = object.get("reason").and_then(Value::as_str).map(str::to_string);
        Ok(Verdict { tripped: flag == self.trips_on, reason, payload: Value::Object(object) })
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn violation(&self) -> &str {
        &self.violation
    }

    async fn classify(
        &self,
        context: &TurnContext,
        input: &str,
    ) -> Result<Verdict, ClassifierError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(render_for_judgment(context, input)),
        ])
        .json_object();

        let response = self.client.chat(request).await?;
        let text = response
            .non_empty_content()
            .ok_or_else(|| ClassifierError::MalformedVerdict("empty verdict".to_string()))?;
        let object = parse_object_lenient(text).ok_or_else(|| {
            ClassifierError::MalformedVerdict("verdict was not a JSON object".to_string())
        })?;

        self.verdict_from(object)
    }
}

fn render_for_judgment(context: &TurnContext, input: &str) -> String {
    let mut rendered = format!("Service: {}\n", context.label);
    if !context.history.is_empty() {
        rendered.push_str("\nConversation so far:\n");
        for turn in &context.history {
            rendered.push_str(turn.role.as_str());
            rendered.push_str(": ");
            rendered.push_str(&turn.content);
            rendered.push('\n');
        }
    }
    rendered.push_str("\nContent to evaluate:\n");
    rendered.push_str(input);
    rendered
}

/// Model-free output classifier that trips on replies over a token budget.
pub struct OutputLengthClassifier {
    max_output_tokens: u32,
    tokens_per_word: f64,
}

impl OutputLengthClassifier {
    pub fn new(max_output_tokens: u32, tokens_per_word: f64) -> Self {
        Self { max_output_tokens, tokens_per_word }
    }

    pub fn from_config(config: &GuardrailConfig) -> Self {
        Self::new(config.max_output_tokens, config.tokens_per_word)
    }

    pub fn estimate_tokens(&self, text: &str) -> u64 {
        let words = text.split_whitespace().count() as f64;
        (words * self.tokens_per_word).ceil() as u64
    }
}

#[async_trait]
impl Classifier for OutputLengthClassifier {
    fn name(&self) -> &str {
        "output_length"
    }

    fn violation(&self) -> &str {
        "too long"
    }

    async fn classify(
        &self,
        _context: &TurnContext,
        input: &str,
    ) -> Result<Verdict, ClassifierError> {
        let estimated_tokens = self.estimate_tokens(input);
        let limit = u64::from(self.max_output_tokens);
        let payload = json!({ "estimated_tokens": estimated_tokens, "limit": limit });

        if estimated_tokens > limit {
            Ok(Verdict::trip(format!("estimated {estimated_tokens} tokens exceeds {limit}"))
                .with_payload(payload))
        } else {
            Ok(Verdict::pass().with_payload(payload))
        }
    }
}
