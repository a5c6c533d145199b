//! Agent runtime: guardrail-gated routing of user turns to domain handlers.
//!
//! Per message the runtime:
//! 1. **Routing** (`router`) - resolves the caller's domain key to a handler and its guardrails
//! 2. **Input stage** (`guardrails`) - classifiers may trip and short-circuit the turn
//! 3. **Handler** (`handler`) - the domain model produces a candidate reply, optionally using `tools`
//! 4. **Output stage** (`guardrails`) - classifiers may trip and discard the candidate
//! 5. **Extraction** (`extract`) - a fenced JSON block in the reply marks the dialogue final
//! 6. **Persistence** (`runtime`) - the user/assistant pair is appended to the session log
//!
//! Model calls go through the `llm::LlmClient` seam, so every classifier and handler is
//! constructed with an injected client and can be replaced by a test double.

pub mod classifier;
pub mod domains;
pub mod extract;
pub mod guardrails;
pub mod handler;
pub mod llm;
pub mod router;
pub mod runtime;
pub mod tools;

pub use classifier::{Classifier, ClassifierError, TurnContext, Verdict};
pub use guardrails::{GuardrailPipeline, GuardrailSet, PipelineOutcome};
pub use handler::{Handler, HandlerError};
pub use router::{DomainRoute, DomainRouter};
pub use runtime::{AgentRuntime, MessageRequest, RoutedReply, TranscriptEntry};
