use std::sync::Arc;

use fixflow_core::domain::conversation::{Role, SessionId, Turn};
use fixflow_core::errors::{ApplicationError, DomainError};
use fixflow_db::repositories::{RepositoryError, SessionRepository};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::classifier::TurnContext;
use crate::extract::extract;
use crate::guardrails::{
    input_fallback, output_fallback, GuardrailPipeline, GuardrailStage, PipelineOutcome,
};
use crate::router::DomainRouter;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub domain_key: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for TranscriptEntry {
    fn from(turn: &Turn) -> Self {
        Self { role: turn.role, content: turn.content.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutedReply {
    pub reply: String,
    pub is_final: bool,
    pub final_artifact: Option<Map<String, Value>>,
    /// `None` when history could not be read back after the append.
    pub transcript: Option<Vec<TranscriptEntry>>,
}

impl RoutedReply {
    fn guarded(reply: String) -> Self {
        Self { reply, is_final: false, final_artifact: None, transcript: Some(Vec::new()) }
    }
}

pub struct AgentRuntime {
    router: Arc<DomainRouter>,
    sessions: Arc<dyn SessionRepository>,
}

impl AgentRuntime {
    pub fn new(router: Arc<DomainRouter>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { router, sessions }
    }

    pub fn router(&self) -> &DomainRouter {
        &self.router
    }

    pub async fn handle_message(
        &self,
        request: MessageRequest,
        correlation_id: &str,
    ) -> Result<RoutedReply, ApplicationError> {
        let route = self.router.resolve(&request.domain_key)?;
        let session_id = SessionId::parse(&request.session_id)?;
        if request.message.trim().is_empty() {
            return Err(DomainError::InvalidRequest("message must not be blank".to_string()).into());
        }

        let history = self.sessions.load_history(&session_id).await.map_err(persistence)?;
        let context = TurnContext {
            domain_key: route.key.clone(),
            label: route.label.clone(),
            history,
        };

        let outcome = GuardrailPipeline::run(
            &route.guardrails,
            route.handler.as_ref(),
            &context,
            &request.message,
        )
        .await?;

        let reply = match outcome {
            PipelineOutcome::Tripped { stage, classifier, violation, .. } => {
                tracing::info!(
                    event_name = "agent.turn.guarded",
                    correlation_id,
                    session_id = %session_id,
                    domain_key = %route.key,
                    stage = stage.as_str(),
                    classifier = %classifier,
                    "turn answered with guarded fallback"
                );
                let text = match stage {
                    GuardrailStage::Input => input_fallback(&route.label, &route.topic),
                    GuardrailStage::Output => {
                        output_fallback(&route.label, &route.topic, &violation)
                    }
                };
                return Ok(RoutedReply::guarded(text));
            }
            PipelineOutcome::Completed { reply } => reply,
        };

        let metadata = json!({ "domain_key": route.key.as_str() });
        let turns = [
            Turn::user(request.message.clone()).with_metadata(metadata.clone()),
            Turn::assistant(reply.clone()).with_metadata(metadata),
        ];
        self.sessions.append_turns(&session_id, &turns).await.map_err(persistence)?;

        let final_artifact = extract(&reply);
        let transcript = match self.sessions.load_history(&session_id).await {
            Ok(history) => Some(history.iter().map(TranscriptEntry::from).collect()),
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.transcript.unavailable",
                    correlation_id,
                    session_id = %session_id,
                    error = %error,
                    "history read-back failed after append"
                );
                None
            }
        };

        tracing::info!(
            event_name = "agent.turn.completed",
            correlation_id,
            session_id = %session_id,
            domain_key = %route.key,
            is_final = final_artifact.is_some(),
            reply_chars = reply.chars().count(),
            "turn completed"
        );

        Ok(RoutedReply { reply, is_final: final_artifact.is_some(), final_artifact, transcript })
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use fixflow_core::domain::conversation::{Role, SessionId, Turn};
    use fixflow_core::domain::routing::DomainKey;
    use fixflow_core::errors::{ApplicationError, DomainError};
    use fixflow_db::repositories::{
        InMemorySessionRepository, RepositoryError, SessionRepository,
    };
    use serde_json::json;

    use super::{AgentRuntime, MessageRequest};
    use crate::guardrails::tests::{CountingClassifier, CountingHandler};
    use crate::guardrails::GuardrailSet;
    use crate::router::{DomainRoute, DomainRouter};

    const ADVICE: &str = "Please call the helpline to block the card, then visit the branch.";
    const FILED: &str = "Your complaint is filed.\n```json\n{\"issue\": \"card retained\", \"branch_or_atm\": \"ATM-7\"}\n```";

    struct Fixture {
        runtime: AgentRuntime,
        sessions: Arc<InMemorySessionRepository>,
        input: Arc<CountingClassifier>,
        output: Arc<CountingClassifier>,
        handler: Arc<CountingHandler>,
    }

    fn fixture(input: Arc<CountingClassifier>, output: Arc<CountingClassifier>) -> Fixture {
        let handler = CountingHandler::replying(vec![ADVICE, FILED]);
        let mut router = DomainRouter::new();
        router
            .register(DomainRoute::new(
                DomainKey::new("bank"),
                "Habib Bank",
                "complaints",
                handler.clone(),
                GuardrailSet::new().with_input(input.clone()).with_output(output.clone()),
            ))
            .expect("register bank");
        router
            .register(DomainRoute::new(
                DomainKey::new("hospital"),
                "Indus Hospital",
                "complaints",
                CountingHandler::replying(vec!["ok"]),
                GuardrailSet::new(),
            ))
            .expect("register hospital");

        let sessions = Arc::new(InMemorySessionRepository::default());
        let runtime = AgentRuntime::new(Arc::new(router), sessions.clone());
        Fixture { runtime, sessions, input, output, handler }
    }

    fn request(session: &str, domain: &str, message: &str) -> MessageRequest {
        MessageRequest {
            session_id: session.to_string(),
            domain_key: domain.to_string(),
            message: message.to_string(),
        }
    }

    fn session(id: &str) -> SessionId {
        SessionId(id.to_string())
    }

    #[tokio::test]
    async fn plain_reply_then_fenced_reply_finalizes_the_dialogue() {
        let fx = fixture(CountingClassifier::passing("scope"), CountingClassifier::passing("len"));

        let first = fx
            .runtime
            .handle_message(request("s1", "bank", "my card is stuck in the ATM"), "corr-a")
            .await
            .expect("first turn");

        assert!(!first.is_final);
        assert_eq!(first.final_artifact, None);
        assert_eq!(first.reply, ADVICE);
        assert_eq!(first.transcript.as_ref().map(Vec::len), Some(2));

        let second = fx
            .runtime
            .handle_message(request("s1", "bank", "submit"), "corr-b")
            .await
            .expect("second turn");

        assert!(second.is_final);
        assert_eq!(
            second.final_artifact.clone().map(serde_json::Value::Object),
            Some(json!({"issue": "card retained", "branch_or_atm": "ATM-7"}))
        );
        let transcript = second.transcript.expect("transcript");
        let contents: Vec<&str> = transcript.iter().map(|entry| entry.content.as_str()).collect();
        assert_eq!(contents, vec!["my card is stuck in the ATM", ADVICE, "submit", FILED]);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn malformed_fenced_block_is_not_final_but_still_persisted() {
        const BROKEN: &str = "Filing now.\n```json\n{\"issue\": \"card retained\"\n```";
        let mut router = DomainRouter::new();
        router
            .register(DomainRoute::new(
                DomainKey::new("bank"),
                "Habib Bank",
                "complaints",
                CountingHandler::replying(vec![BROKEN]),
                GuardrailSet::new(),
            ))
            .expect("register bank");
        let sessions = Arc::new(InMemorySessionRepository::default());
        let runtime = AgentRuntime::new(Arc::new(router), sessions.clone());

        let reply = runtime
            .handle_message(request("s-broken", "bank", "submit"), "corr-broken")
            .await
            .expect("turn");

        assert!(!reply.is_final);
        assert_eq!(reply.final_artifact, None);
        assert_eq!(reply.reply, BROKEN);
        let stored = sessions.load_history(&session("s-broken")).await.expect("history");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, BROKEN);
    }

    #[tokio::test]
    async fn history_is_a_prefix_stable_growing_log() {
        let fx = fixture(CountingClassifier::passing("scope"), CountingClassifier::passing("len"));

        fx.runtime.handle_message(request("s1", "bank", "one"), "c1").await.expect("one");
        let before = fx.sessions.load_history(&session("s1")).await.expect("before");
        fx.runtime.handle_message(request("s1", "bank", "two"), "c2").await.expect("two");
        let after = fx.sessions.load_history(&session("s1")).await.expect("after");

        assert_eq!(after.len(), before.len() + 2);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after[0].metadata, Some(json!({"domain_key": "bank"})));
    }

    #[tokio::test]
    async fn unknown_domain_fails_without_touching_sessions() {
        let fx = fixture(CountingClassifier::passing("scope"), CountingClassifier::passing("len"));

        let error = fx
            .runtime
            .handle_message(request("s9", "weather", "is it raining"), "corr-c")
            .await
            .expect_err("unknown domain");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::UnknownDomain {
                key: "weather".to_string(),
                available: vec![DomainKey::new("bank"), DomainKey::new("hospital")],
            })
        );
        assert!(!fx.sessions.session_exists(&session("s9")).await.expect("exists"));
        assert_eq!(fx.input.calls(), 0);
    }

    #[tokio::test]
    async fn input_trip_returns_fallback_and_persists_nothing() {
        let fx = fixture(CountingClassifier::tripping("scope"), CountingClassifier::passing("len"));
        let reply = fx
            .runtime
            .handle_message(request("s2", "bank", "what is the weather today"), "corr-d")
            .await
            .expect("guarded reply");

        assert!(!reply.is_final);
        assert_eq!(reply.final_artifact, None);
        assert_eq!(reply.transcript, Some(Vec::new()));
        assert!(reply.reply.contains("Habib Bank"));
        assert_eq!(fx.handler.calls(), 0);
        assert_eq!(fx.output.calls(), 0);
        assert!(!fx.sessions.session_exists(&session("s2")).await.expect("exists"));
    }

    #[tokio::test]
    async fn output_trip_discards_candidate_and_persists_nothing() {
        let fx = fixture(CountingClassifier::passing("scope"), CountingClassifier::tripping("len"));

        let reply = fx
            .runtime
            .handle_message(request("s3", "bank", "explain everything"), "corr-e")
            .await
            .expect("guarded reply");

        assert_eq!(fx.handler.calls(), 1);
        assert_ne!(reply.reply, ADVICE);
        assert!(reply.reply.contains("too long"));
        assert!(reply.reply.contains("Habib Bank"));
        assert_eq!(reply.transcript, Some(Vec::new()));
        assert!(fx.sessions.load_history(&session("s3")).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn classifier_outage_fails_the_turn_without_mutation() {
        let fx = fixture(CountingClassifier::failing("scope"), CountingClassifier::passing("len"));

        let error = fx
            .runtime
            .handle_message(request("s4", "bank", "card stuck"), "corr-f")
            .await
            .expect_err("classifier outage");

        assert!(matches!(error, ApplicationError::ClassifierUnavailable { .. }));
        assert_eq!(fx.handler.calls(), 0);
        assert!(!fx.sessions.session_exists(&session("s4")).await.expect("exists"));
    }

    #[tokio::test]
    async fn blank_message_and_session_are_invalid_requests() {
        let fx = fixture(CountingClassifier::passing("scope"), CountingClassifier::passing("len"));

        let blank_message =
            fx.runtime.handle_message(request("s5", "bank", "   "), "c").await.expect_err("blank");
        let blank_session =
            fx.runtime.handle_message(request(" ", "bank", "hello"), "c").await.expect_err("blank");

        assert!(matches!(blank_message, ApplicationError::Domain(DomainError::InvalidRequest(_))));
        assert!(matches!(blank_session, ApplicationError::Domain(DomainError::InvalidRequest(_))));
        assert_eq!(fx.input.calls(), 0);
    }

    /// Appends succeed but every read after the first append fails.
    #[derive(Default)]
    struct FlakyReadRepository {
        inner: InMemorySessionRepository,
        appended: AtomicBool,
    }

    #[async_trait]
    impl SessionRepository for FlakyReadRepository {
        async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
            if self.appended.load(Ordering::SeqCst) {
                return Err(RepositoryError::Decode("disk error".to_string()));
            }
            self.inner.load_history(session_id).await
        }

        async fn append_turns(
            &self,
            session_id: &SessionId,
            turns: &[Turn],
        ) -> Result<(), RepositoryError> {
            self.inner.append_turns(session_id, turns).await?;
            self.appended.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
            self.inner.session_exists(session_id).await
        }
    }

    #[tokio::test]
    async fn failed_history_read_back_yields_null_transcript() {
        let mut router = DomainRouter::new();
        router
            .register(DomainRoute::new(
                DomainKey::new("bank"),
                "Habib Bank",
                "complaints",
                CountingHandler::replying(vec![FILED]),
                GuardrailSet::new(),
            ))
            .expect("register");
        let sessions = Arc::new(FlakyReadRepository::default());
        let runtime = AgentRuntime::new(Arc::new(router), sessions.clone());

        let reply = runtime
            .handle_message(request("s6", "bank", "submit"), "corr-g")
            .await
            .expect("reply");

        assert!(reply.is_final);
        assert_eq!(reply.transcript, None);
        assert!(sessions.session_exists(&session("s6")).await.expect("exists"));
    }
}
