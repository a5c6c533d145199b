use std::sync::Arc;

use fixflow_core::errors::ApplicationError;

use crate::classifier::{Classifier, TurnContext, Verdict};
use crate::handler::Handler;

/// Ordered classifiers attached to one handler, split by stage.
#[derive(Clone, Default)]
pub struct GuardrailSet {
    input: Vec<Arc<dyn Classifier>>,
    output: Vec<Arc<dyn Classifier>>,
}

impl GuardrailSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.input.push(classifier);
        self
    }

    pub fn with_output(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.output.push(classifier);
        self
    }

    pub fn input(&self) -> &[Arc<dyn Classifier>] {
        &self.input
    }

    pub fn output(&self) -> &[Arc<dyn Classifier>] {
        &self.output
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailStage {
    Input,
    Output,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    Completed { reply: String },
    Tripped { stage: GuardrailStage, classifier: String, violation: String, verdict: Verdict },
}

pub struct GuardrailPipeline;

impl GuardrailPipeline {
    /// Input classifiers, then the handler once, then output classifiers. The first trip
    /// in a stage ends the turn. Classifier or handler failures are errors, never trips.
    pub async fn run(
        guardrails: &GuardrailSet,
        handler: &dyn Handler,
        context: &TurnContext,
        message: &str,
    ) -> Result<PipelineOutcome, ApplicationError> {
        if let Some(tripped) =
            run_stage(GuardrailStage::Input, guardrails.input(), context, message).await?
        {
            return Ok(tripped);
        }

        let candidate = handler.respond(context, message).await.map_err(|error| {
            ApplicationError::HandlerUnavailable {
                handler: handler.name().to_string(),
                message: error.to_string(),
            }
        })?;

        if let Some(tripped) =
            run_stage(GuardrailStage::Output, guardrails.output(), context, &candidate).await?
        {
            return Ok(tripped);
        }

        Ok(PipelineOutcome::Completed { reply: candidate })
    }
}

async fn run_stage(
    stage: GuardrailStage,
    classifiers: &[Arc<dyn Classifier>],
    context: &TurnContext,
    content: &str,
) -> Result<Option<PipelineOutcome>, ApplicationError> {
    for classifier in classifiers {
        let verdict = classifier.classify(context, content).await.map_err(|error| {
            ApplicationError::ClassifierUnavailable {
                classifier: classifier.name().to_string(),
                message: error.to_string(),
            }
        })?;

        if verdict.tripped {
            tracing::info!(
                event_name = "agent.guardrail.tripped",
                stage = stage.as_str(),
                classifier = classifier.name(),
                domain_key = %context.domain_key,
                reason = verdict.reason.as_deref().unwrap_or_default(),
                "guardrail tripped"
            );
            return Ok(Some(PipelineOutcome::Tripped {
                stage,
                classifier: classifier.name().to_string(),
                violation: classifier.violation().to_string(),
                verdict,
            }));
        }
    }

    Ok(None)
}

/// Refusal used when an input classifier trips.
pub fn input_fallback(label: &str, topic: &str) -> String {
    format!(
        "I am here to assist with {label} {topic} only. If your issue is related to {label}, I can take it from here."
    )
}

/// Refusal used when an output classifier discards the candidate reply.
pub fn output_fallback(label: &str, topic: &str, violation: &str) -> String {
    format!(
        "I could not share that response because it was {violation}. I am here to assist with {label} {topic} only, so please rephrase or narrow your question."
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use fixflow_core::domain::routing::DomainKey;
    use fixflow_core::errors::ApplicationError;

    use super::{
        input_fallback, output_fallback, GuardrailPipeline, GuardrailSet, GuardrailStage,
        PipelineOutcome,
    };
    use crate::classifier::{Classifier, ClassifierError, TurnContext, Verdict};
    use crate::handler::{Handler, HandlerError};
    use crate::llm::LlmError;

    /// Classifier double: fixed verdict or failure, counting calls.
    pub(crate) struct CountingClassifier {
        pub(crate) name: &'static str,
        pub(crate) trips: bool,
        pub(crate) fails: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl CountingClassifier {
        pub(crate) fn passing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, trips: false, fails: false, calls: AtomicUsize::new(0) })
        }

        pub(crate) fn tripping(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, trips: true, fails: false, calls: AtomicUsize::new(0) })
        }

        pub(crate) fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, trips: false, fails: true, calls: AtomicUsize::new(0) })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for CountingClassifier {
        fn name(&self) -> &str {
            self.name
        }

        fn violation(&self) -> &str {
            "too long"
        }

        async fn classify(
            &self,
            _context: &TurnContext,
            _input: &str,
        ) -> Result<Verdict, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(ClassifierError::Transport(LlmError::Transport("timeout".to_string())));
            }
            Ok(if self.trips { Verdict::trip("off topic") } else { Verdict::pass() })
        }
    }

    /// Handler double returning scripted replies in order, counting calls.
    pub(crate) struct CountingHandler {
        pub(crate) replies: Vec<&'static str>,
        pub(crate) fails: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl CountingHandler {
        pub(crate) fn replying(replies: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self { replies, fails: false, calls: AtomicUsize::new(0) })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self { replies: Vec::new(), fails: true, calls: AtomicUsize::new(0) })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn respond(
            &self,
            _context: &TurnContext,
            _input: &str,
        ) -> Result<String, HandlerError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(HandlerError::Transport(LlmError::Transport("reset".to_string())));
            }
            let reply = self.replies.get(index).or_else(|| self.replies.last()).copied();
            reply.map(str::to_string).ok_or(HandlerError::EmptyCompletion)
        }
    }

    fn context() -> TurnContext {
        TurnContext {
            domain_key: DomainKey::new("bank"),
            label: "Habib Bank".to_string(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn passing_stages_return_handler_reply() {
        let input = CountingClassifier::passing("scope");
        let output = CountingClassifier::passing("length");
        let handler = CountingHandler::replying(vec!["Block your card from the app."]);
        let set = GuardrailSet::new().with_input(input.clone()).with_output(output.clone());

        let outcome = GuardrailPipeline::run(&set, handler.as_ref(), &context(), "card stuck")
            .await
            .expect("outcome");

        assert_eq!(
            outcome,
            PipelineOutcome::Completed { reply: "Block your card from the app.".to_string() }
        );
        assert_eq!((input.calls(), handler.calls(), output.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn input_trip_skips_handler_and_later_classifiers() {
        let first = CountingClassifier::tripping("scope");
        let second = CountingClassifier::passing("profanity");
        let output = CountingClassifier::passing("length");
        let handler = CountingHandler::replying(vec!["never"]);
        let set = GuardrailSet::new()
            .with_input(first.clone())
            .with_input(second.clone())
            .with_output(output.clone());

        let outcome = GuardrailPipeline::run(&set, handler.as_ref(), &context(), "weather?")
            .await
            .expect("outcome");

        assert!(matches!(
            outcome,
            PipelineOutcome::Tripped { stage: GuardrailStage::Input, ref classifier, .. }
                if classifier == "scope"
        ));
        assert_eq!(handler.calls(), 0);
        assert_eq!(second.calls(), 0);
        assert_eq!(output.calls(), 0);
    }

    #[tokio::test]
    async fn output_trip_discards_candidate_after_one_handler_call() {
        let output = CountingClassifier::tripping("length");
        let handler = CountingHandler::replying(vec!["a very long essay"]);
        let set = GuardrailSet::new().with_output(output.clone());

        let outcome = GuardrailPipeline::run(&set, handler.as_ref(), &context(), "explain")
            .await
            .expect("outcome");

        assert!(matches!(
            outcome,
            PipelineOutcome::Tripped { stage: GuardrailStage::Output, ref violation, .. }
                if violation == "too long"
        ));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn classifier_failure_is_an_error_not_a_trip() {
        let set = GuardrailSet::new().with_input(CountingClassifier::failing("scope"));
        let handler = CountingHandler::replying(vec!["never"]);

        let error = GuardrailPipeline::run(&set, handler.as_ref(), &context(), "hi")
            .await
            .expect_err("classifier failure");

        assert!(matches!(
            error,
            ApplicationError::ClassifierUnavailable { ref classifier, .. } if classifier == "scope"
        ));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn handler_failure_is_handler_unavailable() {
        let output = CountingClassifier::passing("length");
        let set = GuardrailSet::new().with_output(output.clone());
        let handler = CountingHandler::failing();

        let error = GuardrailPipeline::run(&set, handler.as_ref(), &context(), "hi")
            .await
            .expect_err("handler failure");

        assert!(matches!(error, ApplicationError::HandlerUnavailable { .. }));
        assert_eq!(output.calls(), 0);
    }

    #[test]
    fn fallback_text_names_the_domain_without_history() {
        let input = input_fallback("Habib Bank", "complaints");
        assert!(input.contains("Habib Bank complaints only"));

        let output = output_fallback("StorePilot", "store operations questions", "too long");
        assert!(output.contains("too long"));
        assert!(output.contains("StorePilot"));
    }
}
