use std::sync::Arc;

use fixflow_core::config::GuardrailConfig;
use fixflow_core::domain::routing::DomainKey;

use crate::classifier::{LlmClassifier, OutputLengthClassifier};
use crate::guardrails::GuardrailSet;
use crate::handler::LlmHandler;
use crate::llm::LlmClient;
use crate::router::{DomainRoute, DomainRouter, RouterError};
use crate::tools::ToolRegistry;

const BANK_GUARD: &str = "You screen messages sent to the Habib Bank complaint desk. \
Mark the message unsafe if it is not about a Habib Bank service or complaint, if it contains \
profanity, or if it shares sensitive personal data such as full card numbers, PINs, passwords or OTPs.";

const BANK_AGENT: &str = "You are the complaint desk for Habib Bank. When the customer describes a \
problem, first offer clear steps if it can be solved directly (app login, PIN reset, blocking a card, \
OTP issues, branch information) and then ask whether they want an official complaint filed. \
If it cannot be solved reliably (fraud, ATM cash not dispensed, unauthorized deduction, loan dispute, \
staff misconduct) start complaint intake: ask only relevant questions, never guess, and leave unknown \
fields null. Only after the customer explicitly says 'submit', output exactly one ```json block with \
the fields issue, branch_or_atm, date_time, amount, description, photos, category and priority.";

const HOSPITAL_GUARD: &str = "You screen messages sent to the Indus Hospital complaint desk. \
Mark the message unsafe if it is not about an Indus Hospital service or complaint, if it contains \
profanity, or if it shares sensitive personal data such as national ID or card numbers.";

const HOSPITAL_AGENT: &str = "You are the complaint desk for Indus Hospital. For simple issues \
(appointments, billing, reports, app login) give fix steps. For serious issues (staff conduct, \
treatment, negligence) collect the complaint step by step: patient name, department, reason, issue, \
date_time, description, category and photos. Never guess; leave unknown fields null. Only after the \
user explicitly says 'submit', output exactly one ```json block with those fields.";

const STOREPILOT_GUARD: &str = "You decide whether a message is about running an online store: \
products, pricing, inventory, orders, shipping, marketing or customer service. Set is_ecommerce \
accordingly.";

const STOREPILOT_AGENT: &str = "You are StorePilot, an operations assistant for online store owners. \
Give concise, practical answers about products, pricing, inventory, orders, fulfilment and marketing. \
Use the available tools when current market data would improve the answer, and say so plainly when a \
tool could not provide data.";

/// Registers the bank, hospital and ecommerce domains against one shared model client.
pub fn default_router(
    client: Arc<dyn LlmClient>,
    guardrails: &GuardrailConfig,
) -> Result<DomainRouter, RouterError> {
    default_router_with_tools(client, guardrails, ToolRegistry::default())
}

/// Same catalog, with `ecommerce_tools` available to the StorePilot handler.
pub fn default_router_with_tools(
    client: Arc<dyn LlmClient>,
    guardrails: &GuardrailConfig,
    ecommerce_tools: ToolRegistry,
) -> Result<DomainRouter, RouterError> {
    let output_length = Arc::new(OutputLengthClassifier::from_config(guardrails));
    let mut router = DomainRouter::new();

    router.register(DomainRoute::new(
        DomainKey::new("bank"),
        "Habib Bank",
        "complaints",
        Arc::new(LlmHandler::new("bank_agent", BANK_AGENT, client.clone())),
        GuardrailSet::new()
            .with_input(Arc::new(
                LlmClassifier::new("bank_input_guard", BANK_GUARD, client.clone())
                    .trips_when("unsafe", true)
                    .with_violation("outside Habib Bank complaints"),
            ))
            .with_output(output_length.clone()),
    ))?;

    router.register(DomainRoute::new(
        DomainKey::new("hospital"),
        "Indus Hospital",
        "complaints",
        Arc::new(LlmHandler::new("hospital_agent", HOSPITAL_AGENT, client.clone())),
        GuardrailSet::new()
            .with_input(Arc::new(
                LlmClassifier::new("hospital_input_guard", HOSPITAL_GUARD, client.clone())
                    .trips_when("unsafe", true)
                    .with_violation("outside Indus Hospital complaints"),
            ))
            .with_output(output_length.clone()),
    ))?;

    router.register(DomainRoute::new(
        DomainKey::new("ecommerce"),
        "StorePilot",
        "store operations questions",
        Arc::new(
            LlmHandler::new("storepilot_agent", STOREPILOT_AGENT, client.clone())
                .with_tools(ecommerce_tools),
        ),
        GuardrailSet::new()
            .with_input(Arc::new(
                LlmClassifier::new("storepilot_scope_guard", STOREPILOT_GUARD, client)
                    .trips_when("is_ecommerce", false)
                    .with_violation("unrelated to running an online store"),
            ))
            .with_output(output_length),
    ))?;

    tracing::debug!(
        event_name = "agent.router.initialized",
        route_count = router.route_count(),
        "domain catalog registered"
    );

    Ok(router)
}
