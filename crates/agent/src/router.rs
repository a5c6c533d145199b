use std::collections::HashMap;
use std::sync::Arc;

use fixflow_core::domain::routing::DomainKey;
use fixflow_core::errors::DomainError;
use thiserror::Error;

use crate::guardrails::GuardrailSet;
use crate::handler::Handler;

pub struct DomainRoute {
    pub key: DomainKey,
    /// Human-facing service name used in fallback replies, e.g. "Habib Bank".
    pub label: String,
    /// What the service handles, e.g. "complaints".
    pub topic: String,
    pub handler: Arc<dyn Handler>,
    pub guardrails: GuardrailSet,
}

impl DomainRoute {
    pub fn new(
        key: DomainKey,
        label: impl Into<String>,
        topic: impl Into<String>,
        handler: Arc<dyn Handler>,
        guardrails: GuardrailSet,
    ) -> Self {
        Self { key, label: label.into(), topic: topic.into(), handler, guardrails }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("domain `{0}` is already registered")]
    DuplicateKey(DomainKey),
}

/// Registry from domain key to route. Built once at startup and shared read-only.
#[derive(Default)]
pub struct DomainRouter {
    routes: HashMap<DomainKey, Arc<DomainRoute>>,
}

impl DomainRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: DomainRoute) -> Result<(), RouterError> {
        if self.routes.contains_key(&route.key) {
            return Err(RouterError::DuplicateKey(route.key));
        }
        self.routes.insert(route.key.clone(), Arc::new(route));
        Ok(())
    }

    /// Looks up a route by case-insensitive key.
    pub fn resolve(&self, raw_key: &str) -> Result<Arc<DomainRoute>, DomainError> {
        let key = DomainKey::parse(raw_key)?;
        self.routes.get(&key).cloned().ok_or_else(|| DomainError::UnknownDomain {
            key: raw_key.trim().to_string(),
            available: self.keys(),
        })
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<DomainKey> {
        let mut keys: Vec<DomainKey> = self.routes.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
