use thiserror::Error;

use crate::domain::routing::DomainKey;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown domain `{key}` (available: {})", available_list(.available))]
    UnknownDomain { key: String, available: Vec<DomainKey> },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn available_list(available: &[DomainKey]) -> String {
    if available.is_empty() {
        return "none".to_string();
    }
    available.iter().map(DomainKey::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("classifier `{classifier}` unavailable: {message}")]
    ClassifierUnavailable { classifier: String, message: String },
    #[error("handler `{handler}` unavailable: {message}")]
    HandlerUnavailable { handler: String, message: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::ServiceUnavailable { code, .. }
            | Self::Internal { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::UnknownDomain { .. }) => {
                Self::BadRequest { code: "unknown_domain", message, correlation_id }
            }
            ApplicationError::Domain(DomainError::InvalidRequest(_)) => {
                Self::BadRequest { code: "invalid_request", message, correlation_id }
            }
            ApplicationError::ClassifierUnavailable { .. } => {
                Self::ServiceUnavailable { code: "classifier_unavailable", message, correlation_id }
            }
            ApplicationError::HandlerUnavailable { .. } => {
                Self::ServiceUnavailable { code: "handler_unavailable", message, correlation_id }
            }
            ApplicationError::Persistence(_) => Self::ServiceUnavailable {
                code: "persistence_unavailable",
                message,
                correlation_id,
            },
            ApplicationError::Configuration(_) => {
                Self::Internal { code: "configuration", message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::routing::DomainKey;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn unknown_domain_maps_to_bad_request_listing_valid_keys() {
        let interface = ApplicationError::from(DomainError::UnknownDomain {
            key: "weather".to_owned(),
            available: vec![DomainKey::new("bank"), DomainKey::new("hospital")],
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                code: "unknown_domain",
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert!(interface.message().contains("weather"));
        assert!(interface.message().contains("bank, hospital"));
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface =
            ApplicationError::from(DomainError::InvalidRequest("message must not be blank".into()))
                .into_interface("req-2");

        assert_eq!(interface.code(), "invalid_request");
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn dependency_failures_map_to_distinct_service_unavailable_codes() {
        let classifier = ApplicationError::ClassifierUnavailable {
            classifier: "bank_input_guard".to_owned(),
            message: "timeout".to_owned(),
        }
        .into_interface("req-3");
        let handler = ApplicationError::HandlerUnavailable {
            handler: "bank".to_owned(),
            message: "connection reset".to_owned(),
        }
        .into_interface("req-3");

        assert!(matches!(classifier, InterfaceError::ServiceUnavailable { .. }));
        assert!(matches!(handler, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(classifier.code(), "classifier_unavailable");
        assert_eq!(handler.code(), "handler_unavailable");
        assert_eq!(
            handler.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert_eq!(interface.code(), "persistence_unavailable");
        assert_eq!(interface.correlation_id(), "req-4");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing api key".to_owned()).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn unknown_domain_with_empty_registry_says_none() {
        let error = DomainError::UnknownDomain { key: "bank".to_owned(), available: Vec::new() };
        assert!(error.to_string().contains("available: none"));
    }
}
