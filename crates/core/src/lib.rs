pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{Role, SessionId, Turn};
pub use domain::routing::DomainKey;
pub use errors::{ApplicationError, DomainError, InterfaceError};
