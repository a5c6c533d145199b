use async_trait::async_trait;
use thiserror::Error;

use fixflow_core::domain::conversation::{SessionId, Turn};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable, ordered conversation log keyed by session id.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Turns for `session_id` in append order. Unknown sessions yield an empty
    /// history and are not created.
    async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError>;

    /// Appends `turns` atomically, creating the session on first write.
    async fn append_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError>;

    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError>;
}
