use std::collections::HashMap;

use tokio::sync::RwLock;

use fixflow_core::domain::conversation::{SessionId, Turn};

use super::{RepositoryError, SessionRepository};

/// Process-local conversation log for tests and the interactive CLI.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id.as_str()).cloned().unwrap_or_default())
    }

    async fn append_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError> {
        if turns.is_empty() {
            return Ok(());
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.as_str().to_string()).or_default().extend(turns.iter().cloned());
        Ok(())
    }

    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.contains_key(session_id.as_str()))
    }
}
