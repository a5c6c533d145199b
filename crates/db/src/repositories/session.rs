use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use fixflow_core::domain::conversation::{Role, SessionId, Turn};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                role,
                content,
                metadata_json,
                created_at
             FROM conversation_turns
             WHERE session_id = ?
             ORDER BY seq ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    async fn append_turns(
        &self,
        session_id: &SessionId,
        turns: &[Turn],
    ) -> Result<(), RepositoryError> {
        if turns.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // The upsert is the first statement so the write lock is taken before any
        // turn lands; concurrent appends to one session cannot interleave.
        sqlx::query(
            "INSERT INTO conversation_sessions (id, created_at, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(session_id.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for turn in turns {
            let metadata_json = turn
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|error| {
                    RepositoryError::Decode(format!("could not encode turn metadata: {error}"))
                })?;

            sqlx::query(
                "INSERT INTO conversation_turns (
                    session_id,
                    role,
                    content,
                    metadata_json,
                    created_at
                 ) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(session_id.as_str())
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(metadata_json)
            .bind(turn.recorded_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            event_name = "persistence.turns.appended",
            session_id = %session_id,
            turn_count = turns.len(),
            "appended conversation turns"
        );

        Ok(())
    }

    async fn session_exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM conversation_sessions WHERE id = ?",
        )
        .bind(session_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

fn turn_from_row(row: SqliteRow) -> Result<Turn, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role `{role_raw}`")))?;

    let metadata = row
        .try_get::<Option<String>, _>("metadata_json")?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid json in `metadata_json`: {error}"))
            })
        })
        .transpose()?;

    Ok(Turn {
        role,
        content: row.try_get("content")?,
        metadata,
        recorded_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use fixflow_core::domain::conversation::{Role, SessionId, Turn};

    use super::SqlSessionRepository;
    use crate::migrations;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn unknown_session_has_empty_history_and_is_not_created() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let session = SessionId("never-seen".to_string());

        let history = repo.load_history(&session).await.expect("load history");

        assert!(history.is_empty());
        assert!(!repo.session_exists(&session).await.expect("exists check"));
        pool.close().await;
    }

    #[tokio::test]
    async fn append_then_load_preserves_order_and_metadata() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let session = SessionId("s-order".to_string());

        repo.append_turns(
            &session,
            &[
                Turn::user("my card was charged twice").with_metadata(json!({"domain_key": "bank"})),
                Turn::assistant("Which card is it?"),
            ],
        )
        .await
        .expect("first append");
        repo.append_turns(&session, &[Turn::user("the debit one"), Turn::assistant("Filed.")])
            .await
            .expect("second append");

        let history = repo.load_history(&session).await.expect("load history");
        let contents: Vec<&str> = history.iter().map(|turn| turn.content.as_str()).collect();

        assert_eq!(
            contents,
            vec!["my card was charged twice", "Which card is it?", "the debit one", "Filed."]
        );
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[0].metadata, Some(json!({"domain_key": "bank"})));
        assert_eq!(history[1].metadata, None);
        assert!(repo.session_exists(&session).await.expect("exists check"));
        pool.close().await;
    }

    #[tokio::test]
    async fn histories_are_isolated_per_session() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let first = SessionId("s-a".to_string());
        let second = SessionId("s-b".to_string());

        repo.append_turns(&first, &[Turn::user("a1"), Turn::assistant("a2")]).await.expect("a");
        repo.append_turns(&second, &[Turn::user("b1"), Turn::assistant("b2")]).await.expect("b");

        let history = repo.load_history(&first).await.expect("load first");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|turn| turn.content.starts_with('a')));
        pool.close().await;
    }

    #[tokio::test]
    async fn empty_append_does_not_create_session() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let session = SessionId("s-empty".to_string());

        repo.append_turns(&session, &[]).await.expect("empty append");

        assert!(!repo.session_exists(&session).await.expect("exists check"));
        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_role_in_storage_is_a_decode_error() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let session = SessionId("s-corrupt".to_string());
        repo.append_turns(&session, &[Turn::user("hello")]).await.expect("append");

        sqlx::query("PRAGMA ignore_check_constraints = ON")
            .execute(&pool)
            .await
            .expect("disable checks");
        sqlx::query("UPDATE conversation_turns SET role = 'system' WHERE session_id = ?")
            .bind(session.as_str())
            .execute(&pool)
            .await
            .expect("corrupt role");

        let error = repo.load_history(&session).await.expect_err("decode should fail");
        assert!(matches!(error, RepositoryError::Decode(message) if message.contains("system")));
        pool.close().await;
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_session_keep_pairs_adjacent() {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("turns.db").display());
        let pool = connect_with_settings(&url, 4, 30).await.expect("connect file pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let repo = Arc::new(SqlSessionRepository::new(pool.clone()));
        let session = SessionId("s-concurrent".to_string());

        let mut handles = Vec::new();
        for index in 0..8 {
            let repo = Arc::clone(&repo);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                repo.append_turns(
                    &session,
                    &[Turn::user(format!("q{index}")), Turn::assistant(format!("a{index}"))],
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        let history = repo.load_history(&session).await.expect("load history");
        assert_eq!(history.len(), 16);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
