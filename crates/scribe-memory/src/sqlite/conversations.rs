use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{Conversation, ConversationId, ConversationTurn, TurnRole};

impl SqliteStore {
    /// Create a new conversation and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_conversation(&self) -> Result<ConversationId, MemoryError> {
        let row: (i64,) = sqlx::query_as("INSERT INTO conversations DEFAULT VALUES RETURNING id")
            .fetch_one(&self.pool)
            .await?;
        Ok(ConversationId(row.0))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn conversation_exists(&self, id: ConversationId) -> Result<bool, MemoryError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Append a turn to the end of a conversation. Turns are never updated.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the conversation does not exist,
    /// or an error if the insert fails.
    pub async fn append_turn(
        &self,
        id: ConversationId,
        role: TurnRole,
        text: &str,
        sources: &[String],
    ) -> Result<(), MemoryError> {
        if !self.conversation_exists(id).await? {
            return Err(MemoryError::NotFound {
                entity: "conversation",
                id: id.0,
            });
        }
        let sources_json = serde_json::to_string(sources)?;
        sqlx::query("INSERT INTO turns (conversation_id, role, text, sources) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(role.as_str())
            .bind(text)
            .bind(sources_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load a conversation with all of its turns in append order.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if the conversation does not exist.
    pub async fn load_conversation(&self, id: ConversationId) -> Result<Conversation, MemoryError> {
        if !self.conversation_exists(id).await? {
            return Err(MemoryError::NotFound {
                entity: "conversation",
                id: id.0,
            });
        }

        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT role, text, sources, created_at FROM turns \
             WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for (role, text, sources, timestamp) in rows {
            let Some(role) = TurnRole::parse(&role) else {
                tracing::warn!(conversation = %id, role, "skipping turn with unknown role");
                continue;
            };
            turns.push(ConversationTurn {
                role,
                text,
                timestamp,
                sources: serde_json::from_str(&sources)?,
            });
        }

        Ok(Conversation { id, turns })
    }

    /// All conversation IDs with their turn counts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_conversations(&self) -> Result<Vec<(ConversationId, i64)>, MemoryError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT c.id, COUNT(t.id) FROM conversations c \
             LEFT JOIN turns t ON t.conversation_id = c.id \
             GROUP BY c.id ORDER BY c.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, n)| (ConversationId(id), n))
            .collect())
    }

    /// Delete a conversation and, by cascade, all of its turns.
    ///
    /// Returns `false` if no such conversation existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_conversation_returns_increasing_ids() {
        let store = test_store().await;
        let a = store.create_conversation().await.unwrap();
        let b = store.create_conversation().await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn append_and_load_preserves_order_and_sources() {
        let store = test_store().await;
        let id = store.create_conversation().await.unwrap();
        store
            .append_turn(id, TurnRole::User, "what is alpha?", &[])
            .await
            .unwrap();
        store
            .append_turn(
                id,
                TurnRole::Assistant,
                "alpha is a letter [source: notes.md]",
                &["notes.md".to_owned()],
            )
            .await
            .unwrap();

        let conv = store.load_conversation(id).await.unwrap();
        assert_eq!(conv.id, id);
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].role, TurnRole::User);
        assert!(conv.turns[0].sources.is_empty());
        assert_eq!(conv.turns[1].sources, vec!["notes.md".to_owned()]);
        assert!(conv.turns[1].timestamp > 0);
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_fails() {
        let store = test_store().await;
        let err = store
            .append_turn(ConversationId(999), TurnRole::User, "hi", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { id: 999, .. }));
    }

    #[tokio::test]
    async fn load_unknown_conversation_fails() {
        let store = test_store().await;
        assert!(matches!(
            store.load_conversation(ConversationId(5)).await,
            Err(MemoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_conversation_cascades_turns() {
        let store = test_store().await;
        let id = store.create_conversation().await.unwrap();
        store
            .append_turn(id, TurnRole::User, "q", &[])
            .await
            .unwrap();

        assert!(store.delete_conversation(id).await.unwrap());
        assert!(!store.delete_conversation(id).await.unwrap());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn list_conversations_counts_turns() {
        let store = test_store().await;
        let first = store.create_conversation().await.unwrap();
        let second = store.create_conversation().await.unwrap();
        store
            .append_turn(first, TurnRole::User, "q", &[])
            .await
            .unwrap();

        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed, vec![(second, 0), (first, 1)]);
    }
}
