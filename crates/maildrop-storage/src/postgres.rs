//! PostgreSQL mailbox store

use crate::db::DatabasePool;
use crate::password::verify_password;
use crate::store::{AuthOutcome, MailboxLookup, MaildropStore};
use async_trait::async_trait;
use maildrop_common::types::{MailboxHandle, MaildropId, MessageKey};
use maildrop_common::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Database mailbox store
pub struct PgMaildropStore {
    pool: DatabasePool,
}

impl PgMaildropStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn set_locked(&self, id: MaildropId, locked: bool) -> Result<u64> {
        let current = !locked;
        sqlx::query("UPDATE maildrops SET locked = $2 WHERE id = $1 AND locked = $3")
            .bind(id)
            .bind(locked)
            .bind(current)
            .execute(self.pool.pool())
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl MaildropStore for PgMaildropStore {
    async fn lookup(&self, name: &str) -> Result<MailboxLookup> {
        let row: Option<(MaildropId, bool)> =
            sqlx::query_as("SELECT id, locked FROM maildrops WHERE username = $1")
                .bind(name)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        Ok(match row {
            Some((_, true)) => MailboxLookup::Locked,
            Some((id, false)) => MailboxLookup::Valid(MailboxHandle::new(id, name)),
            None => MailboxLookup::NotFound,
        })
    }

    async fn authenticate(&self, mailbox: &MailboxHandle, password: &str) -> Result<AuthOutcome> {
        let (password_hash,): (String,) =
            sqlx::query_as("SELECT password_hash FROM maildrops WHERE id = $1")
                .bind(mailbox.id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()))?
                .ok_or_else(|| Error::NotFound(format!("maildrop {}", mailbox.id)))?;

        if !verify_password(&password_hash, password) {
            return Ok(AuthOutcome::Mismatch);
        }

        // The conditional update is the lock; zero rows means someone else holds it.
        if self.set_locked(mailbox.id, true).await? == 0 {
            return Ok(AuthOutcome::Locked);
        }

        let keys: Result<Vec<(MessageKey,)>> =
            sqlx::query_as("SELECT id FROM mails WHERE maildrop_id = $1 ORDER BY id ASC")
                .bind(mailbox.id)
                .fetch_all(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()));

        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                self.set_locked(mailbox.id, false).await?;
                return Err(e);
            }
        };

        info!(mailbox = %mailbox, messages = keys.len(), "Maildrop locked");
        Ok(AuthOutcome::Accepted(keys.into_iter().map(|(k,)| k).collect()))
    }

    async fn fetch_content(&self, key: MessageKey) -> Result<String> {
        let row: Option<(String,)> = sqlx::query_as("SELECT content FROM mails WHERE id = $1")
            .bind(key)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|(content,)| content)
            .ok_or_else(|| Error::NotFound(format!("message {}", key)))
    }

    async fn size_of(&self, key: MessageKey) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT octet_length(content)::BIGINT FROM mails WHERE id = $1")
                .bind(key)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|(size,)| size.max(0) as u64)
            .ok_or_else(|| Error::NotFound(format!("message {}", key)))
    }

    async fn size_of_all(
        &self,
        mailbox: &MailboxHandle,
        excluding: &HashSet<MessageKey>,
    ) -> Result<u64> {
        let excluding: Vec<MessageKey> = excluding.iter().copied().collect();
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(octet_length(content)), 0)::BIGINT
            FROM mails
            WHERE maildrop_id = $1 AND NOT (id = ANY($2))
            "#,
        )
        .bind(mailbox.id)
        .bind(excluding)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(total.max(0) as u64)
    }

    async fn unique_id(&self, key: MessageKey) -> Result<String> {
        let row: Option<(String,)> = sqlx::query_as("SELECT uidl FROM mails WHERE id = $1")
            .bind(key)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|(uid,)| uid)
            .ok_or_else(|| Error::NotFound(format!("message {}", key)))
    }

    async fn delete_many(&self, keys: &[MessageKey]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            match sqlx::query("DELETE FROM mails WHERE id = $1")
                .bind(key)
                .execute(self.pool.pool())
                .await
            {
                Ok(r) if r.rows_affected() > 0 => removed += 1,
                Ok(_) => warn!(key, "Message vanished before deletion"),
                Err(e) => warn!(key, error = %e, "Failed to delete message"),
            }
        }
        debug!(requested = keys.len(), removed, "Deleted messages");
        Ok(removed)
    }

    async fn release_lock(&self, mailbox: &MailboxHandle) -> Result<()> {
        self.set_locked(mailbox.id, false).await?;
        debug!(mailbox = %mailbox, "Maildrop unlocked");
        Ok(())
    }

    async fn close_session(&self, mailbox: Option<&MailboxHandle>) -> Result<()> {
        // Connections go back to the pool on their own; nothing else is held.
        debug!(mailbox = ?mailbox.map(|m| m.name.as_str()), "Store session closed");
        Ok(())
    }
}

// These run against a live PostgreSQL named by `DATABASE_URL`:
// `cargo test -p maildrop-storage -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_password;
    use maildrop_common::config::DatabaseConfig;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn connect() -> DatabasePool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = DatabaseConfig {
            url: Some(url),
            ..DatabaseConfig::default()
        };
        let pool = DatabasePool::new(&config).await.unwrap();
        pool.migrate().await.unwrap();
        pool
    }

    /// Create a mailbox with a unique name and the given messages
    async fn seed(pool: &DatabasePool, messages: &[&str]) -> (MailboxHandle, Vec<MessageKey>) {
        let name = format!("user-{}", Uuid::new_v4().simple());
        let (id,): (MaildropId,) = sqlx::query_as(
            "INSERT INTO maildrops (username, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(&name)
        .bind(hash_password("secret").unwrap())
        .fetch_one(pool.pool())
        .await
        .unwrap();

        let mut keys = Vec::new();
        for content in messages {
            let (key,): (MessageKey,) = sqlx::query_as(
                "INSERT INTO mails (maildrop_id, content, uidl) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(id)
            .bind(*content)
            .bind(Uuid::new_v4().simple().to_string())
            .fetch_one(pool.pool())
            .await
            .unwrap();
            keys.push(key);
        }
        (MailboxHandle::new(id, name), keys)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_lock_is_exclusive() {
        let pool = connect().await;
        let (mailbox, keys) = seed(&pool, &["A: 1\n\nx\n", "A: 2\n\ny\n"]).await;
        let store = PgMaildropStore::new(pool);

        assert_eq!(
            store.lookup(&mailbox.name).await.unwrap(),
            MailboxLookup::Valid(mailbox.clone())
        );
        assert_eq!(
            store.authenticate(&mailbox, "wrong").await.unwrap(),
            AuthOutcome::Mismatch
        );
        assert_eq!(
            store.authenticate(&mailbox, "secret").await.unwrap(),
            AuthOutcome::Accepted(keys)
        );
        assert_eq!(
            store.authenticate(&mailbox, "secret").await.unwrap(),
            AuthOutcome::Locked
        );
        assert_eq!(
            store.lookup(&mailbox.name).await.unwrap(),
            MailboxLookup::Locked
        );

        store.release_lock(&mailbox).await.unwrap();
        store.release_lock(&mailbox).await.unwrap();
        assert_eq!(
            store.lookup(&mailbox.name).await.unwrap(),
            MailboxLookup::Valid(mailbox)
        );
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_sizes_and_exclusion() {
        let pool = connect().await;
        let (mailbox, keys) = seed(&pool, &["Subject: a\n\nhello\n", "Subject: bb\n\n\u{e9}\n"]).await;
        let store = PgMaildropStore::new(pool);

        let first = "Subject: a\n\nhello\n".len() as u64;
        let second = "Subject: bb\n\n\u{e9}\n".len() as u64;

        assert_eq!(store.size_of(keys[1]).await.unwrap(), second);
        assert_eq!(
            store.size_of_all(&mailbox, &HashSet::new()).await.unwrap(),
            first + second
        );
        let excluding: HashSet<_> = [keys[0]].into_iter().collect();
        assert_eq!(store.size_of_all(&mailbox, &excluding).await.unwrap(), second);
        assert_eq!(
            store.fetch_content(keys[0]).await.unwrap(),
            "Subject: a\n\nhello\n"
        );
        assert!(store.unique_id(keys[0]).await.unwrap().len() == 32);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_delete_many_counts_removed() {
        let pool = connect().await;
        let (mailbox, keys) = seed(&pool, &["A: 1\n\nx\n", "A: 2\n\ny\n"]).await;
        let store = PgMaildropStore::new(pool);

        // The first key goes away before the commit does
        assert_eq!(store.delete_many(&keys[..1]).await.unwrap(), 1);
        assert_eq!(store.delete_many(&keys).await.unwrap(), 1);
        assert_eq!(store.size_of_all(&mailbox, &HashSet::new()).await.unwrap(), 0);
        assert!(store.fetch_content(keys[1]).await.is_err());
    }
}
