//! Mailbox store capability consumed by the POP3 engine

use async_trait::async_trait;
use maildrop_common::types::{MailboxHandle, MessageKey};
use maildrop_common::Result;
use std::collections::HashSet;

/// Outcome of looking a mailbox up by name (`USER`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxLookup {
    /// Mailbox exists and is not locked by another session
    Valid(MailboxHandle),
    /// Mailbox exists but another session holds its lock
    Locked,
    /// No mailbox with that name
    NotFound,
}

/// Outcome of submitting a password (`PASS`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Password accepted, the mailbox is now locked on behalf of the caller.
    /// Carries the mailbox's messages in numbering order.
    Accepted(Vec<MessageKey>),
    /// Password does not match
    Mismatch,
    /// Another session took the lock after lookup
    Locked,
}

/// Persistent mail store with per-mailbox exclusive locking
///
/// One store instance is shared by every connection; per-session state
/// lives in the caller and is passed back through [`MailboxHandle`].
#[async_trait]
pub trait MaildropStore: Send + Sync {
    /// Look a mailbox up by name
    async fn lookup(&self, name: &str) -> Result<MailboxLookup>;

    /// Verify the password and acquire the mailbox lock
    async fn authenticate(&self, mailbox: &MailboxHandle, password: &str) -> Result<AuthOutcome>;

    /// Full stored content of a message
    async fn fetch_content(&self, key: MessageKey) -> Result<String>;

    /// Size of a message in octets
    async fn size_of(&self, key: MessageKey) -> Result<u64>;

    /// Total size in octets of the mailbox, skipping `excluding`
    async fn size_of_all(
        &self,
        mailbox: &MailboxHandle,
        excluding: &HashSet<MessageKey>,
    ) -> Result<u64>;

    /// Stable unique-id of a message
    async fn unique_id(&self, key: MessageKey) -> Result<String>;

    /// Remove messages, returning how many were actually removed.
    ///
    /// Best-effort: a failure on one message does not stop the others.
    async fn delete_many(&self, keys: &[MessageKey]) -> Result<usize>;

    /// Release the mailbox lock. Safe to call when not locked.
    async fn release_lock(&self, mailbox: &MailboxHandle) -> Result<()>;

    /// Close out any store-side state held for a session. Idempotent.
    async fn close_session(&self, mailbox: Option<&MailboxHandle>) -> Result<()>;
}
