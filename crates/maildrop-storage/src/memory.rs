//! In-memory mailbox store
//!
//! Holds everything behind a single mutex. Every trait call is counted so
//! tests can assert which store operations a command triggered.

use crate::store::{AuthOutcome, MailboxLookup, MaildropStore};
use async_trait::async_trait;
use maildrop_common::types::{MailboxHandle, MaildropId, MessageKey};
use maildrop_common::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct MemoryMailbox {
    id: MaildropId,
    password: String,
    locked: bool,
}

#[derive(Debug)]
struct MemoryMessage {
    maildrop_id: MaildropId,
    content: String,
    uid: String,
}

#[derive(Debug, Default)]
struct Inner {
    mailboxes: HashMap<String, MemoryMailbox>,
    messages: BTreeMap<MessageKey, MemoryMessage>,
    undeletable: HashSet<MessageKey>,
    next_maildrop_id: MaildropId,
    next_message_key: MessageKey,
}

#[derive(Debug, Default)]
struct Counters {
    lookup: AtomicUsize,
    authenticate: AtomicUsize,
    fetch_content: AtomicUsize,
    size_of: AtomicUsize,
    size_of_all: AtomicUsize,
    unique_id: AtomicUsize,
    delete_many: AtomicUsize,
    release_lock: AtomicUsize,
    close_session: AtomicUsize,
}

/// Snapshot of how often each store operation ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lookup: usize,
    pub authenticate: usize,
    pub fetch_content: usize,
    pub size_of: usize,
    pub size_of_all: usize,
    pub unique_id: usize,
    pub delete_many: usize,
    pub release_lock: usize,
    pub close_session: usize,
}

impl CallCounts {
    /// Sum over all operations
    pub fn total(&self) -> usize {
        self.lookup
            + self.authenticate
            + self.fetch_content
            + self.size_of
            + self.size_of_all
            + self.unique_id
            + self.delete_many
            + self.release_lock
            + self.close_session
    }
}

/// In-memory [`MaildropStore`]
#[derive(Debug)]
pub struct MemoryMaildropStore {
    inner: Mutex<Inner>,
    counters: Counters,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl MemoryMaildropStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_maildrop_id: 1,
                next_message_key: 1,
                ..Inner::default()
            }),
            counters: Counters::default(),
        }
    }

    /// Create a mailbox with a plaintext password
    pub async fn add_mailbox(&self, name: &str, password: &str) -> MaildropId {
        let mut inner = self.inner.lock().await;
        let id = inner.next_maildrop_id;
        inner.next_maildrop_id += 1;
        inner.mailboxes.insert(
            name.to_string(),
            MemoryMailbox {
                id,
                password: password.to_string(),
                locked: false,
            },
        );
        id
    }

    /// Append a message with a generated key and unique-id
    pub async fn add_message(&self, mailbox: &str, content: &str) -> Result<MessageKey> {
        let uid = Uuid::new_v4().simple().to_string();
        let mut inner = self.inner.lock().await;
        let key = inner.next_message_key;
        inner.insert(mailbox, key, &uid, content)?;
        Ok(key)
    }

    /// Insert a message under an explicit key and unique-id
    pub async fn insert_message(
        &self,
        mailbox: &str,
        key: MessageKey,
        uid: &str,
        content: &str,
    ) -> Result<()> {
        self.inner.lock().await.insert(mailbox, key, uid, content)
    }

    /// Make `delete_many` skip this message, simulating a store fault
    pub async fn fail_deletion_of(&self, key: MessageKey) {
        self.inner.lock().await.undeletable.insert(key);
    }

    /// Whether the named mailbox is currently locked
    pub async fn is_locked(&self, name: &str) -> bool {
        self.inner
            .lock()
            .await
            .mailboxes
            .get(name)
            .map(|m| m.locked)
            .unwrap_or(false)
    }

    /// Whether a message is still stored
    pub async fn contains(&self, key: MessageKey) -> bool {
        self.inner.lock().await.messages.contains_key(&key)
    }

    /// How often each operation has been called so far
    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            lookup: c.lookup.load(Ordering::Relaxed),
            authenticate: c.authenticate.load(Ordering::Relaxed),
            fetch_content: c.fetch_content.load(Ordering::Relaxed),
            size_of: c.size_of.load(Ordering::Relaxed),
            size_of_all: c.size_of_all.load(Ordering::Relaxed),
            unique_id: c.unique_id.load(Ordering::Relaxed),
            delete_many: c.delete_many.load(Ordering::Relaxed),
            release_lock: c.release_lock.load(Ordering::Relaxed),
            close_session: c.close_session.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryMaildropStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn insert(&mut self, mailbox: &str, key: MessageKey, uid: &str, content: &str) -> Result<()> {
        let maildrop_id = self
            .mailboxes
            .get(mailbox)
            .map(|m| m.id)
            .ok_or_else(|| Error::NotFound(format!("mailbox {}", mailbox)))?;
        if self.messages.contains_key(&key) {
            return Err(Error::Validation(format!("message key {} already used", key)));
        }
        self.messages.insert(
            key,
            MemoryMessage {
                maildrop_id,
                content: content.to_string(),
                uid: uid.to_string(),
            },
        );
        self.next_message_key = self.next_message_key.max(key + 1);
        Ok(())
    }

    fn message(&self, key: MessageKey) -> Result<&MemoryMessage> {
        self.messages
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("message {}", key)))
    }
}

#[async_trait]
impl MaildropStore for MemoryMaildropStore {
    async fn lookup(&self, name: &str) -> Result<MailboxLookup> {
        bump(&self.counters.lookup);
        let inner = self.inner.lock().await;
        Ok(match inner.mailboxes.get(name) {
            Some(mailbox) if mailbox.locked => MailboxLookup::Locked,
            Some(mailbox) => MailboxLookup::Valid(MailboxHandle::new(mailbox.id, name)),
            None => MailboxLookup::NotFound,
        })
    }

    async fn authenticate(&self, mailbox: &MailboxHandle, password: &str) -> Result<AuthOutcome> {
        bump(&self.counters.authenticate);
        let mut inner = self.inner.lock().await;
        let record = inner
            .mailboxes
            .get_mut(&mailbox.name)
            .ok_or_else(|| Error::NotFound(format!("mailbox {}", mailbox.name)))?;

        if record.password != password {
            return Ok(AuthOutcome::Mismatch);
        }
        if record.locked {
            return Ok(AuthOutcome::Locked);
        }
        record.locked = true;

        let keys = inner
            .messages
            .iter()
            .filter(|(_, m)| m.maildrop_id == mailbox.id)
            .map(|(key, _)| *key)
            .collect();
        Ok(AuthOutcome::Accepted(keys))
    }

    async fn fetch_content(&self, key: MessageKey) -> Result<String> {
        bump(&self.counters.fetch_content);
        let inner = self.inner.lock().await;
        Ok(inner.message(key)?.content.clone())
    }

    async fn size_of(&self, key: MessageKey) -> Result<u64> {
        bump(&self.counters.size_of);
        let inner = self.inner.lock().await;
        Ok(inner.message(key)?.content.len() as u64)
    }

    async fn size_of_all(
        &self,
        mailbox: &MailboxHandle,
        excluding: &HashSet<MessageKey>,
    ) -> Result<u64> {
        bump(&self.counters.size_of_all);
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .filter(|(key, m)| m.maildrop_id == mailbox.id && !excluding.contains(key))
            .map(|(_, m)| m.content.len() as u64)
            .sum())
    }

    async fn unique_id(&self, key: MessageKey) -> Result<String> {
        bump(&self.counters.unique_id);
        let inner = self.inner.lock().await;
        Ok(inner.message(key)?.uid.clone())
    }

    async fn delete_many(&self, keys: &[MessageKey]) -> Result<usize> {
        bump(&self.counters.delete_many);
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        for key in keys {
            if inner.undeletable.contains(key) {
                warn!(key, "Refusing to delete message");
                continue;
            }
            if inner.messages.remove(key).is_some() {
                removed += 1;
            }
        }
        debug!(requested = keys.len(), removed, "Deleted messages");
        Ok(removed)
    }

    async fn release_lock(&self, mailbox: &MailboxHandle) -> Result<()> {
        bump(&self.counters.release_lock);
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.mailboxes.get_mut(&mailbox.name) {
            record.locked = false;
        }
        Ok(())
    }

    async fn close_session(&self, _mailbox: Option<&MailboxHandle>) -> Result<()> {
        bump(&self.counters.close_session);
        Ok(())
    }
}
