//! POP3 Session management
//!
//! Manages the state of a POP3 connection including the accepted mailbox
//! and the message numbering bound at authentication time.

use super::maildrop::Maildrop;
use chrono::{DateTime, Utc};
use maildrop_common::types::{MailboxHandle, MessageKey};
use std::fmt;
use uuid::Uuid;

/// POP3 session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Authorization state (not authenticated)
    Authorization,
    /// Transaction state (authenticated, maildrop locked)
    Transaction,
    /// Update state (during QUIT processing)
    Update,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Authorization => write!(f, "AUTHORIZATION"),
            SessionState::Transaction => write!(f, "TRANSACTION"),
            SessionState::Update => write!(f, "UPDATE"),
        }
    }
}

/// POP3 Session
#[derive(Debug)]
pub struct Pop3Session {
    /// Session ID
    pub id: String,
    /// Current state
    pub state: SessionState,
    /// Mailbox accepted by USER
    pub mailbox: Option<MailboxHandle>,
    /// Message numbering, populated by PASS
    pub maildrop: Maildrop,
    /// Whether the store holds the mailbox lock for this session
    pub locked: bool,
    /// Set once QUIT or a timeout has closed the session
    pub ended: bool,
    /// Session start time
    pub started_at: DateTime<Utc>,
}

impl Pop3Session {
    /// Create a new session
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Authorization,
            mailbox: None,
            maildrop: Maildrop::default(),
            locked: false,
            ended: false,
            started_at: Utc::now(),
        }
    }

    /// Check if in authorization state
    pub fn is_authorization(&self) -> bool {
        matches!(self.state, SessionState::Authorization)
    }

    /// Check if in transaction state
    pub fn is_transaction(&self) -> bool {
        matches!(self.state, SessionState::Transaction)
    }

    /// Remember the mailbox named by USER
    pub fn accept_user(&mut self, mailbox: MailboxHandle) {
        self.mailbox = Some(mailbox);
    }

    /// Enter the transaction state after the store accepted the password
    /// and locked the mailbox
    pub fn authenticate(&mut self, keys: Vec<MessageKey>) {
        self.maildrop = Maildrop::new(keys);
        self.locked = true;
        self.state = SessionState::Transaction;
    }

    /// Enter the update state (QUIT command) and hand back the keys of
    /// every message marked for deletion
    pub fn enter_update(&mut self) -> Vec<MessageKey> {
        self.state = SessionState::Update;
        self.maildrop.marked()
    }

    /// Mark the session closed; the store lock is no longer held
    pub fn end(&mut self) {
        self.locked = false;
        self.ended = true;
    }
}

impl Default for Pop3Session {
    fn default() -> Self {
        Self::new()
    }
}
