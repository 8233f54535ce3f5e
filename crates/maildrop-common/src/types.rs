//! Common types for maildrop

/// Store-assigned identifier of a mailbox
pub type MaildropId = i64;

/// Store-assigned identifier of a single message
///
/// Opaque to the protocol engine, which only maps it to a session-local
/// message number.
pub type MessageKey = i64;

/// Handle to a mailbox that passed `USER` lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxHandle {
    /// Store identifier of the mailbox
    pub id: MaildropId,
    /// Mailbox name as given by the client
    pub name: String,
}

impl MailboxHandle {
    /// Create a new mailbox handle
    pub fn new(id: MaildropId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for MailboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
