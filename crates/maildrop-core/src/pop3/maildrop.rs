//! Session-local message numbering with soft deletion
//!
//! Message numbers are 1-based and fixed for the life of a session.
//! Deleting only sets a mark; the store is not touched until QUIT.

use maildrop_common::types::MessageKey;
use std::collections::HashSet;

/// Why a message could not be marked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkError {
    NoSuchMessage,
    AlreadyDeleted,
}

/// Messages of the locked mailbox, in the order the store listed them
#[derive(Debug, Clone, Default)]
pub struct Maildrop {
    keys: Vec<MessageKey>,
    deleted: Vec<bool>,
    undeleted: usize,
}

impl Maildrop {
    pub fn new(keys: Vec<MessageKey>) -> Self {
        let count = keys.len();
        Self {
            keys,
            deleted: vec![false; count],
            undeleted: count,
        }
    }

    /// Number of messages, marked or not
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of messages not marked for deletion
    pub fn undeleted(&self) -> usize {
        self.undeleted
    }

    fn index(&self, msg: usize) -> Option<usize> {
        let idx = msg.checked_sub(1)?;
        (idx < self.keys.len()).then_some(idx)
    }

    /// Store key of an addressable message (exists and not marked)
    pub fn key(&self, msg: usize) -> Option<MessageKey> {
        let idx = self.index(msg)?;
        (!self.deleted[idx]).then(|| self.keys[idx])
    }

    /// Mark a message for deletion
    pub fn mark_deleted(&mut self, msg: usize) -> Result<(), MarkError> {
        let idx = self.index(msg).ok_or(MarkError::NoSuchMessage)?;
        if self.deleted[idx] {
            return Err(MarkError::AlreadyDeleted);
        }
        self.deleted[idx] = true;
        self.undeleted -= 1;
        Ok(())
    }

    /// Clear every deletion mark (RSET)
    pub fn reset(&mut self) {
        self.deleted.iter_mut().for_each(|d| *d = false);
        self.undeleted = self.keys.len();
    }

    /// Unmarked messages as (message number, key), ascending
    pub fn live(&self) -> impl Iterator<Item = (usize, MessageKey)> + '_ {
        self.keys
            .iter()
            .zip(&self.deleted)
            .enumerate()
            .filter(|(_, (_, deleted))| !**deleted)
            .map(|(idx, (key, _))| (idx + 1, *key))
    }

    /// Keys of marked messages, ascending by message number
    pub fn marked(&self) -> Vec<MessageKey> {
        self.keys
            .iter()
            .zip(&self.deleted)
            .filter(|(_, deleted)| **deleted)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Keys of marked messages as a set, for size queries
    pub fn marked_set(&self) -> HashSet<MessageKey> {
        self.marked().into_iter().collect()
    }
}
