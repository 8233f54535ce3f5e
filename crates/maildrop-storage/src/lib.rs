//! Maildrop Storage - Mailbox store abstraction
//!
//! The protocol engine talks to a [`MaildropStore`]. Two implementations
//! exist: [`PgMaildropStore`] over PostgreSQL and [`MemoryMaildropStore`],
//! an in-process store used by tests and for local experiments.

pub mod db;
pub mod memory;
pub mod password;
pub mod postgres;
pub mod store;

pub use db::DatabasePool;
pub use memory::{CallCounts, MemoryMaildropStore};
pub use postgres::PgMaildropStore;
pub use store::{AuthOutcome, MailboxLookup, MaildropStore};
