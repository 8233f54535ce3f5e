//! Maildrop Core - POP3 protocol engine
//!
//! This crate provides the per-connection POP3 state machine, the
//! session-local message numbering model, reply formatting and the TCP
//! connection driver that feeds them.

pub mod pop3;

pub use pop3::{CommandError, Pop3Interpreter, Pop3Server, SessionState};
