//! POP3 Server Module
//!
//! Implements the Post Office Protocol version 3 (POP3) for mail retrieval.

mod command;
mod error;
mod interpreter;
mod maildrop;
mod response;
mod server;
mod session;

pub use command::{Pop3Command, Pop3Parser, Request, Verb};
pub use error::CommandError;
pub use interpreter::Pop3Interpreter;
pub use maildrop::{Maildrop, MarkError};
pub use response::Pop3Response;
pub use server::Pop3Server;
pub use session::{Pop3Session, SessionState};
