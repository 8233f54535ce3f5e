//! Protocol-level command errors

use super::session::SessionState;
use thiserror::Error;

/// Reasons a command line is rejected before it reaches the maildrop
///
/// The `Display` text is what follows `-ERR ` on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("required arguments missing")]
    MissingArgs,

    #[error("excessive number of arguments")]
    ExcessiveArgs,

    #[error("one or more arguments must be integer values")]
    NonIntegerArg,

    #[error("message number must be greater than zero")]
    NonPositiveMessageNumber,

    #[error("negative line count")]
    NegativeLineCount,

    #[error("command too short")]
    CommandTooShort,

    #[error("command {command} invalid in {state} state")]
    InvalidInState {
        command: String,
        state: SessionState,
    },

    #[error("cannot issue commands in UPDATE state")]
    UpdateStateLockout,

    #[error("USER command already issued")]
    UserAlreadyIssued,

    #[error("no USER command issued")]
    NoUserIssued,
}

impl CommandError {
    /// Symbolic error code
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::MissingArgs => "MISSING_ARGS",
            CommandError::ExcessiveArgs => "EXCESSIVE_ARGS",
            CommandError::NonIntegerArg => "NON_INTEGER_ARG",
            CommandError::NonPositiveMessageNumber => "NONPOSITIVE_MSGNUM",
            CommandError::NegativeLineCount => "NEGATIVE_LINECOUNT",
            CommandError::CommandTooShort => "COMMAND_TOO_SHORT",
            CommandError::InvalidInState { .. } => "INVALID_IN_STATE",
            CommandError::UpdateStateLockout => "UPDATE_STATE_LOCKOUT",
            CommandError::UserAlreadyIssued => "USER_ALREADY_ISSUED",
            CommandError::NoUserIssued => "NO_USER_ISSUED",
        }
    }
}
