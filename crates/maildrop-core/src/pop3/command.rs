//! POP3 Command definitions
//!
//! Splits a request line into keyword and arguments and validates the
//! arguments of each command. Checks run in a fixed order: arity, then
//! integer parsing, then message number range, then line count range.

use super::error::CommandError;
use super::session::SessionState;

/// A request line split on single spaces
///
/// Splitting does not collapse runs of spaces, so `"DELE  1"` carries an
/// empty first argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// Upper-cased command keyword
    pub keyword: String,
    /// Arguments after the keyword
    pub args: Vec<&'a str>,
}

/// Command keywords the server knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    User,
    Pass,
    Quit,
    Dele,
    List,
    Noop,
    Retr,
    Top,
    Rset,
    Stat,
    Uidl,
}

impl Verb {
    /// Look up an upper-cased keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "USER" => Verb::User,
            "PASS" => Verb::Pass,
            "QUIT" => Verb::Quit,
            "DELE" => Verb::Dele,
            "LIST" => Verb::List,
            "NOOP" => Verb::Noop,
            "RETR" => Verb::Retr,
            "TOP" => Verb::Top,
            "RSET" => Verb::Rset,
            "STAT" => Verb::Stat,
            "UIDL" => Verb::Uidl,
            _ => return None,
        })
    }

    /// Whether the command may be issued in `state`
    pub fn allowed_in(self, state: SessionState) -> bool {
        match state {
            SessionState::Authorization => {
                matches!(self, Verb::User | Verb::Pass | Verb::Quit)
            }
            SessionState::Transaction => !matches!(self, Verb::User | Verb::Pass),
            SessionState::Update => false,
        }
    }
}

/// POP3 Command with validated arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop3Command {
    // Authorization state commands
    /// USER name - Identify mailbox
    User { name: String },
    /// PASS password - Provide password; may contain spaces
    Pass { password: String },

    // Transaction state commands
    /// DELE msg - Mark message for deletion
    Dele { msg: usize },
    /// LIST [msg] - List messages
    List { msg: Option<usize> },
    /// NOOP - No operation
    Noop,
    /// RETR msg - Retrieve message
    Retr { msg: usize },
    /// TOP msg n - Get message headers and first n body lines
    Top { msg: usize, lines: usize },
    /// RSET - Reset (unmark all deletions)
    Rset,
    /// STAT - Get mailbox status
    Stat,
    /// UIDL [msg] - Get unique ID listing
    Uidl { msg: Option<usize> },

    // Any state commands
    /// QUIT - End session
    Quit,
}

/// POP3 Command Parser
pub struct Pop3Parser;

impl Pop3Parser {
    /// Split a request line into keyword and arguments
    pub fn tokenize(line: &str) -> Result<Request<'_>, CommandError> {
        let mut parts = line.split(' ');
        let keyword = parts.next().unwrap_or_default().to_uppercase();
        if keyword.is_empty() {
            return Err(CommandError::CommandTooShort);
        }
        Ok(Request {
            keyword,
            args: parts.collect(),
        })
    }

    /// Validate the arguments of `verb`
    pub fn parse(verb: Verb, args: &[&str]) -> Result<Pop3Command, CommandError> {
        match verb {
            Verb::User => {
                arity(args, 1, 1)?;
                Ok(Pop3Command::User {
                    name: args[0].to_string(),
                })
            }
            Verb::Pass => {
                arity(args, 1, usize::MAX)?;
                Ok(Pop3Command::Pass {
                    password: args.join(" "),
                })
            }
            Verb::Quit => no_args(args, Pop3Command::Quit),
            Verb::Noop => no_args(args, Pop3Command::Noop),
            Verb::Rset => no_args(args, Pop3Command::Rset),
            Verb::Stat => no_args(args, Pop3Command::Stat),
            Verb::Dele => {
                arity(args, 1, 1)?;
                let msg = message_number(integer(args[0])?)?;
                Ok(Pop3Command::Dele { msg })
            }
            Verb::Retr => {
                arity(args, 1, 1)?;
                let msg = message_number(integer(args[0])?)?;
                Ok(Pop3Command::Retr { msg })
            }
            Verb::List => {
                arity(args, 0, 1)?;
                let msg = optional_message_number(args)?;
                Ok(Pop3Command::List { msg })
            }
            Verb::Uidl => {
                arity(args, 0, 1)?;
                let msg = optional_message_number(args)?;
                Ok(Pop3Command::Uidl { msg })
            }
            Verb::Top => {
                arity(args, 2, 2)?;
                let msg = integer(args[0])?;
                let lines = integer(args[1])?;
                let msg = message_number(msg)?;
                if lines < 0 {
                    return Err(CommandError::NegativeLineCount);
                }
                Ok(Pop3Command::Top {
                    msg,
                    lines: usize::try_from(lines).unwrap_or(usize::MAX),
                })
            }
        }
    }
}

fn arity(args: &[&str], min: usize, max: usize) -> Result<(), CommandError> {
    if args.len() < min {
        Err(CommandError::MissingArgs)
    } else if args.len() > max {
        Err(CommandError::ExcessiveArgs)
    } else {
        Ok(())
    }
}

fn no_args(args: &[&str], command: Pop3Command) -> Result<Pop3Command, CommandError> {
    arity(args, 0, 0)?;
    Ok(command)
}

fn integer(arg: &str) -> Result<i64, CommandError> {
    arg.parse().map_err(|_| CommandError::NonIntegerArg)
}

fn message_number(n: i64) -> Result<usize, CommandError> {
    if n < 1 {
        return Err(CommandError::NonPositiveMessageNumber);
    }
    // Anything beyond usize cannot name a real message anyway.
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

fn optional_message_number(args: &[&str]) -> Result<Option<usize>, CommandError> {
    args.first()
        .map(|arg| integer(arg).and_then(message_number))
        .transpose()
}
