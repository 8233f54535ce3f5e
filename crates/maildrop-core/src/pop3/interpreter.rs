//! POP3 command interpreter
//!
//! Owns one [`Pop3Session`] and turns request lines into reply text,
//! calling into the [`MaildropStore`] as commands require.

use super::command::{Pop3Command, Pop3Parser, Verb};
use super::error::CommandError;
use super::maildrop::MarkError;
use super::response::Pop3Response;
use super::session::{Pop3Session, SessionState};

use maildrop_common::types::MessageKey;
use maildrop_storage::{AuthOutcome, MailboxLookup, MaildropStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-connection POP3 state machine
pub struct Pop3Interpreter {
    session: Pop3Session,
    store: Arc<dyn MaildropStore>,
}

impl Pop3Interpreter {
    /// Create an interpreter in the AUTHORIZATION state
    pub fn new(store: Arc<dyn MaildropStore>) -> Self {
        Self {
            session: Pop3Session::new(),
            store,
        }
    }

    /// Current session
    pub fn session(&self) -> &Pop3Session {
        &self.session
    }

    /// Whether QUIT or a timeout has ended the session
    pub fn is_ended(&self) -> bool {
        self.session.ended
    }

    /// Interpret one request line and return the full reply, CRLF included.
    ///
    /// Every reply except those to LIST, STAT and UIDL ends with the request
    /// line echoed back after a space, errors included.
    pub async fn handle_input(&mut self, input: &str) -> String {
        let response = match self.dispatch(input).await {
            Ok(response) => response,
            Err(e) => {
                debug!(session = %self.session.id, code = e.code(), "Command rejected");
                Pop3Response::err(&e.to_string())
            }
        };

        let keyword = input.split(' ').next().unwrap_or_default().to_uppercase();
        let echo = Pop3Response::echoes(&keyword).then_some(input);
        Pop3Response::finish(response, echo)
    }

    /// Idle-timeout entry point: release the lock without applying any
    /// deletion marks. No reply is produced.
    pub async fn timeout(&mut self) {
        if self.session.ended {
            return;
        }
        warn!(
            session = %self.session.id,
            state = %self.session.state,
            "POP3 session closed without QUIT, discarding deletion marks"
        );
        self.close_out().await;
    }

    async fn dispatch(&mut self, input: &str) -> Result<String, CommandError> {
        let state = self.session.state;
        if state == SessionState::Update {
            return Err(CommandError::UpdateStateLockout);
        }

        let request = Pop3Parser::tokenize(input)?;
        let verb = Verb::from_keyword(&request.keyword)
            .filter(|verb| verb.allowed_in(state))
            .ok_or_else(|| CommandError::InvalidInState {
                command: request.keyword.clone(),
                state,
            })?;

        match verb {
            Verb::User if self.session.mailbox.is_some() => {
                return Err(CommandError::UserAlreadyIssued)
            }
            Verb::Pass if self.session.mailbox.is_none() => return Err(CommandError::NoUserIssued),
            _ => {}
        }

        let command = Pop3Parser::parse(verb, &request.args)?;
        Ok(self.execute(command).await)
    }

    async fn execute(&mut self, command: Pop3Command) -> String {
        match command {
            Pop3Command::User { name } => self.handle_user(&name).await,
            Pop3Command::Pass { password } => self.handle_pass(&password).await,
            Pop3Command::Quit => self.handle_quit().await,
            Pop3Command::Dele { msg } => self.handle_dele(msg),
            Pop3Command::List { msg } => self.handle_list(msg).await,
            Pop3Command::Noop => Pop3Response::ok_simple(),
            Pop3Command::Retr { msg } => self.handle_retr(msg, None).await,
            Pop3Command::Top { msg, lines } => self.handle_retr(msg, Some(lines)).await,
            Pop3Command::Rset => {
                self.session.maildrop.reset();
                Pop3Response::ok_simple()
            }
            Pop3Command::Stat => self.handle_stat().await,
            Pop3Command::Uidl { msg } => self.handle_uidl(msg).await,
        }
    }

    /// Handle USER command
    async fn handle_user(&mut self, name: &str) -> String {
        match self.store.lookup(name).await {
            Ok(MailboxLookup::Valid(mailbox)) => {
                self.session.accept_user(mailbox);
                Pop3Response::ok(&format!("{} is a valid mailbox", name))
            }
            Ok(MailboxLookup::Locked) => {
                Pop3Response::err(&format!("mailbox {} currently locked", name))
            }
            Ok(MailboxLookup::NotFound) => {
                Pop3Response::err(&format!("mailbox {} does not exist", name))
            }
            Err(e) => {
                error!(session = %self.session.id, error = %e, "USER lookup failed");
                Pop3Response::err("USER command failed")
            }
        }
    }

    /// Handle PASS command
    async fn handle_pass(&mut self, password: &str) -> String {
        let Some(mailbox) = self.session.mailbox.clone() else {
            return Pop3Response::err(&CommandError::NoUserIssued.to_string());
        };

        match self.store.authenticate(&mailbox, password).await {
            Ok(AuthOutcome::Accepted(keys)) => {
                info!(
                    session = %self.session.id,
                    mailbox = %mailbox,
                    messages = keys.len(),
                    "POP3 user authenticated"
                );
                self.session.authenticate(keys);
                Pop3Response::ok("maildrop locked and ready")
            }
            Ok(AuthOutcome::Mismatch) => {
                Pop3Response::err(&format!("invalid password for user {}", mailbox))
            }
            Ok(AuthOutcome::Locked) => {
                Pop3Response::err(&format!("mailbox {} currently locked", mailbox))
            }
            Err(e) => {
                error!(session = %self.session.id, error = %e, "PASS authentication failed");
                Pop3Response::err("PASS command failed")
            }
        }
    }

    /// Handle DELE command
    fn handle_dele(&mut self, msg: usize) -> String {
        match self.session.maildrop.mark_deleted(msg) {
            Ok(()) => Pop3Response::ok(&format!("message {} deleted", msg)),
            Err(MarkError::AlreadyDeleted) => {
                Pop3Response::err(&format!("message {} already deleted", msg))
            }
            Err(MarkError::NoSuchMessage) => no_such_message(),
        }
    }

    /// Handle LIST command
    async fn handle_list(&self, msg: Option<usize>) -> String {
        match msg {
            Some(num) => {
                let Some(key) = self.session.maildrop.key(num) else {
                    return no_such_message();
                };
                match self.store.size_of(key).await {
                    Ok(size) => Pop3Response::single(num, size),
                    Err(e) => self.store_failure("LIST", e),
                }
            }
            None => {
                let total = match self.maildrop_octets().await {
                    Ok(total) => total,
                    Err(e) => return self.store_failure("LIST", e),
                };
                let mut sizes = Vec::with_capacity(self.session.maildrop.undeleted());
                for (num, key) in self.session.maildrop.live() {
                    match self.store.size_of(key).await {
                        Ok(size) => sizes.push((num, size)),
                        Err(e) => return self.store_failure("LIST", e),
                    }
                }
                let header = Pop3Response::list_header(self.session.maildrop.undeleted(), total);
                Pop3Response::listing(&header, sizes)
            }
        }
    }

    /// Handle RETR and TOP commands
    async fn handle_retr(&self, msg: usize, lines: Option<usize>) -> String {
        let Some(key) = self.session.maildrop.key(msg) else {
            return no_such_message();
        };
        match self.store.fetch_content(key).await {
            Ok(content) => Pop3Response::message(&content, lines),
            Err(e) => self.store_failure("RETR", e),
        }
    }

    /// Handle STAT command
    async fn handle_stat(&self) -> String {
        match self.maildrop_octets().await {
            Ok(total) => Pop3Response::stat(self.session.maildrop.undeleted(), total),
            Err(e) => self.store_failure("STAT", e),
        }
    }

    /// Handle UIDL command
    async fn handle_uidl(&self, msg: Option<usize>) -> String {
        match msg {
            Some(num) => {
                let Some(key) = self.session.maildrop.key(num) else {
                    return no_such_message();
                };
                match self.store.unique_id(key).await {
                    Ok(uid) => Pop3Response::single(num, uid),
                    Err(e) => self.store_failure("UIDL", e),
                }
            }
            None => {
                let mut uids = Vec::with_capacity(self.session.maildrop.undeleted());
                for (num, key) in self.session.maildrop.live() {
                    match self.store.unique_id(key).await {
                        Ok(uid) => uids.push((num, uid)),
                        Err(e) => return self.store_failure("UIDL", e),
                    }
                }
                Pop3Response::listing(&Pop3Response::ok_simple(), uids)
            }
        }
    }

    /// Handle QUIT command
    async fn handle_quit(&mut self) -> String {
        if self.session.is_authorization() {
            self.close_out().await;
            info!(session = %self.session.id, "POP3 session signed off before login");
            return Pop3Response::ok("POP3 server signing off");
        }

        let marked = self.session.enter_update();
        let left = self.session.maildrop.undeleted();
        let removed = self.apply_deletions(&marked).await;
        self.close_out().await;

        info!(
            session = %self.session.id,
            marked = marked.len(),
            removed,
            left,
            duration_ms = (chrono::Utc::now() - self.session.started_at).num_milliseconds(),
            "POP3 session committed"
        );

        if removed < marked.len() {
            Pop3Response::err(&format!(
                "some deleted messages not removed ({} of {} removed)",
                removed,
                marked.len()
            ))
        } else {
            Pop3Response::ok(&format!(
                "{} messages removed, POP3 server signing off ({} messages left)",
                removed, left
            ))
        }
    }

    async fn apply_deletions(&self, marked: &[MessageKey]) -> usize {
        if marked.is_empty() {
            return 0;
        }
        match self.store.delete_many(marked).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(session = %self.session.id, error = %e, "Failed to remove marked messages");
                0
            }
        }
    }

    /// Release the lock if held and close the store-side session
    async fn close_out(&mut self) {
        let mailbox = self.session.mailbox.clone();
        if self.session.locked {
            if let Some(mailbox) = &mailbox {
                if let Err(e) = self.store.release_lock(mailbox).await {
                    error!(session = %self.session.id, error = %e, "Failed to unlock maildrop");
                }
            }
        }
        if let Err(e) = self.store.close_session(mailbox.as_ref()).await {
            error!(session = %self.session.id, error = %e, "Failed to close store session");
        }
        self.session.end();
    }

    async fn maildrop_octets(&self) -> maildrop_common::Result<u64> {
        match &self.session.mailbox {
            Some(mailbox) => {
                self.store
                    .size_of_all(mailbox, &self.session.maildrop.marked_set())
                    .await
            }
            None => Ok(0),
        }
    }

    fn store_failure(&self, command: &str, e: maildrop_common::Error) -> String {
        error!(session = %self.session.id, command, error = %e, "Store operation failed");
        Pop3Response::err(&format!("{} command failed", command))
    }
}

fn no_such_message() -> String {
    Pop3Response::err("no such message")
}
