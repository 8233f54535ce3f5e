//! POP3 Response generation
//!
//! Builders return reply text without the final CRLF. [`Pop3Response::finish`]
//! appends the echoed request where applicable and terminates the reply.

const CRLF: &str = "\r\n";

/// POP3 Response builder
pub struct Pop3Response;

impl Pop3Response {
    /// Server greeting
    pub fn greeting(server_name: &str) -> String {
        format!("+OK {} POP3 server ready\r\n", server_name)
    }

    /// Positive response
    pub fn ok(message: &str) -> String {
        format!("+OK {}", message)
    }

    /// Positive response with no message
    pub fn ok_simple() -> String {
        "+OK".to_string()
    }

    /// Negative response
    pub fn err(message: &str) -> String {
        format!("-ERR {}", message)
    }

    /// STAT response
    pub fn stat(count: usize, size: u64) -> String {
        format!("+OK {} {}", count, size)
    }

    /// Single-message LIST or UIDL response
    pub fn single(msg: usize, value: impl std::fmt::Display) -> String {
        format!("+OK {} {}", msg, value)
    }

    /// Multi-line LIST or UIDL response: status line, one line per entry,
    /// terminator
    pub fn listing<T: std::fmt::Display>(
        status: &str,
        entries: impl IntoIterator<Item = (usize, T)>,
    ) -> String {
        let mut response = String::from(status);
        response.push_str(CRLF);
        for (msg, value) in entries {
            response.push_str(&format!("{} {}{}", msg, value, CRLF));
        }
        response.push('.');
        response
    }

    /// LIST status line
    pub fn list_header(count: usize, size: u64) -> String {
        format!("+OK {} messages ({} octets)", count, size)
    }

    /// RETR/TOP response: header block, blank line, body (all of it, or
    /// the first `max_lines` lines), terminator. Every line is byte-stuffed.
    pub fn message(content: &str, max_lines: Option<usize>) -> String {
        let (header, body) = split_message(content);
        let body_lines = max_lines.unwrap_or(usize::MAX);

        let mut response = Self::ok_simple();
        response.push_str(CRLF);
        for line in header {
            response.push_str(&Self::byte_stuff_line(line));
            response.push_str(CRLF);
        }
        response.push_str(CRLF);
        for line in body.into_iter().take(body_lines) {
            response.push_str(&Self::byte_stuff_line(line));
            response.push_str(CRLF);
        }
        response.push('.');
        response
    }

    /// Byte-stuff a line (add leading dot if line starts with dot)
    pub fn byte_stuff_line(line: &str) -> String {
        if line.starts_with('.') {
            format!(".{}", line)
        } else {
            line.to_string()
        }
    }

    /// Whether replies to `keyword` carry the echoed request line
    pub fn echoes(keyword: &str) -> bool {
        !matches!(keyword, "LIST" | "STAT" | "UIDL")
    }

    /// Append the echoed request (when given) and the final CRLF
    pub fn finish(mut response: String, echo: Option<&str>) -> String {
        if let Some(request) = echo {
            response.push(' ');
            response.push_str(request);
        }
        response.push_str(CRLF);
        response
    }
}

/// Split stored content at the first empty line into header lines and
/// body lines. Content without an empty line is all header.
pub fn split_message(content: &str) -> (Vec<&str>, Vec<&str>) {
    let mut lines = content.lines();
    let header = lines.by_ref().take_while(|line| !line.is_empty()).collect();
    let body = lines.collect();
    (header, body)
}
