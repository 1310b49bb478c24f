//! Protocol vocabulary: commands sent by callers and replies sent by agents.
//!
//! Replies follow a three-shape grammar:
//!
//! ```text
//! 220 <message>                      single-line success
//! 220 DATA / <payload>... / 220 OK   multi-line success
//! 404 <message>                      failure
//! ```

use crate::error::{FnaaError, FnaaResult};

/// Status code for success replies.
pub const STATUS_OK: u16 = 220;
/// Status code for failure replies.
pub const STATUS_FAIL: u16 = 404;

/// Marker opening a multi-line DATA block.
pub const DATA_BEGIN: &str = "220 DATA";
/// Marker closing a multi-line DATA block.
pub const DATA_END: &str = "220 OK";

/// Protocol name advertised in the greeting.
pub const PROTOCOL_NAME: &str = "FNAA";

/// SRV owner-name prefix used when a bare namespace has no SRV record.
pub const SRV_FALLBACK_PREFIX: &str = "fnaa._flow._tcp.";

/// Build the greeting line sent on connect.
pub fn greeting(agent_id: &str) -> String {
    format!("{STATUS_OK} {agent_id} {PROTOCOL_NAME}")
}

/// A parsed command line.
///
/// The keyword is stored lowercased; arguments keep their original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub keyword: String,
    pub raw_line: String,
    pub args: Vec<String>,
}

impl Command {
    /// Parse a command line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next()?.to_ascii_lowercase();
        Some(Self {
            keyword,
            raw_line: line.to_string(),
            args: tokens.map(str::to_string).collect(),
        })
    }

    /// Positional argument, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Positional argument, or a protocol error naming what is missing.
    pub fn require_arg(&self, index: usize, what: &str) -> FnaaResult<&str> {
        self.arg(index)
            .ok_or_else(|| FnaaError::Protocol(format!("Missing {what}")))
    }

    /// Case-insensitive keyword comparison.
    pub fn is(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }
}

/// A reply an agent sends back for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `220 <message>`
    Ok(String),
    /// `220 DATA`, one line per item, `220 OK`
    Data(Vec<String>),
    /// `404 <message>`
    Fail(String),
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Reply::Ok(message.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Reply::Fail(message.into())
    }

    pub fn data<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Reply::Data(items.into_iter().map(Into::into).collect())
    }

    /// Render the reply as wire lines (without terminators).
    pub fn to_lines(&self) -> Vec<String> {
        match self {
            Reply::Ok(message) => vec![format!("{STATUS_OK} {message}")],
            Reply::Fail(message) => vec![format!("{STATUS_FAIL} {message}")],
            Reply::Data(items) => {
                let mut lines = Vec::with_capacity(items.len() + 2);
                lines.push(DATA_BEGIN.to_string());
                lines.extend(items.iter().cloned());
                lines.push(DATA_END.to_string());
                lines
            }
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Reply::Fail(_))
    }
}

/// A reply as seen from the requesting side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code of the first reply line.
    pub status: u16,
    /// Text after the status code of the first (or closing) line.
    pub message: String,
    /// Payload lines of a DATA block; empty for single-line replies.
    pub data: Vec<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Payload lines concatenated in order, as relayed to the original caller.
    pub fn payload(&self) -> String {
        self.data.concat()
    }

    /// Turn a `404` into [`FnaaError::Rejected`].
    pub fn into_result(self) -> FnaaResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FnaaError::Rejected(self.message))
        }
    }
}

/// Status code of a reply line, if it starts with one.
pub fn status_of(line: &str) -> Option<u16> {
    line.split_whitespace().next()?.parse().ok()
}

/// Text after the status code of a reply line.
pub fn message_of(line: &str) -> &str {
    line.trim_start()
        .split_once(' ')
        .map(|(_, rest)| rest.trim())
        .unwrap_or("")
}
