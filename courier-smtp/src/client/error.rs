//! Error types for the SMTP client.

use std::io;

use courier_common::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No complete reply, or no progress writing, within the stage's limit
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The server answered with a 4xx or 5xx reply.
    #[error("SMTP error: {code} {}", .lines.join(" "))]
    Rejected { code: u16, lines: Vec<String> },

    /// A well-formed reply of a class the current stage does not allow,
    /// e.g. `354` in answer to `MAIL FROM`
    #[error("Unexpected SMTP reply: {code} {message}")]
    UnexpectedResponse { code: u16, message: String },

    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// `true` when the remote server made a decision, as opposed to the
    /// session breaking down.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Classifies the error. A rejection keeps the server's own reply,
    /// everything else is a transient connection problem.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Rejected { code, lines } => Status::from_reply(*code, lines),
            _ => Status::NO_ANSWER_FROM_HOST,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
