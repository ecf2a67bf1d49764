//! Errors raised by the local side of delivery: the queue, the handover
//! between components, and configuration loading.
//!
//! Failures of a delivery attempt itself are not errors here. They are
//! reported as an [`Outcome`](crate::Outcome) and classified by their
//! [`Status`].

use std::{io, path::PathBuf};

use courier_common::{MailError, RemotePart, Status};
use thiserror::Error;

/// The durable queue refused or failed to store a mail.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed. Retrying the same call later may succeed.
    #[error("Queue storage failure: {0}")]
    Storage(String),

    /// The mail can never be queued in its current form.
    #[error("Mail rejected by the queue: {0}")]
    Rejected(Status),
}

impl QueueError {
    /// Status to report to whoever handed over the mail
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Storage(_) => Status::TRANSIENT_LOCAL_ERROR_IN_PROCESSING,
            Self::Rejected(status) => status.clone(),
        }
    }
}

/// A mail could not be handed over to a [`Transmitter`](crate::Transmitter).
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Some per-domain units were already queued when queueing the next one
    /// failed. Those units are not rolled back.
    #[error("Queueing failed after {} unit(s) were queued: {source}", .queued.len())]
    Partial {
        queued: Vec<RemotePart>,
        source: QueueError,
    },

    #[error("Invalid mail: {0}")]
    Mail(#[from] MailError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Invalid configuration syntax: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
