//! Results of a delivery attempt

use std::{
    fmt::{self, Display},
    time::Duration,
};

use chrono::{DateTime, Utc};
use courier_common::{Recipient, RemoteMta, Status};
use courier_smtp::ClientError;

/// How one delivery attempt of one unit ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every recipient was accepted and the content was transferred.
    Delivered,

    /// The remote server refused some recipients at the RCPT stage. When
    /// `accepted` is empty no content was transferred at all.
    PartiallyRejected {
        rejections: Vec<RecipientRejection>,
        accepted: Vec<Recipient>,
    },

    /// The attempt failed as a whole.
    Failed(SendFailure),

    /// Local admission control refused every candidate host, so nothing was
    /// attempted.
    Postponed(Postpone),
}

impl Outcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// A whole-attempt failure, classified by its status.
#[derive(Debug, Clone, PartialEq)]
pub struct SendFailure {
    pub status: Status,
    pub remote_mta: Option<RemoteMta>,
    /// The remote server's own reply, when it refused something
    pub remote_status: Option<Status>,
    pub log_id: Option<String>,
    pub failed_at: DateTime<Utc>,
    /// Local explanation, e.g. the underlying I/O error
    pub detail: Option<String>,
}

impl SendFailure {
    #[must_use]
    pub fn new(status: Status) -> Self {
        Self {
            status,
            remote_mta: None,
            remote_status: None,
            log_id: None,
            failed_at: Utc::now(),
            detail: None,
        }
    }

    /// Classifies an error of the SMTP session with `remote`.
    #[must_use]
    pub fn from_client_error(error: &ClientError, remote: RemoteMta) -> Self {
        let status = error.status();
        let remote_status = error.is_rejection().then(|| status.clone());

        Self {
            remote_mta: Some(remote),
            remote_status,
            detail: Some(error.to_string()),
            ..Self::new(status)
        }
    }

    #[must_use]
    pub fn with_remote_mta(mut self, remote: Option<RemoteMta>) -> Self {
        self.remote_mta = remote;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = Some(log_id.into());
        self
    }

    /// Assigns a log id unless one was assigned where the failure occurred.
    /// Returns the id in effect.
    pub fn init_log_id(&mut self, log_id: impl FnOnce() -> String) -> &str {
        self.log_id.get_or_insert_with(log_id)
    }

    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.status.should_retry()
    }
}

impl Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;

        if let Some(remote) = &self.remote_mta {
            write!(f, " [{remote}]")?;
        }

        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }

        Ok(())
    }
}

/// Delivery was deferred before any connection was made.
///
/// This is not a failure of the remote side and does not count as a
/// delivery attempt on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Postpone {
    pub delay_secs: u32,
    pub status: Status,
    pub remote_mta: Option<RemoteMta>,
}

impl Postpone {
    #[must_use]
    pub const fn new(delay_secs: u32, status: Status) -> Self {
        Self {
            delay_secs,
            status,
            remote_mta: None,
        }
    }

    #[must_use]
    pub fn with_remote_mta(mut self, remote: RemoteMta) -> Self {
        self.remote_mta = Some(remote);
        self
    }

    /// Recommended wait before the next attempt
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_secs))
    }
}

impl Display for Postpone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, retry in {}s", self.status, self.delay_secs)?;

        if let Some(remote) = &self.remote_mta {
            write!(f, " [{remote}]")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipientRejection {
    pub recipient: Recipient,
    pub failure: SendFailure,
}

impl RecipientRejection {
    #[must_use]
    pub const fn new(recipient: Recipient, failure: SendFailure) -> Self {
        Self { recipient, failure }
    }
}
