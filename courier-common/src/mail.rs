//! The unit of work handed between the queue and delivery workers.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Recipient, ReversePath};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    #[error("Mail must have at least one recipient")]
    NoRecipients,

    #[error("Mail has a null reverse-path")]
    NullReversePath,
}

/// Identifier of one queued mail unit.
///
/// ULIDs sort by creation time, which keeps log output and queue listings in
/// arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailId(ulid::Ulid);

impl MailId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message content. Cloning shares the underlying bytes, so the content can be
/// handed to several per-domain copies and read once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailData(Arc<[u8]>);

impl MailData {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The header section, up to but excluding the blank line that ends it
    #[must_use]
    pub fn headers(&self) -> &[u8] {
        let end = self
            .0
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(self.0.len(), |pos| pos + 2);

        &self.0[..end]
    }
}

impl From<Vec<u8>> for MailData {
    fn from(value: Vec<u8>) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&[u8]> for MailData {
    fn from(value: &[u8]) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for MailData {
    fn from(value: &str) -> Self {
        Self(Arc::from(value.as_bytes()))
    }
}

impl From<String> for MailData {
    fn from(value: String) -> Self {
        Self::from(value.into_bytes())
    }
}

/// An envelope plus content, as accepted for outbound transmission.
#[derive(Debug, Clone)]
pub struct Mail {
    pub id: MailId,
    pub from: ReversePath,
    recipients: Vec<Recipient>,
    pub data: MailData,
    pub arrival: DateTime<Utc>,
    /// Name the submitting client announced itself with, if any
    pub received_from: Option<String>,
    /// Earliest time the next attempt may start
    pub schedule: DateTime<Utc>,
    /// Whole-mail transmission attempts that ended in a failure
    pub delivery_attempts: u32,
    /// Consecutive attempts postponed by local admission control
    pub postpones: u32,
}

impl Mail {
    /// Creates a mail ready for immediate transmission. Duplicate recipients
    /// are dropped, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::NoRecipients`] if `recipients` is empty.
    pub fn new(
        from: ReversePath,
        recipients: impl IntoIterator<Item = Recipient>,
        data: impl Into<MailData>,
    ) -> Result<Self, MailError> {
        let now = Utc::now();

        Ok(Self {
            id: MailId::generate(),
            from,
            recipients: unique(recipients)?,
            data: data.into(),
            arrival: now,
            received_from: None,
            schedule: now,
            delivery_attempts: 0,
            postpones: 0,
        })
    }

    #[must_use]
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// A copy of this mail, with its own id, addressed only to `recipients`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::NoRecipients`] if `recipients` is empty.
    pub fn with_recipients(
        &self,
        recipients: impl IntoIterator<Item = Recipient>,
    ) -> Result<Self, MailError> {
        Ok(Self {
            id: MailId::generate(),
            recipients: unique(recipients)?,
            ..self.clone()
        })
    }

    /// Narrows the recipient list of this unit, keeping its id.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::NoRecipients`] if `recipients` is empty, in which
    /// case the mail is left unchanged.
    pub fn replace_recipients(
        &mut self,
        recipients: impl IntoIterator<Item = Recipient>,
    ) -> Result<(), MailError> {
        self.recipients = unique(recipients)?;
        Ok(())
    }
}

impl Display for Mail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} to {} recipient(s)",
            self.id,
            self.from,
            self.recipients.len()
        )
    }
}

fn unique(recipients: impl IntoIterator<Item = Recipient>) -> Result<Vec<Recipient>, MailError> {
    let mut result: Vec<Recipient> = Vec::new();
    for recipient in recipients {
        if !result.contains(&recipient) {
            result.push(recipient);
        }
    }

    if result.is_empty() {
        Err(MailError::NoRecipients)
    } else {
        Ok(result)
    }
}
