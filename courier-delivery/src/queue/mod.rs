//! Handing mail over to the durable queue

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{Mail, Recipient, RemotePart, Status};
use tracing::{debug, instrument, warn};

pub use memory::MemoryQueue;

use crate::{QueueError, TransmitError};

/// Durable storage for units awaiting an attempt.
#[async_trait]
pub trait MailQueue: Send + Sync {
    /// Stores `mail` until its schedule comes due.
    ///
    /// # Errors
    ///
    /// Fails if the mail could not be stored. Nothing is stored in that case.
    async fn add(&self, mail: Mail) -> Result<(), QueueError>;
}

/// A queue that can also hand out the units that are due.
#[async_trait]
pub trait ScheduledQueue: MailQueue {
    /// Waits until some unit is due and takes it out of the queue.
    async fn wait_for_work(&self) -> Mail;
}

/// Accepts mail for eventual delivery.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// # Errors
    ///
    /// Fails if the mail, or part of it, could not be accepted.
    async fn transmit(&self, mail: Mail) -> Result<(), TransmitError>;
}

/// Entry point of the engine: queues one unit per destination.
///
/// When the sender in use can only deliver to one domain at a time, each
/// distinct remote part gets its own copy of the mail holding just its
/// recipients. Otherwise the mail is queued whole.
#[derive(Clone)]
pub struct QueuingTransmitter {
    queue: Arc<dyn MailQueue>,
    single_domain_only: bool,
}

impl std::fmt::Debug for QueuingTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuingTransmitter")
            .field("single_domain_only", &self.single_domain_only)
            .finish_non_exhaustive()
    }
}

impl QueuingTransmitter {
    #[must_use]
    pub fn new(queue: Arc<dyn MailQueue>, single_domain_only: bool) -> Self {
        Self {
            queue,
            single_domain_only,
        }
    }
}

#[async_trait]
impl Transmitter for QueuingTransmitter {
    #[instrument(skip_all, fields(mail = %mail.id))]
    async fn transmit(&self, mail: Mail) -> Result<(), TransmitError> {
        let groups = group_by_remote_part(mail.recipients())?;

        if !self.single_domain_only || groups.len() == 1 {
            debug!(recipients = mail.recipients().len(), "Queueing as a single unit");
            return Ok(self.queue.add(mail).await?);
        }

        let mut queued = Vec::with_capacity(groups.len());
        for (remote_part, recipients) in groups {
            let unit = mail.with_recipients(recipients)?;
            debug!(unit = %unit.id, domain = %remote_part, "Queueing unit");

            if let Err(source) = self.queue.add(unit).await {
                warn!(domain = %remote_part, queued = queued.len(), error = %source, "Queueing failed");
                return Err(if queued.is_empty() {
                    TransmitError::Queue(source)
                } else {
                    TransmitError::Partial { queued, source }
                });
            }

            queued.push(remote_part);
        }

        Ok(())
    }
}

/// Recipients grouped by remote part, groups in order of first appearance.
///
/// # Errors
///
/// The global `Postmaster` has no remote part to route to, so a mail
/// addressed to it is refused as a whole.
pub fn group_by_remote_part(
    recipients: &[Recipient],
) -> Result<Vec<(RemotePart, Vec<Recipient>)>, QueueError> {
    let mut groups: Vec<(RemotePart, Vec<Recipient>)> = Vec::new();

    for recipient in recipients {
        let Some(remote_part) = recipient.remote_part() else {
            return Err(QueueError::Rejected(
                Status::INCORRECT_CONFIGURATION
                    .with_message("Postmaster cannot be relayed to a remote domain"),
            ));
        };

        match groups.iter_mut().find(|(part, _)| part == remote_part) {
            Some((_, members)) => members.push(recipient.clone()),
            None => groups.push((remote_part.clone(), vec![recipient.clone()])),
        }
    }

    Ok(groups)
}
