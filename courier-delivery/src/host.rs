//! One delivery attempt to one host over one connection.

use std::sync::Arc;

use courier_common::{Mail, RemoteMta, Status};
use courier_smtp::{ClientError, SmtpClient};
use tracing::{debug, instrument};

use crate::{ConnectionAdmissionController, LogIdFactory, Outcome, RecipientRejection, SendFailure};

/// Runs the SMTP transaction for a unit against the host a client is bound
/// to, under per-address admission control.
#[derive(Debug, Clone)]
pub struct HostTransmitter {
    admission: Arc<ConnectionAdmissionController>,
    log_ids: LogIdFactory,
}

impl HostTransmitter {
    #[must_use]
    pub const fn new(admission: Arc<ConnectionAdmissionController>, log_ids: LogIdFactory) -> Self {
        Self { admission, log_ids }
    }

    #[must_use]
    pub fn admission(&self) -> &ConnectionAdmissionController {
        &self.admission
    }

    /// Transmits `mail` through `client`.
    ///
    /// Recipients the host refuses are collected rather than aborting the
    /// transaction, and the content goes to the ones it accepted. Once
    /// admission succeeds the session is always closed and the slot
    /// released, whatever the outcome.
    #[instrument(skip_all, fields(mail = %mail.id, host = %client.remote_mta()))]
    pub async fn transmit(&self, mail: &Mail, mut client: Box<dyn SmtpClient>) -> Outcome {
        let remote = client.remote_mta().clone();

        let Some(address) = remote.address() else {
            return Outcome::Failed(
                SendFailure::new(Status::PERMANENT_INTERNAL_ERROR)
                    .with_remote_mta(Some(remote))
                    .with_detail("Remote MTA has no resolved address"),
            );
        };

        if let Err(postpone) = self.admission.admit(address) {
            return Outcome::Postponed(postpone.with_remote_mta(remote));
        }

        let outcome = self.session(mail, client.as_mut(), &remote).await;

        if let Err(error) = client.quit().await {
            debug!(%error, "Closing the session failed");
        }
        self.admission.release(address);

        outcome
    }

    async fn session(
        &self,
        mail: &Mail,
        client: &mut dyn SmtpClient,
        remote: &RemoteMta,
    ) -> Outcome {
        if let Err(error) = client.connect().await {
            return failed(&error, remote);
        }

        if let Err(error) = client.mail_from(&mail.from.smtp_text()).await {
            return failed(&error, remote);
        }

        let mut rejections = Vec::new();
        let mut accepted = Vec::new();

        for recipient in mail.recipients() {
            match client.rcpt_to(&recipient.smtp_text()).await {
                Ok(()) => accepted.push(recipient.clone()),
                Err(error) if error.is_rejection() => {
                    let log_id = self.log_ids.next();
                    debug!(
                        %recipient,
                        log_id = %log_id,
                        %error,
                        "Recipient was rejected, continuing with the next one"
                    );

                    let failure =
                        SendFailure::from_client_error(&error, remote.clone()).with_log_id(log_id);
                    rejections.push(RecipientRejection::new(recipient.clone(), failure));
                }
                Err(error) => return failed(&error, remote),
            }
        }

        if accepted.is_empty() {
            debug!(rejected = rejections.len(), "All recipients were rejected");
            return Outcome::PartiallyRejected {
                rejections,
                accepted,
            };
        }

        if let Err(error) = transfer_content(mail, client).await {
            return failed(&error, remote);
        }

        if rejections.is_empty() {
            debug!(recipients = accepted.len(), "Mail accepted by remote host");
            Outcome::Delivered
        } else {
            debug!(
                accepted = accepted.len(),
                rejected = rejections.len(),
                "Mail accepted for some recipients only"
            );
            Outcome::PartiallyRejected {
                rejections,
                accepted,
            }
        }
    }
}

async fn transfer_content(mail: &Mail, client: &mut dyn SmtpClient) -> Result<(), ClientError> {
    client.data_start().await?;
    client.data_write(mail.data.as_bytes()).await?;
    client.data_end().await
}

fn failed(error: &ClientError, remote: &RemoteMta) -> Outcome {
    let failure = SendFailure::from_client_error(error, remote.clone());
    debug!(%failure, "Transaction failed");
    Outcome::Failed(failure)
}
