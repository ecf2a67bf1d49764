//! What happens to a unit after an unsuccessful attempt
//!
//! Every recipient of a failed attempt ends up in one of two places: back in
//! the queue for another attempt, or in a DSN to the original sender. Which
//! one depends on the failure's status and on how many attempts the unit has
//! used. Recipients still being retried may also be reported as delayed.

mod retry;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use courier_common::{Mail, Recipient};
use tracing::{debug, error, info, instrument, warn};

pub use retry::RetryConfig;

use crate::{
    Action, BounceComposer, Postpone, RecipientProblemReport, RecipientRejection, SendFailure,
    TransmitError, Transmitter,
};

#[derive(Clone)]
pub struct RetryPolicy {
    config: Arc<RetryConfig>,
    composer: Arc<dyn BounceComposer>,
    dsn_transmitter: Arc<dyn Transmitter>,
    retry_transmitter: Arc<dyn Transmitter>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Where each recipient of a failed attempt goes next.
#[derive(Debug, Default)]
struct Disposition {
    retry: Vec<Recipient>,
    reports: Vec<RecipientProblemReport>,
}

impl RetryPolicy {
    /// `retry_transmitter` takes rescheduled units back into the queue,
    /// `dsn_transmitter` takes the notifications built by `composer`.
    #[must_use]
    pub fn new(
        config: RetryConfig,
        composer: Arc<dyn BounceComposer>,
        dsn_transmitter: Arc<dyn Transmitter>,
        retry_transmitter: Arc<dyn Transmitter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            composer,
            dsn_transmitter,
            retry_transmitter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The attempt failed for every recipient of `mail` alike.
    ///
    /// # Errors
    ///
    /// Fails if the unit could not be handed back to the queue. A DSN that
    /// cannot be sent is logged and dropped instead.
    #[instrument(skip_all, fields(mail = %mail.id, status = %failure.status))]
    pub async fn act_on_entire_mail_failure(
        &self,
        mail: Mail,
        failure: SendFailure,
    ) -> Result<(), TransmitError> {
        let rejections = mail
            .recipients()
            .iter()
            .map(|recipient| RecipientRejection::new(recipient.clone(), failure.clone()))
            .collect();

        self.act_on_failures(mail, rejections).await
    }

    /// Some recipients were refused at the RCPT stage. Accepted recipients
    /// are done with and must not be part of `rejections`.
    ///
    /// # Errors
    ///
    /// Fails if the remaining recipients could not be handed back to the
    /// queue.
    #[instrument(skip_all, fields(mail = %mail.id, rejected = rejections.len()))]
    pub async fn act_on_recipients_were_rejected(
        &self,
        mail: Mail,
        rejections: Vec<RecipientRejection>,
    ) -> Result<(), TransmitError> {
        self.act_on_failures(mail, rejections).await
    }

    /// Local admission control kept every candidate host busy.
    ///
    /// A postponement does not use up an attempt. Once `max_postpones` are
    /// exceeded in a row, it is treated as an ordinary transient failure.
    ///
    /// # Errors
    ///
    /// Fails if the unit could not be handed back to the queue.
    #[instrument(skip_all, fields(mail = %mail.id, postpones = mail.postpones))]
    pub async fn act_on_postpone_required(
        &self,
        mut mail: Mail,
        postpone: Postpone,
    ) -> Result<(), TransmitError> {
        mail.postpones = mail.postpones.saturating_add(1);

        if mail.postpones > self.config.max_postpones {
            warn!(%postpone, postpones = mail.postpones, "Postponed too often, counting as a failure");

            let failure = SendFailure::new(postpone.status.clone())
                .with_remote_mta(postpone.remote_mta.clone())
                .with_detail(format!("Postponed {} times in a row", mail.postpones));
            return self.act_on_entire_mail_failure(mail, failure).await;
        }

        mail.schedule = after(postpone.delay());
        debug!(schedule = %mail.schedule, "Postponing");

        self.retry_transmitter.transmit(mail).await
    }

    async fn act_on_failures(
        &self,
        mut mail: Mail,
        rejections: Vec<RecipientRejection>,
    ) -> Result<(), TransmitError> {
        mail.postpones = 0;
        mail.delivery_attempts = mail.delivery_attempts.saturating_add(1);

        let disposition = self.dispose(mail.delivery_attempts, rejections);

        self.send_dsn(&mail, &disposition.reports).await;

        if disposition.retry.is_empty() {
            debug!(attempts = mail.delivery_attempts, "Nothing left to retry");
            return Ok(());
        }

        let period = self.config.retry_period(mail.delivery_attempts);
        mail.replace_recipients(disposition.retry)?;
        mail.schedule = after(period);

        info!(
            attempts = mail.delivery_attempts,
            recipients = mail.recipients().len(),
            schedule = %mail.schedule,
            "Rescheduling"
        );

        self.retry_transmitter.transmit(mail).await
    }

    fn dispose(&self, attempts: u32, rejections: Vec<RecipientRejection>) -> Disposition {
        let exhausted = self.config.is_exhausted(attempts);
        let delay_report = self.config.is_delay_report_point(attempts);

        let mut disposition = Disposition::default();
        for RecipientRejection { recipient, failure } in rejections {
            if failure.should_retry() && !exhausted {
                if delay_report {
                    disposition.reports.push(RecipientProblemReport::new(
                        recipient.clone(),
                        &failure,
                        Action::Delayed,
                    ));
                }
                disposition.retry.push(recipient);
            } else {
                disposition
                    .reports
                    .push(RecipientProblemReport::new(recipient, &failure, Action::Failed));
            }
        }

        disposition
    }

    async fn send_dsn(&self, mail: &Mail, reports: &[RecipientProblemReport]) {
        if reports.is_empty() {
            return;
        }

        if mail.from.is_null() {
            debug!(reports = reports.len(), "Null reverse-path, not sending a DSN");
            return;
        }

        let dsn = match self.composer.compose(mail, reports) {
            Ok(dsn) => dsn,
            Err(err) => {
                error!(error = %err, "Unable to compose DSN");
                return;
            }
        };

        let dsn_id = dsn.id;
        match self.dsn_transmitter.transmit(dsn).await {
            Ok(()) => info!(dsn = %dsn_id, to = %mail.from, reports = reports.len(), "DSN sent"),
            Err(err) => error!(dsn = %dsn_id, error = %err, "Unable to send DSN, dropping it"),
        }
    }
}

/// The time `delay` from now, saturating far in the future.
fn after(delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use courier_common::{MailError, RemoteMta, Status};

    use super::*;
    use crate::{QueueError, TransmitError};

    struct NoComposer;

    impl BounceComposer for NoComposer {
        fn compose(
            &self,
            _: &Mail,
            _: &[RecipientProblemReport],
        ) -> Result<Mail, MailError> {
            Err(MailError::NullReversePath)
        }
    }

    struct Refuse;

    #[async_trait::async_trait]
    impl Transmitter for Refuse {
        async fn transmit(&self, _: Mail) -> Result<(), TransmitError> {
            Err(QueueError::Storage("refused".to_string()).into())
        }
    }

    fn policy(config: RetryConfig) -> RetryPolicy {
        RetryPolicy::new(config, Arc::new(NoComposer), Arc::new(Refuse), Arc::new(Refuse))
    }

    fn rejection(recipient: &str, status: Status) -> RecipientRejection {
        RecipientRejection::new(
            recipient.parse::<Recipient>().unwrap(),
            SendFailure::new(status).with_remote_mta(Some(RemoteMta::new("mx.example.com", None))),
        )
    }

    #[test]
    fn test_dispose_splits_by_status() {
        let policy = policy(RetryConfig::default());

        let disposition = policy.dispose(
            1,
            vec![
                rejection("jane@example.com", Status::NO_ANSWER_FROM_HOST),
                rejection("joe@example.com", Status::BAD_DESTINATION_SYSTEM_ADDRESS),
            ],
        );

        assert_eq!(disposition.retry, vec!["jane@example.com".parse::<Recipient>().unwrap()]);
        assert_eq!(disposition.reports.len(), 1);
        assert_eq!(disposition.reports[0].action, Action::Failed);
        assert_eq!(
            disposition.reports[0].remote_mta,
            Some(RemoteMta::new("mx.example.com", None))
        );
    }

    #[test]
    fn test_dispose_when_exhausted() {
        let policy = policy(RetryConfig {
            retry_periods_secs: vec![60],
            ..RetryConfig::default()
        });

        let disposition =
            policy.dispose(2, vec![rejection("jane@example.com", Status::NO_ANSWER_FROM_HOST)]);

        assert!(disposition.retry.is_empty());
        assert_eq!(disposition.reports[0].action, Action::Failed);
        assert!(disposition.reports[0].status.should_retry());
    }

    #[test]
    fn test_dispose_reports_delays() {
        let policy = policy(RetryConfig {
            delay_report_points: vec![2],
            ..RetryConfig::default()
        });

        let first = policy.dispose(1, vec![rejection("jane@example.com", Status::NO_ANSWER_FROM_HOST)]);
        assert!(first.reports.is_empty());

        let second = policy.dispose(2, vec![rejection("jane@example.com", Status::NO_ANSWER_FROM_HOST)]);
        assert_eq!(second.retry.len(), 1);
        assert_eq!(second.reports.len(), 1);
        assert_eq!(second.reports[0].action, Action::Delayed);
    }

    #[tokio::test]
    async fn test_requeue_failure_is_returned() {
        let policy = policy(RetryConfig::default());
        let mail = Mail::new(
            "john@example.com".parse().unwrap(),
            ["jane@example.com".parse::<Recipient>().unwrap()],
            "data",
        )
        .unwrap();

        let result = policy
            .act_on_entire_mail_failure(mail, SendFailure::new(Status::NO_ANSWER_FROM_HOST))
            .await;

        assert!(matches!(result, Err(TransmitError::Queue(QueueError::Storage(_)))));
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(after(Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert!(after(Duration::from_secs(60)) > Utc::now());
    }
}
