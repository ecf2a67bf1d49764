//! Workers draining the queue
//!
//! Each worker takes one due unit at a time, makes one delivery attempt
//! through the [`ImmediateSender`], and hands whatever did not succeed to the
//! [`RetryPolicy`].

mod summary;

use std::sync::Arc;

use courier_common::{Mail, Signal, internal};
use tokio::{sync::broadcast, task::JoinSet};
use tracing::{debug, error, info, instrument, warn};

pub use summary::TransmitterSummary;

use crate::{ImmediateSender, LogIdFactory, Outcome, RetryPolicy, ScheduledQueue};

pub struct OutboundProcessor {
    workers: usize,
    queue: Arc<dyn ScheduledQueue>,
    worker: Worker,
}

impl std::fmt::Debug for OutboundProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundProcessor")
            .field("workers", &self.workers)
            .field("summary", &self.worker.summary)
            .finish_non_exhaustive()
    }
}

/// The part of the processor every worker task owns a copy of.
#[derive(Clone)]
struct Worker {
    sender: Arc<dyn ImmediateSender>,
    policy: RetryPolicy,
    log_ids: LogIdFactory,
    summary: Arc<TransmitterSummary>,
}

impl OutboundProcessor {
    #[must_use]
    pub fn new(
        workers: usize,
        queue: Arc<dyn ScheduledQueue>,
        sender: Arc<dyn ImmediateSender>,
        policy: RetryPolicy,
        log_ids: LogIdFactory,
    ) -> Self {
        Self {
            workers: workers.max(1),
            queue,
            worker: Worker {
                sender,
                policy,
                log_ids,
                summary: Arc::new(TransmitterSummary::new()),
            },
        }
    }

    pub fn summary(&self) -> &TransmitterSummary {
        &self.worker.summary
    }

    /// Makes one delivery attempt for `mail` and acts on the outcome.
    pub async fn process(&self, mail: Mail) {
        self.worker.process(mail).await;
    }

    /// Runs the workers until a shutdown signal arrives.
    ///
    /// An attempt in progress when the signal arrives is completed first.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, workers = self.workers, "Outbound processor starting");

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let worker = self.worker.clone();
            let queue = Arc::clone(&self.queue);
            let shutdown = shutdown.resubscribe();

            workers.spawn(async move { worker.run(id, queue, shutdown).await });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "Outbound worker terminated abnormally");
            }
        }

        internal!(level = INFO, "Outbound processor shutdown complete");
    }
}

impl Worker {
    async fn run(
        self,
        id: usize,
        queue: Arc<dyn ScheduledQueue>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        internal!(worker = id, "Outbound worker started");

        loop {
            tokio::select! {
                mail = queue.wait_for_work() => self.process(mail).await,
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(worker = id, "Outbound worker received shutdown signal");
                            break;
                        }
                        Err(err) => {
                            error!(worker = id, error = %err, "Outbound worker shutdown channel error");
                            break;
                        }
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(mail = %mail.id, attempts = mail.delivery_attempts))]
    async fn process(&self, mail: Mail) {
        let id = mail.id;
        self.summary.record_transaction();

        let result = match self.sender.send(&mail).await {
            Outcome::Delivered => {
                info!(recipients = mail.recipients().len(), "Delivered");
                self.summary.record_success();
                Ok(())
            }
            Outcome::Failed(mut failure) => {
                let log_id = failure.init_log_id(|| self.log_ids.next()).to_owned();
                warn!(log_id = %log_id, %failure, "Delivery failed");

                self.summary
                    .record_failure(!failure.should_retry(), failure.to_string());
                self.policy.act_on_entire_mail_failure(mail, failure).await
            }
            Outcome::PartiallyRejected {
                rejections,
                accepted,
            } => {
                info!(
                    accepted = accepted.len(),
                    rejected = rejections.len(),
                    "Recipients rejected"
                );

                if let Some(first) = rejections.first() {
                    let permanent = !first.failure.should_retry();
                    let description = format!("{}: {}", first.recipient, first.failure);

                    if mail.recipients().len() == 1 || accepted.is_empty() {
                        self.summary.record_failure(permanent, description);
                    } else {
                        self.summary.record_partial_failure(permanent, description);
                    }
                }

                self.policy
                    .act_on_recipients_were_rejected(mail, rejections)
                    .await
            }
            Outcome::Postponed(postpone) => {
                debug!(%postpone, "Delivery postponed");
                self.policy.act_on_postpone_required(mail, postpone).await
            }
        };

        if let Err(err) = result {
            error!(mail = %id, error = %err, "Unable to act on the delivery outcome, abandoning mail");
            self.summary.record_error(err.to_string());
        }
    }
}
