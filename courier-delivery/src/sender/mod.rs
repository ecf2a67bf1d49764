//! One delivery pass for a queued unit
//!
//! A sender walks a list of candidate hosts. A host that fails or is
//! postponed hands over to the next one; a host that accepts the mail,
//! even for only some recipients, ends the pass.

mod direct;
mod upstream;

use async_trait::async_trait;
use courier_common::{Mail, RemotePart, Status};
use tracing::debug;

pub use direct::DirectSender;
pub use upstream::{BackendServer, IndirectSender, Upstream};

use crate::{Outcome, Postpone, SendFailure};

#[async_trait]
pub trait ImmediateSender: Send + Sync {
    /// Attempts delivery of `mail` once, falling back across hosts.
    async fn send(&self, mail: &Mail) -> Outcome;

    /// Whether every unit handed to [`send`](Self::send) must be addressed
    /// to a single remote part.
    fn single_domain_only(&self) -> bool;
}

/// The most telling failures seen while falling back across hosts.
///
/// A transient failure is reported in preference to a postponement, and a
/// postponement in preference to a permanent failure: as long as some host
/// might accept the mail later, the recipients must not be bounced.
#[derive(Debug, Default)]
struct Fallback {
    last_retryable: Option<SendFailure>,
    last_postpone: Option<Postpone>,
    last_permanent: Option<SendFailure>,
}

impl Fallback {
    fn record_failure(&mut self, failure: SendFailure) {
        if failure.should_retry() {
            self.last_retryable = Some(failure);
        } else {
            self.last_permanent = Some(failure);
        }
    }

    /// Returns the outcome back if it ends the pass.
    fn absorb(&mut self, outcome: Outcome) -> Option<Outcome> {
        match outcome {
            Outcome::Failed(failure) => {
                debug!(%failure, "Host failed, trying the next one");
                self.record_failure(failure);
                None
            }
            Outcome::Postponed(postpone) => {
                debug!(%postpone, "Host postponed, trying the next one");
                self.last_postpone = Some(postpone);
                None
            }
            outcome => Some(outcome),
        }
    }

    /// Reports by the precedence described on [`Fallback`], not simply the
    /// last failure seen.
    fn into_outcome(self) -> Outcome {
        if let Some(failure) = self.last_retryable {
            Outcome::Failed(failure)
        } else if let Some(postpone) = self.last_postpone {
            Outcome::Postponed(postpone)
        } else if let Some(failure) = self.last_permanent {
            Outcome::Failed(failure)
        } else {
            Outcome::Failed(
                SendFailure::new(Status::PERMANENT_INTERNAL_ERROR)
                    .with_detail("No candidate hosts to deliver to"),
            )
        }
    }
}

/// The remote part every recipient of `mail` shares.
fn single_remote_part(mail: &Mail) -> Result<&RemotePart, SendFailure> {
    let mut remote_parts = mail.recipients().iter().map(|recipient| {
        recipient.remote_part().ok_or_else(|| {
            SendFailure::new(Status::PERMANENT_INTERNAL_ERROR)
                .with_detail(format!("Recipient {recipient} has no remote part"))
        })
    });

    let first = remote_parts.next().ok_or_else(|| {
        SendFailure::new(Status::PERMANENT_INTERNAL_ERROR).with_detail("Mail has no recipients")
    })??;

    for remote_part in remote_parts {
        let remote_part = remote_part?;
        if remote_part != first {
            return Err(SendFailure::new(Status::PERMANENT_INTERNAL_ERROR).with_detail(format!(
                "Recipients of a single unit span {first} and {remote_part}"
            )));
        }
    }

    Ok(first)
}
