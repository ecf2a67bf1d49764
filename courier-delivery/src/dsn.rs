//! Delivery Status Notification (DSN) generation per RFC 3464
//!
//! The retry policy collects one [`RecipientProblemReport`] per recipient
//! that failed permanently, or that is still being retried but has reached a
//! delay report point. A [`BounceComposer`] turns them into a new mail
//! addressed to the original sender.
//!
//! # DSN Structure (RFC 3464)
//! ```text
//! multipart/report; report-type="delivery-status"
//! ├── Part 1: text/plain (human-readable explanation)
//! ├── Part 2: message/delivery-status (machine-readable status)
//! └── Part 3: text/rfc822-headers (original message headers)
//! ```

use std::{
    fmt::{self, Display, Write as _},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use courier_common::{Mail, MailError, Recipient, RemoteMta, ReversePath, Status};
use serde::{Deserialize, Serialize};

use crate::SendFailure;

/// The `Action` field of a per-recipient DSN group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Delivery failed for good.
    Failed,
    /// Delivery has not succeeded yet and will be retried.
    Delayed,
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        })
    }
}

/// What went wrong for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientProblemReport {
    pub recipient: Recipient,
    pub status: Status,
    pub remote_mta: Option<RemoteMta>,
    pub remote_status: Option<Status>,
    pub failed_at: DateTime<Utc>,
    pub log_id: Option<String>,
    pub action: Action,
}

impl RecipientProblemReport {
    #[must_use]
    pub fn new(recipient: Recipient, failure: &SendFailure, action: Action) -> Self {
        Self {
            recipient,
            status: failure.status.clone(),
            remote_mta: failure.remote_mta.clone(),
            remote_status: failure.remote_status.clone(),
            failed_at: failure.failed_at,
            log_id: failure.log_id.clone(),
            action,
        }
    }
}

/// Builds the notification mail sent back to the original sender.
pub trait BounceComposer: Send + Sync {
    /// # Errors
    ///
    /// Fails if `mail` has no sender to notify.
    fn compose(&self, mail: &Mail, reports: &[RecipientProblemReport]) -> Result<Mail, MailError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsnConfig {
    /// Hostname for the Reporting-MTA field (FQDN of this MTA)
    #[serde(default = "default_reporting_mta")]
    pub reporting_mta: String,

    /// Address notifications appear to come from
    #[serde(default = "default_postmaster")]
    pub postmaster: String,
}

fn default_reporting_mta() -> String {
    "localhost".to_string()
}

fn default_postmaster() -> String {
    "postmaster@localhost".to_string()
}

impl Default for DsnConfig {
    fn default() -> Self {
        Self {
            reporting_mta: default_reporting_mta(),
            postmaster: default_postmaster(),
        }
    }
}

/// Composes `multipart/report` DSNs.
#[derive(Debug, Clone)]
pub struct Rfc3464Composer {
    config: Arc<DsnConfig>,
}

impl Rfc3464Composer {
    #[must_use]
    pub fn new(config: DsnConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn human_readable_part(&self, mail: &Mail, reports: &[RecipientProblemReport]) -> String {
        let mut text = format!(
            "This is the mail system at host {}.\r\n\r\n",
            self.config.reporting_mta
        );

        let failed: Vec<_> = reports.iter().filter(|r| r.action == Action::Failed).collect();
        let delayed: Vec<_> = reports.iter().filter(|r| r.action == Action::Delayed).collect();

        if !failed.is_empty() {
            text.push_str(
                "I'm sorry to have to inform you that your message could not\r\n\
                 be delivered to one or more recipients.\r\n\r\n",
            );
            for report in failed {
                describe(&mut text, report);
            }
            text.push_str("\r\n");
        }

        if !delayed.is_empty() {
            text.push_str(
                "Delivery to the following recipients has been delayed.\r\n\
                 The mail system will keep trying, no action is required.\r\n\r\n",
            );
            for report in delayed {
                describe(&mut text, report);
            }
            text.push_str("\r\n");
        }

        let _ = write!(
            text,
            "Message details:\r\n\
             - Original sender: {}\r\n\
             - Delivery attempts: {}\r\n\
             - Received: {}\r\n",
            mail.from,
            mail.delivery_attempts,
            mail.arrival.to_rfc2822()
        );

        text
    }

    fn machine_readable_part(&self, mail: &Mail, reports: &[RecipientProblemReport]) -> String {
        let mut dsn = format!("Reporting-MTA: dns; {}\r\n", self.config.reporting_mta);

        if let Some(client) = &mail.received_from {
            let _ = write!(dsn, "Received-From-MTA: dns; {client}\r\n");
        }
        let _ = write!(dsn, "Arrival-Date: {}\r\n", mail.arrival.to_rfc2822());

        for report in reports {
            dsn.push_str("\r\n");
            let _ = write!(dsn, "Final-Recipient: rfc822; {}\r\n", report.recipient);
            let _ = write!(dsn, "Action: {}\r\n", report.action);
            let _ = write!(dsn, "Status: {}\r\n", report.status.enhanced_code());

            if let Some(remote) = &report.remote_mta {
                let _ = write!(dsn, "Remote-MTA: dns; {}\r\n", remote.host());
            }

            if let Some(remote_status) = &report.remote_status {
                let _ = write!(
                    dsn,
                    "Diagnostic-Code: smtp; {}\r\n",
                    remote_status.diagnostic_code().replace('\n', "\r\n ")
                );
            }

            let _ = write!(
                dsn,
                "Last-Attempt-Date: {}\r\n",
                report.failed_at.to_rfc2822()
            );

            if let Some(log_id) = &report.log_id {
                let _ = write!(dsn, "X-Log-ID: {log_id}\r\n");
            }
        }

        dsn
    }
}

fn describe(text: &mut String, report: &RecipientProblemReport) {
    let _ = write!(text, "<{}>: {}", report.recipient, report.status);
    if let Some(remote) = &report.remote_mta {
        let _ = write!(text, " (host {remote})");
    }
    if let Some(log_id) = &report.log_id {
        let _ = write!(text, " [log id {log_id}]");
    }
    text.push_str("\r\n");
}

impl BounceComposer for Rfc3464Composer {
    fn compose(&self, mail: &Mail, reports: &[RecipientProblemReport]) -> Result<Mail, MailError> {
        let sender = match &mail.from {
            ReversePath::Mailbox(mailbox) => mailbox.clone(),
            ReversePath::Null => return Err(MailError::NullReversePath),
        };

        let subject = if reports.iter().any(|r| r.action == Action::Failed) {
            "Delivery Status Notification (Failure)"
        } else {
            "Delivery Status Notification (Delay)"
        };

        let boundary = format!("----=_Part_{}", ulid::Ulid::new());
        let human_readable = self.human_readable_part(mail, reports);
        let machine_readable = self.machine_readable_part(mail, reports);
        let original_headers = String::from_utf8_lossy(mail.data.headers());

        let body = format!(
            "Content-Type: multipart/report; report-type=\"delivery-status\"; boundary=\"{boundary}\"\r\n\
            MIME-Version: 1.0\r\n\
            Date: {date}\r\n\
            Message-ID: <{id}@{reporting_mta}>\r\n\
            From: Mail Delivery System <{postmaster}>\r\n\
            To: <{sender}>\r\n\
            Subject: {subject}\r\n\
            Auto-Submitted: auto-replied\r\n\
            \r\n\
            This is a multi-part message in MIME format.\r\n\
            \r\n\
            --{boundary}\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            Content-Transfer-Encoding: 7bit\r\n\
            \r\n\
            {human_readable}\r\n\
            --{boundary}\r\n\
            Content-Type: message/delivery-status\r\n\
            Content-Transfer-Encoding: 7bit\r\n\
            \r\n\
            {machine_readable}\r\n\
            --{boundary}\r\n\
            Content-Type: text/rfc822-headers\r\n\
            Content-Transfer-Encoding: 7bit\r\n\
            \r\n\
            {original_headers}\r\n\
            --{boundary}--\r\n",
            date = Utc::now().to_rfc2822(),
            id = ulid::Ulid::new(),
            reporting_mta = self.config.reporting_mta,
            postmaster = self.config.postmaster,
        );

        Mail::new(ReversePath::Null, [Recipient::Mailbox(sender)], body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn original() -> Mail {
        Mail::new(
            "john@example.com".parse().unwrap(),
            [
                "jane@example.net".parse().unwrap(),
                "joe@example.net".parse().unwrap(),
            ],
            "Subject: Lunch\r\nFrom: john@example.com\r\n\r\nSee you at noon.\r\n",
        )
        .unwrap()
    }

    fn rejected(recipient: &str, action: Action) -> RecipientProblemReport {
        let remote_status = Status::from_reply(550, &["5.1.1 User unknown"]);
        let failure = SendFailure {
            remote_mta: Some(RemoteMta::new(
                "mx.example.net",
                Some("192.0.2.1".parse().unwrap()),
            )),
            remote_status: Some(remote_status.clone()),
            log_id: Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string()),
            ..SendFailure::new(remote_status)
        };

        RecipientProblemReport::new(recipient.parse().unwrap(), &failure, action)
    }

    fn content(mail: &Mail) -> String {
        String::from_utf8(mail.data.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_dsn_envelope() {
        let composer = Rfc3464Composer::new(DsnConfig::default());
        let dsn = composer
            .compose(&original(), &[rejected("jane@example.net", Action::Failed)])
            .unwrap();

        assert!(dsn.from.is_null());
        assert_eq!(
            dsn.recipients(),
            &["john@example.com".parse::<Recipient>().unwrap()]
        );
    }

    #[test]
    fn test_dsn_content() {
        let composer = Rfc3464Composer::new(DsnConfig {
            reporting_mta: "mail.example.com".to_string(),
            postmaster: "postmaster@example.com".to_string(),
        });
        let dsn = composer
            .compose(&original(), &[rejected("jane@example.net", Action::Failed)])
            .unwrap();
        let content = content(&dsn);

        assert!(content.contains("report-type=\"delivery-status\""));
        assert!(content.contains("From: Mail Delivery System <postmaster@example.com>"));
        assert!(content.contains("To: <john@example.com>"));
        assert!(content.contains("Subject: Delivery Status Notification (Failure)"));
        assert!(content.contains("Reporting-MTA: dns; mail.example.com"));
        assert!(content.contains("Final-Recipient: rfc822; jane@example.net"));
        assert!(content.contains("Action: failed"));
        assert!(content.contains("Status: 5.1.1"));
        assert!(content.contains("Remote-MTA: dns; mx.example.net"));
        assert!(content.contains("Diagnostic-Code: smtp; 550 5.1.1 User unknown"));
        assert!(content.contains("X-Log-ID: 01ARZ3NDEKTSV4RRFFQ69G5FAV"));
        assert!(content.contains("Subject: Lunch"));
        assert!(!content.contains("See you at noon."));
    }

    #[test]
    fn test_delay_only_dsn() {
        let composer = Rfc3464Composer::new(DsnConfig::default());
        let dsn = composer
            .compose(&original(), &[rejected("joe@example.net", Action::Delayed)])
            .unwrap();
        let content = content(&dsn);

        assert!(content.contains("Subject: Delivery Status Notification (Delay)"));
        assert!(content.contains("Action: delayed"));
        assert!(content.contains("will keep trying"));
    }

    #[test]
    fn test_null_sender_gets_no_dsn() {
        let mut mail = original();
        mail.from = ReversePath::Null;

        let composer = Rfc3464Composer::new(DsnConfig::default());
        assert!(
            composer
                .compose(&mail, &[rejected("jane@example.net", Action::Failed)])
                .is_err()
        );
    }
}
