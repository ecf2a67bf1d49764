//! Types shared by the courier crates: envelope addresses, the `Mail` unit
//! handed between queue and workers, the SMTP status taxonomy, and logging.

pub mod address;
pub mod domain;
pub mod logging;
pub mod mail;
pub mod status;

pub use address::{AddressError, Mailbox, Recipient, RemotePart, ReversePath};
pub use domain::Domain;
pub use mail::{Mail, MailData, MailError, MailId};
pub use status::{EnhancedCode, RemoteMta, Status};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
