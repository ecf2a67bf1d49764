//! SMTP client capability
//!
//! The delivery engine drives a remote transaction through [`SmtpClient`],
//! one call per protocol stage, and never sees the wire format. Every call
//! fails with a [`ClientError`], which is either a rejection carrying the
//! remote reply or a transport problem. [`ClientError::status`] turns both
//! into a [`courier_common::Status`].
//!
//! [`TcpSmtpClient`] is the production implementation; tests substitute
//! their own through [`ClientFactory`].

mod error;
mod response;
mod tcp;
mod timeouts;

use async_trait::async_trait;
use courier_common::RemoteMta;

pub use error::{ClientError, Result};
pub use response::Response;
pub use tcp::{TcpClientFactory, TcpSmtpClient};
pub use timeouts::SmtpTimeouts;

/// One SMTP session with one remote server.
///
/// A client is created unconnected and bound to the server it will talk to.
/// Callers go through the stages in order: `connect`, `mail_from`, one
/// `rcpt_to` per recipient, then `data_start`, any number of `data_write`
/// calls, and `data_end`. `quit` may be called at any point after `connect`
/// and closes the session.
#[async_trait]
pub trait SmtpClient: Send {
    fn remote_mta(&self) -> &RemoteMta;

    /// Opens the connection, reads the greeting and introduces ourselves.
    async fn connect(&mut self) -> Result<()>;

    /// `MAIL FROM:<reverse_path>`. An empty path is the null sender.
    async fn mail_from(&mut self, reverse_path: &str) -> Result<()>;

    async fn rcpt_to(&mut self, recipient: &str) -> Result<()>;

    async fn data_start(&mut self) -> Result<()>;

    /// Streams part of the content. Lines starting with a dot are escaped
    /// by the client.
    async fn data_write(&mut self, data: &[u8]) -> Result<()>;

    /// Terminates the content and waits for the server to take it.
    async fn data_end(&mut self) -> Result<()>;

    async fn quit(&mut self) -> Result<()>;
}

/// Creates unconnected clients for a chosen destination.
pub trait ClientFactory: Send + Sync {
    fn create(&self, remote: RemoteMta, port: u16) -> Box<dyn SmtpClient>;
}
