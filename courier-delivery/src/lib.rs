//! Outbound delivery and retry engine
//!
//! Mail accepted for relay enters through the [`QueuingTransmitter`], which
//! splits it into one unit per destination domain and hands each unit to the
//! durable queue. The [`OutboundProcessor`] picks due units off the queue and
//! gives them to an [`ImmediateSender`]:
//!
//! - [`DirectSender`] resolves the domain's mail exchangers and tries them in
//!   order.
//! - [`IndirectSender`] relays everything through a configured smarthost.
//!
//! Every attempt ends in an [`Outcome`], and the [`RetryPolicy`] decides
//! whether the affected recipients are rescheduled, reported back to the
//! sender in a DSN, or both.

pub mod admission;
pub mod config;
pub mod dns;
pub mod dsn;
mod error;
pub mod host;
mod log_id;
mod outcome;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod sender;

pub use admission::{AdmissionConfig, ConnectionAdmissionController};
pub use config::DeliveryConfig;
pub use dns::{AddressResolver, DnsConfig, DnsLookup, HickoryLookup, LookupFailure, MxRecord, MxResolver};
pub use dsn::{Action, BounceComposer, DsnConfig, RecipientProblemReport, Rfc3464Composer};
pub use error::{ConfigError, QueueError, TransmitError};
pub use host::HostTransmitter;
pub use log_id::LogIdFactory;
pub use outcome::{Outcome, Postpone, RecipientRejection, SendFailure};
pub use policy::{RetryConfig, RetryPolicy};
pub use processor::{OutboundProcessor, TransmitterSummary};
pub use queue::{MailQueue, MemoryQueue, QueuingTransmitter, ScheduledQueue, Transmitter};
pub use sender::{BackendServer, DirectSender, ImmediateSender, IndirectSender, Upstream};
