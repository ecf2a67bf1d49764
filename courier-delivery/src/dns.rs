//! DNS resolution for mail delivery.
//!
//! [`MxResolver`] turns a destination domain into the ordered list of mail
//! exchangers to try, following RFC 5321 section 5.1: exchangers are tried
//! in ascending preference, equal preferences are tried in random order, and
//! a domain without MX records is its own (implicit) exchanger.
//! [`AddressResolver`] then turns each exchanger into addresses.
//!
//! Both classify lookup failures into the status a DSN would report, so a
//! caller only ever sees a [`SendFailure`]. The queries themselves go through
//! the [`DnsLookup`] capability, which [`HickoryLookup`] implements on top of
//! the system resolver configuration.

use std::{net::IpAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::{Domain, Status};
use hickory_resolver::{
    ResolveError, TokioResolver,
    config::{LookupIpStrategy, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::{ProtoErrorKind, op::ResponseCode},
};
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::SendFailure;

/// Why a query produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    /// The name does not exist (NXDOMAIN).
    #[error("Name does not exist")]
    NotFound,

    /// The name exists but has no records of the requested type.
    #[error("No records of the requested type")]
    TypeNotFound,

    /// Temporary failure, e.g. a timeout or SERVFAIL. Worth retrying later.
    #[error("Temporary resolution failure")]
    TryAgain,

    /// A server refused to answer, or answered in a way that will not change.
    #[error("Unrecoverable resolution failure")]
    Unrecoverable,

    #[error("Unexpected resolution failure: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

impl MxRecord {
    #[must_use]
    pub fn new(preference: u16, exchange: impl Into<String>) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }
}

/// The DNS queries delivery depends on.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// MX records of `domain`, in the order the server returned them.
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>, LookupFailure>;

    /// A records of `host`, followed by its AAAA records.
    async fn ip(&self, host: &str) -> Result<Vec<IpAddr>, LookupFailure>;
}

/// Configuration for the system resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per query before giving up (default: 2)
    #[serde(default = "default_attempts")]
    pub attempts: usize,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_attempts() -> usize {
    2
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            attempts: default_attempts(),
        }
    }
}

/// [`DnsLookup`] backed by hickory and the system resolver configuration.
#[derive(Debug, Clone)]
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, ResolveError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts.attempts = config.attempts;
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn mx(&self, domain: &str) -> Result<Vec<MxRecord>, LookupFailure> {
        let lookup = self
            .resolver
            .mx_lookup(domain)
            .await
            .map_err(|err| classify(&err))?;

        Ok(lookup
            .iter()
            .map(|mx| {
                let exchange = mx.exchange().to_utf8();
                MxRecord::new(mx.preference(), exchange.trim_end_matches('.'))
            })
            .collect())
    }

    async fn ip(&self, host: &str) -> Result<Vec<IpAddr>, LookupFailure> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|err| classify(&err))?;

        let (mut addresses, v6): (Vec<IpAddr>, Vec<IpAddr>) =
            lookup.iter().partition(IpAddr::is_ipv4);
        addresses.extend(v6);

        Ok(addresses)
    }
}

fn classify(err: &ResolveError) -> LookupFailure {
    if err.is_nx_domain() {
        return LookupFailure::NotFound;
    }

    let Some(proto) = err.proto() else {
        return LookupFailure::Unknown(err.to_string());
    };

    match proto.kind() {
        ProtoErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::ServFail => LookupFailure::TryAgain,
            ResponseCode::Refused | ResponseCode::NotImp => LookupFailure::Unrecoverable,
            _ => LookupFailure::TypeNotFound,
        },
        ProtoErrorKind::Timeout
        | ProtoErrorKind::Io(_)
        | ProtoErrorKind::NoConnections
        | ProtoErrorKind::Busy => LookupFailure::TryAgain,
        _ => LookupFailure::Unknown(err.to_string()),
    }
}

/// Resolves a domain to the mail exchangers to try, in order.
#[derive(Clone)]
pub struct MxResolver {
    lookup: Arc<dyn DnsLookup>,
}

impl std::fmt::Debug for MxResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MxResolver").finish_non_exhaustive()
    }
}

impl MxResolver {
    #[must_use]
    pub fn new(lookup: Arc<dyn DnsLookup>) -> Self {
        Self { lookup }
    }

    /// Host names of the exchangers of `domain`, most preferred first.
    ///
    /// # Errors
    ///
    /// Returns the classified failure when the domain cannot be resolved.
    pub async fn resolve(&self, domain: &Domain) -> Result<Vec<String>, SendFailure> {
        if domain.as_str().parse::<Domain>().is_err() {
            return Err(SendFailure::new(
                Status::BAD_DESTINATION_MAILBOX_ADDRESS_SYNTAX
                    .with_message(format!("Invalid domain name: {domain}")),
            ));
        }

        let result = self.lookup.mx(domain.as_str()).await;

        match result {
            Ok(records) if !records.is_empty() => {
                let hosts = order_by_preference(records, &mut rand::rng());
                debug!(domain = %domain, hosts = ?hosts, "Resolved mail exchangers");
                Ok(hosts)
            }
            Ok(_) | Err(LookupFailure::TypeNotFound) => {
                debug!(domain = %domain, "No MX records, using the domain as implicit MX");
                Ok(vec![domain.to_string()])
            }
            Err(failure) => Err(mx_failure(domain, &failure)),
        }
    }
}

/// Sorts by ascending preference and shuffles each run of equal preferences.
fn order_by_preference<R: Rng + ?Sized>(mut records: Vec<MxRecord>, rng: &mut R) -> Vec<String> {
    records.sort_by_key(|record| record.preference);
    records
        .chunk_by_mut(|a, b| a.preference == b.preference)
        .for_each(|equal| equal.shuffle(rng));

    records.into_iter().map(|record| record.exchange).collect()
}

fn mx_failure(domain: &Domain, failure: &LookupFailure) -> SendFailure {
    let status = match failure {
        LookupFailure::NotFound => Status::BAD_DESTINATION_SYSTEM_ADDRESS
            .with_message(format!("Domain {domain} does not exist")),
        LookupFailure::Unrecoverable | LookupFailure::TypeNotFound => {
            Status::PERMANENT_UNABLE_TO_ROUTE
                .with_message(format!("MX lookup for {domain} failed permanently"))
        }
        LookupFailure::TryAgain => Status::TRANSIENT_DIRECTORY_SERVER_FAILURE
            .with_message(format!("MX lookup for {domain} failed temporarily")),
        LookupFailure::Unknown(reason) => {
            warn!(domain = %domain, reason, "Unexpected MX lookup failure");
            Status::PERMANENT_INTERNAL_ERROR
        }
    };

    debug!(domain = %domain, %failure, %status, "MX lookup failed");
    SendFailure::new(status).with_detail(failure.to_string())
}

/// Resolves a host name to its addresses, IPv4 first.
#[derive(Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn DnsLookup>,
}

impl std::fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressResolver").finish_non_exhaustive()
    }
}

impl AddressResolver {
    #[must_use]
    pub fn new(lookup: Arc<dyn DnsLookup>) -> Self {
        Self { lookup }
    }

    /// The result is never empty. A host written as an IP address resolves
    /// to itself without a query.
    ///
    /// # Errors
    ///
    /// Returns the classified failure when `host` has no usable address.
    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, SendFailure> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(vec![address]);
        }

        let result = self.lookup.ip(host).await;

        match result {
            Ok(addresses) if !addresses.is_empty() => Ok(addresses),
            Ok(_) => Err(address_failure(host, &LookupFailure::TypeNotFound)),
            Err(failure) => Err(address_failure(host, &failure)),
        }
    }
}

fn address_failure(host: &str, failure: &LookupFailure) -> SendFailure {
    let status = match failure {
        LookupFailure::NotFound | LookupFailure::TypeNotFound | LookupFailure::Unrecoverable => {
            Status::PERMANENT_UNABLE_TO_ROUTE
                .with_message(format!("No address record found for host {host}"))
        }
        LookupFailure::TryAgain => Status::TRANSIENT_DIRECTORY_SERVER_FAILURE
            .with_message(format!("Address lookup for {host} failed temporarily")),
        LookupFailure::Unknown(reason) => {
            warn!(host, reason, "Unexpected address lookup failure");
            Status::PERMANENT_INTERNAL_ERROR
        }
    };

    debug!(host, %failure, %status, "Address lookup failed");
    SendFailure::new(status).with_detail(failure.to_string())
}
