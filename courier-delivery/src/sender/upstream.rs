//! Relaying through a smarthost
//!
//! An [`Upstream`] is a set of relay servers. Primaries are always tried
//! before backups, and within each group the order is drawn at random in
//! proportion to the servers' weights, so load spreads across the group
//! while every server is still tried once per pass.

use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;
use courier_common::{Mail, RemoteMta, RemotePart, Status};
use courier_smtp::ClientFactory;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Fallback, ImmediateSender};
use crate::{AddressResolver, HostTransmitter, Outcome, SendFailure};

/// A relay server of an [`Upstream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendServer {
    /// Host name, IP address, or address literal such as `[192.0.2.1]`
    pub host: String,

    /// Default: 25
    #[serde(default = "default_port")]
    pub port: u16,

    /// Relative share of the traffic within its group
    ///
    /// Default: 1.0
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Only used once every primary server has been tried
    #[serde(default)]
    pub backup: bool,
}

const fn default_port() -> u16 {
    25
}

const fn default_weight() -> f64 {
    1.0
}

impl BackendServer {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            weight: default_weight(),
            backup: false,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub const fn as_backup(mut self) -> Self {
        self.backup = true;
        self
    }

    /// The address `host` names directly, if it is not a DNS name
    #[must_use]
    pub fn literal_address(&self) -> Option<IpAddr> {
        if let Ok(address) = self.host.parse::<IpAddr>() {
            return Some(address);
        }

        match self.host.parse::<RemotePart>() {
            Ok(RemotePart::Literal(address)) => Some(address),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Upstream {
    pub servers: Vec<BackendServer>,
}

impl Upstream {
    #[must_use]
    pub const fn new(servers: Vec<BackendServer>) -> Self {
        Self { servers }
    }

    /// Every server once, primaries first, each group in weighted random
    /// order.
    #[must_use]
    pub fn ordered_servers(&self) -> Vec<&BackendServer> {
        self.ordered_servers_with(&mut rand::rng())
    }

    fn ordered_servers_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<&BackendServer> {
        let (backups, primaries): (Vec<&BackendServer>, Vec<&BackendServer>) =
            self.servers.iter().partition(|server| server.backup);

        let mut ordered = weighted_shuffle(primaries, rng);
        ordered.extend(weighted_shuffle(backups, rng));
        ordered
    }
}

/// Weighted random selection without replacement.
fn weighted_shuffle<'a, R: Rng + ?Sized>(
    mut remaining: Vec<&'a BackendServer>,
    rng: &mut R,
) -> Vec<&'a BackendServer> {
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|server| server.weight).sum();
        let target = rng.random::<f64>() * total;

        let mut cumulative = 0.0;
        let index = remaining
            .iter()
            .position(|server| {
                cumulative += server.weight;
                cumulative > target
            })
            .unwrap_or(remaining.len() - 1);

        ordered.push(remaining.remove(index));
    }

    ordered
}

/// Sends every unit through the servers of an [`Upstream`].
#[derive(Clone)]
pub struct IndirectSender {
    upstream: Upstream,
    addresses: AddressResolver,
    clients: Arc<dyn ClientFactory>,
    transmitter: HostTransmitter,
}

impl std::fmt::Debug for IndirectSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndirectSender")
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

impl IndirectSender {
    #[must_use]
    pub fn new(
        upstream: Upstream,
        addresses: AddressResolver,
        clients: Arc<dyn ClientFactory>,
        transmitter: HostTransmitter,
    ) -> Self {
        Self {
            upstream,
            addresses,
            clients,
            transmitter,
        }
    }

    /// A relay that cannot be resolved is assumed to be a temporary problem
    /// of the local resolver, since the relay is configured locally.
    async fn address_of(&self, server: &BackendServer) -> Result<IpAddr, SendFailure> {
        if let Some(address) = server.literal_address() {
            return Ok(address);
        }

        let resolution_failed = |detail: String| {
            SendFailure::new(Status::NO_ANSWER_FROM_HOST.with_message("Domain name resolution failed"))
                .with_remote_mta(Some(RemoteMta::new(server.host.as_str(), None)))
                .with_detail(detail)
        };

        match self.addresses.resolve(&server.host).await {
            Ok(addresses) => addresses
                .into_iter()
                .next()
                .ok_or_else(|| resolution_failed(format!("No address for {}", server.host))),
            Err(failure) => Err(resolution_failed(failure.to_string())),
        }
    }
}

#[async_trait]
impl ImmediateSender for IndirectSender {
    #[instrument(skip_all, fields(mail = %mail.id))]
    async fn send(&self, mail: &Mail) -> Outcome {
        let mut fallback = Fallback::default();

        for server in self.upstream.ordered_servers() {
            let address = match self.address_of(server).await {
                Ok(address) => address,
                Err(failure) => {
                    debug!(host = %server.host, %failure, "Skipping unresolvable relay");
                    fallback.record_failure(failure);
                    continue;
                }
            };

            let client = self.clients.create(
                RemoteMta::new(server.host.as_str(), Some(address)),
                server.port,
            );

            if let Some(outcome) = fallback.absorb(self.transmitter.transmit(mail, client).await) {
                return outcome;
            }
        }

        debug!(servers = self.upstream.servers.len(), "Every relay failed");
        fallback.into_outcome()
    }

    fn single_domain_only(&self) -> bool {
        false
    }
}
