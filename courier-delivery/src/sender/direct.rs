use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{Mail, RemoteMta, RemotePart};
use courier_smtp::ClientFactory;
use tracing::{debug, instrument};

use super::{Fallback, ImmediateSender, single_remote_part};
use crate::{AddressResolver, HostTransmitter, MxResolver, Outcome};

/// Delivers straight to the mail exchangers of the recipients' domain.
#[derive(Clone)]
pub struct DirectSender {
    mx: MxResolver,
    addresses: AddressResolver,
    clients: Arc<dyn ClientFactory>,
    transmitter: HostTransmitter,
    port: u16,
}

impl std::fmt::Debug for DirectSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSender")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl DirectSender {
    #[must_use]
    pub fn new(
        mx: MxResolver,
        addresses: AddressResolver,
        clients: Arc<dyn ClientFactory>,
        transmitter: HostTransmitter,
    ) -> Self {
        Self {
            mx,
            addresses,
            clients,
            transmitter,
            port: 25,
        }
    }

    /// Port to connect to on every exchanger, 25 unless overridden
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn send_to_host(&self, mail: &Mail, host: &str, fallback: &mut Fallback) -> Option<Outcome> {
        let addresses = match self.addresses.resolve(host).await {
            Ok(addresses) => addresses,
            Err(failure) => {
                debug!(host, %failure, "Skipping host without a usable address");
                fallback.record_failure(failure);
                return None;
            }
        };

        // Only the first address of a host is tried within one pass.
        let address = addresses.into_iter().next()?;
        let client = self
            .clients
            .create(RemoteMta::new(host, Some(address)), self.port);

        fallback.absorb(self.transmitter.transmit(mail, client).await)
    }
}

#[async_trait]
impl ImmediateSender for DirectSender {
    #[instrument(skip_all, fields(mail = %mail.id))]
    async fn send(&self, mail: &Mail) -> Outcome {
        let remote_part = match single_remote_part(mail) {
            Ok(remote_part) => remote_part,
            Err(failure) => return Outcome::Failed(failure),
        };

        let domain = match remote_part {
            RemotePart::Literal(address) => {
                let remote = RemoteMta::new(remote_part.to_string(), Some(*address));
                let client = self.clients.create(remote, self.port);
                return self.transmitter.transmit(mail, client).await;
            }
            RemotePart::Domain(domain) => domain,
        };

        let hosts = match self.mx.resolve(domain).await {
            Ok(hosts) => hosts,
            Err(failure) => return Outcome::Failed(failure),
        };

        let mut fallback = Fallback::default();
        for host in &hosts {
            if let Some(outcome) = self.send_to_host(mail, host, &mut fallback).await {
                return outcome;
            }
        }

        debug!(domain = %domain, hosts = hosts.len(), "Every exchanger failed");
        fallback.into_outcome()
    }

    fn single_domain_only(&self) -> bool {
        true
    }
}
