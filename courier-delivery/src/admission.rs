//! Per-destination connection limits
//!
//! Bounds the number of simultaneous outbound connections to one remote
//! address. Admission never waits: when a destination is saturated the
//! caller gets a [`Postpone`] with a randomised delay and is expected to
//! reschedule the attempt.

use std::net::IpAddr;

use courier_common::Status;
use dashmap::{DashMap, mapref::entry::Entry};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::Postpone;

/// Fixed part of the delay recommended to a postponed attempt
const BASE_DELAY_SECS: u32 = 5;

/// Upper bound of the random part of the recommended delay
const DELAY_JITTER_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Simultaneous connections allowed to one remote address. 0 removes
    /// the limit.
    ///
    /// Default: 3
    #[serde(default = "default_max_connections")]
    pub max_connections_per_address: u32,
}

const fn default_max_connections() -> u32 {
    3
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connections_per_address: default_max_connections(),
        }
    }
}

/// Tracks open connections per remote address.
///
/// Every successful [`admit`](Self::admit) must be paired with exactly one
/// [`release`](Self::release).
#[derive(Debug)]
pub struct ConnectionAdmissionController {
    max_connections: u32,
    connections: DashMap<IpAddr, u32>,
}

impl ConnectionAdmissionController {
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            max_connections: config.max_connections_per_address,
            connections: DashMap::new(),
        }
    }

    const fn unlimited(&self) -> bool {
        self.max_connections == 0
    }

    /// Reserves a connection slot for `address`.
    ///
    /// # Errors
    ///
    /// Returns a [`Postpone`] when `address` already has the maximum number
    /// of connections open.
    pub fn admit(&self, address: IpAddr) -> Result<(), Postpone> {
        if self.unlimited() {
            return Ok(());
        }

        match self.connections.entry(address) {
            Entry::Occupied(entry) if *entry.get() >= self.max_connections => {
                let open = *entry.get();
                drop(entry);

                let delay = BASE_DELAY_SECS + rand::rng().random_range(0..=DELAY_JITTER_SECS);
                debug!(
                    %address,
                    open,
                    delay,
                    "Connection limit reached, postponing"
                );

                Err(Postpone::new(delay, Status::TOO_MANY_CONNECTIONS))
            }
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += 1;
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(1);
                Ok(())
            }
        }
    }

    /// Frees the slot reserved by a successful [`admit`](Self::admit).
    pub fn release(&self, address: IpAddr) {
        if self.unlimited() {
            return;
        }

        match self.connections.entry(address) {
            Entry::Occupied(entry) if *entry.get() <= 1 => {
                entry.remove();
            }
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
            }
            Entry::Vacant(_) => {
                error!(%address, "Released a connection that was never admitted");
            }
        }
    }

    /// Connections currently admitted to `address`
    #[must_use]
    pub fn open_connections(&self, address: IpAddr) -> u32 {
        self.connections.get(&address).map_or(0, |count| *count)
    }

    /// Addresses with at least one connection admitted
    #[must_use]
    pub fn tracked_addresses(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionAdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}
