//! Delivery configuration
//!
//! Every field has a default, so an empty `()` is a valid configuration:
//!
//! ```ron
//! (
//!     workers: 8,
//!     helo_name: "mx1.example.org",
//!     retry: (
//!         retry_periods_secs: [60, 600, 3600],
//!         delay_report_points: [2],
//!     ),
//!     upstream: [
//!         (host: "relay1.example.net", weight: 3.0),
//!         (host: "relay2.example.net", backup: true),
//!     ],
//! )
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use courier_common::internal;
use courier_smtp::{ClientFactory, SmtpTimeouts, TcpClientFactory};
use serde::{Deserialize, Serialize};

use crate::{
    AddressResolver, AdmissionConfig, ConfigError, ConnectionAdmissionController, DirectSender,
    DnsConfig, DnsLookup, DsnConfig, HostTransmitter, ImmediateSender, IndirectSender,
    LogIdFactory, MxResolver, RetryConfig, Upstream,
};

const CONFIG_ENV: &str = "COURIER_CONFIG";

const fn default_workers() -> usize {
    4
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    25
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Units attempted in parallel
    ///
    /// Default: 4
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Name announced in EHLO/HELO
    ///
    /// Default: "localhost"
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Port used on mail exchangers
    ///
    /// Default: 25
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    /// Relay everything through these servers instead of delivering to the
    /// recipients' mail exchangers.
    #[serde(default)]
    pub upstream: Option<Upstream>,

    #[serde(default)]
    pub dsn: DsnConfig,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            helo_name: default_helo_name(),
            port: default_port(),
            admission: AdmissionConfig::default(),
            retry: RetryConfig::default(),
            dns: DnsConfig::default(),
            upstream: None,
            dsn: DsnConfig::default(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl DeliveryConfig {
    /// Loads the configuration from the first of:
    /// 1. the file named by `COURIER_CONFIG`
    /// 2. ./courier.config.ron
    /// 3. /etc/courier/courier.config.ron
    ///
    /// Falls back to the defaults when none of them exists.
    ///
    /// # Errors
    ///
    /// Fails if `COURIER_CONFIG` names a missing file, or if the chosen file
    /// cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            PathBuf::from("./courier.config.ron"),
            PathBuf::from("/etc/courier/courier.config.ron"),
        ];

        match default_paths.iter().find(|path| path.exists()) {
            Some(path) => Self::from_file(path),
            None => {
                internal!(level = INFO, "No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        internal!(level = INFO, "Loading configuration from {}", path.display());
        Self::from_ron_str(&content)
    }

    /// # Errors
    ///
    /// Fails if `content` is not valid RON for this structure, or if
    /// [`validate`](Self::validate) rejects it.
    pub fn from_ron_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)?;

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }

        if self.retry.retry_periods_secs.is_empty() {
            return Err(ConfigError::Invalid(
                "retry.retry_periods_secs must name at least one period".to_string(),
            ));
        }

        if let Some(upstream) = &self.upstream {
            if upstream.servers.is_empty() {
                return Err(ConfigError::Invalid(
                    "upstream must name at least one server".to_string(),
                ));
            }

            if let Some(server) = upstream
                .servers
                .iter()
                .find(|server| !(server.weight.is_finite() && server.weight > 0.0))
            {
                return Err(ConfigError::Invalid(format!(
                    "upstream server {} must have a positive weight",
                    server.host
                )));
            }
        }

        Ok(())
    }

    /// Connection limits shared by every worker
    #[must_use]
    pub fn admission_controller(&self) -> Arc<ConnectionAdmissionController> {
        Arc::new(ConnectionAdmissionController::new(self.admission))
    }

    #[must_use]
    pub fn client_factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(TcpClientFactory::new(self.helo_name.as_str(), self.timeouts))
    }

    /// The sender this configuration calls for: the upstream relays when
    /// configured, the recipients' mail exchangers otherwise.
    #[must_use]
    pub fn sender(
        &self,
        lookup: Arc<dyn DnsLookup>,
        clients: Arc<dyn ClientFactory>,
        admission: Arc<ConnectionAdmissionController>,
        log_ids: LogIdFactory,
    ) -> Arc<dyn ImmediateSender> {
        let transmitter = HostTransmitter::new(admission, log_ids);
        let addresses = AddressResolver::new(Arc::clone(&lookup));

        match &self.upstream {
            Some(upstream) => {
                internal!(
                    level = INFO,
                    servers = upstream.servers.len(),
                    "Relaying through upstream servers"
                );
                Arc::new(IndirectSender::new(
                    upstream.clone(),
                    addresses,
                    clients,
                    transmitter,
                ))
            }
            None => Arc::new(
                DirectSender::new(MxResolver::new(lookup), addresses, clients, transmitter)
                    .with_port(self.port),
            ),
        }
    }
}
