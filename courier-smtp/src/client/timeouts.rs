use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-stage limits of one SMTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Establishing the TCP connection
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Waiting for the server's greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_greeting_timeout")]
    pub greeting_secs: u64,

    /// Any command other than the end of data, and each content write
    ///
    /// Default: 300 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Waiting for the reply to the terminating dot, during which the server
    /// may be processing the whole message
    ///
    /// Default: 600 seconds
    #[serde(default = "default_data_end_timeout")]
    pub data_end_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn greeting(&self) -> Duration {
        Duration::from_secs(self.greeting_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data_end(&self) -> Duration {
        Duration::from_secs(self.data_end_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            greeting_secs: default_greeting_timeout(),
            command_secs: default_command_timeout(),
            data_end_secs: default_data_end_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_greeting_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    300
}

const fn default_data_end_timeout() -> u64 {
    600
}

const fn default_quit_timeout() -> u64 {
    10
}
