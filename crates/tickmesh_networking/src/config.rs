//! # Session Configuration
//!
//! Timing and addressing knobs, loaded once at startup.
//!
//! ```toml
//! port = 4507
//! bind_address = "0.0.0.0"
//! message_wait_ms = 1000
//! retry_interval_ms = 10
//! max_timeouts = 5
//! exit_delay_ms = 1000
//! max_redirects = 8
//! ```
//!
//! Every field is optional; missing ones take the defaults above.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::{MAX_MSG_TIME_OUTS, NETWORK_PORT};

/// Session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// UDP port to bind, and the port assumed for bare master host names.
    pub port: u16,
    /// Local interface to bind.
    pub bind_address: IpAddr,
    /// Total budget for one bounded wait, in milliseconds.
    pub message_wait_ms: u64,
    /// Sleep between two polls of the socket, in milliseconds.
    pub retry_interval_ms: u64,
    /// Consecutive missed rounds before a peer is presumed gone.
    pub max_timeouts: u32,
    /// Pause after the departure message, before the socket is dropped.
    pub exit_delay_ms: u64,
    /// Redirect hops a joining peer follows before giving up.
    pub max_redirects: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: NETWORK_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            message_wait_ms: 1000,
            retry_interval_ms: 10,
            max_timeouts: MAX_MSG_TIME_OUTS,
            exit_delay_ms: 1000,
            max_redirects: 8,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> SessionResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SessionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Rejects values that would make the bounded waits meaningless.
    pub fn validate(&self) -> SessionResult<()> {
        if self.retry_interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "retry_interval_ms must be positive".into(),
            ));
        }
        if self.retry_interval_ms > self.message_wait_ms {
            return Err(SessionError::InvalidConfig(format!(
                "retry_interval_ms ({}) exceeds message_wait_ms ({})",
                self.retry_interval_ms, self.message_wait_ms
            )));
        }
        if self.max_timeouts == 0 {
            return Err(SessionError::InvalidConfig(
                "max_timeouts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Address the session socket binds.
    #[must_use]
    pub const fn bind_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Budget of one bounded wait.
    #[must_use]
    pub const fn message_wait(&self) -> Duration {
        Duration::from_millis(self.message_wait_ms)
    }

    /// Sleep between polls.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Pause after sending the departure message.
    #[must_use]
    pub const fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.exit_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 4507);
        assert_eq!(config.message_wait(), Duration::from_secs(1));
        assert_eq!(config.retry_interval(), Duration::from_millis(10));
        assert_eq!(config.max_timeouts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = SessionConfig::from_toml_str("port = 9000\nmax_timeouts = 3\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_timeouts, 3);
        assert_eq!(config.message_wait_ms, 1000);
        assert_eq!(config.bind_socket_addr(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(SessionConfig::from_toml_str("retry_interval_ms = 0").is_err());
        assert!(SessionConfig::from_toml_str("retry_interval_ms = 50\nmessage_wait_ms = 10").is_err());
        assert!(SessionConfig::from_toml_str("max_timeouts = 0").is_err());
        assert!(SessionConfig::from_toml_str("colour = \"red\"").is_err());
    }
}
