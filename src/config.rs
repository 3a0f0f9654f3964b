//! Bind and connection configuration, sourced from environment variables.
//!
//! Read by the launcher that embeds the listener in the host application's
//! process:
//! - `MOLREMOTE_HOST`: bind address (server) / server hostname (client)
//! - `MOLREMOTE_PORT`: first port to try (default 9123)
//! - `MOLREMOTE_PORTS_TO_TRY`: consecutive ports tried when busy (default 5)
//!
//! The server default is loopback-only. Exposing the host application's
//! mutable state to the network requires the explicit `0.0.0.0` opt-in;
//! encryption and authentication are delegated to an external tunnel.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9123;
pub const DEFAULT_PORTS_TO_TRY: u16 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback bind address; connections only from the same machine.
pub const LOOPBACK: &str = "127.0.0.1";
/// All-interfaces bind address; allows connections from other machines.
pub const ALL_INTERFACES: &str = "0.0.0.0";

const ENV_HOST: &str = "MOLREMOTE_HOST";
const ENV_PORT: &str = "MOLREMOTE_PORT";
const ENV_PORTS_TO_TRY: &str = "MOLREMOTE_PORTS_TO_TRY";

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address. [`LOOPBACK`] unless explicitly overridden.
    pub host: String,
    /// First port to try; 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Number of consecutive ports tried when `port` is busy.
    pub ports_to_try: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: LOOPBACK.to_string(),
            port: DEFAULT_PORT,
            ports_to_try: DEFAULT_PORTS_TO_TRY,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment, falling back to
    /// defaults for anything absent or unparseable.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: get(ENV_HOST).unwrap_or(defaults.host),
            port: get(ENV_PORT)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            ports_to_try: get(ENV_PORTS_TO_TRY)
                .and_then(|v| v.trim().parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.ports_to_try),
        }
    }

    /// Explicit opt-in to accepting connections from other machines.
    pub fn bind_all_interfaces(mut self) -> Self {
        self.host = ALL_INTERFACES.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn is_loopback_only(&self) -> bool {
        self.host == LOOPBACK || self.host == "localhost" || self.host == "::1"
    }
}

/// Client session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub hostname: String,
    pub port: u16,
    /// Timeout for establishing the connection. Calls themselves block for
    /// however long the remote command takes.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            hostname: get(ENV_HOST).unwrap_or(defaults.hostname),
            port: get(ENV_PORT)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            connect_timeout: defaults.connect_timeout,
        }
    }

    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults_are_loopback_only() {
        let config = ServerConfig::default();
        assert_eq!(config.host, LOOPBACK);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ports_to_try, DEFAULT_PORTS_TO_TRY);
        assert!(config.is_loopback_only());
    }

    #[test]
    fn test_all_interfaces_is_an_explicit_opt_in() {
        let config = ServerConfig::default().bind_all_interfaces();
        assert_eq!(config.host, ALL_INTERFACES);
        assert!(!config.is_loopback_only());
    }

    #[test]
    fn test_server_config_from_vars() {
        let config = ServerConfig::from_vars(|name| match name {
            "MOLREMOTE_HOST" => Some("0.0.0.0".to_string()),
            "MOLREMOTE_PORT" => Some("9200".to_string()),
            "MOLREMOTE_PORTS_TO_TRY" => Some("2".to_string()),
            _ => None,
        });
        assert_eq!(config.host, ALL_INTERFACES);
        assert_eq!(config.port, 9200);
        assert_eq!(config.ports_to_try, 2);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = ServerConfig::from_vars(|name| match name {
            "MOLREMOTE_PORT" => Some("not-a-port".to_string()),
            "MOLREMOTE_PORTS_TO_TRY" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ports_to_try, DEFAULT_PORTS_TO_TRY);
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
