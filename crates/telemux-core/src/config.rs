//! Configuration resolution for telemux.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (JSON, passed explicitly with `--config`)
//! 3. Environment variables (`TELEMUX_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Path reserved for the health endpoint.
pub const HEALTH_PATH: &str = "/healthz";

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// UDP address the datagram ingestor binds to.
    pub udp_addr: SocketAddr,
    /// TCP address the HTTP/WebSocket listener binds to.
    pub http_addr: SocketAddr,
    /// Path accepting WebSocket upgrades.
    pub ws_path: String,
    /// Receive buffer size; larger datagrams are truncated to this length.
    pub max_datagram_bytes: usize,
    /// Number of messages the dispatcher may hold ahead of the broadcaster.
    pub dispatch_capacity: usize,
    /// Deadline for a single write to one consumer.
    pub write_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            ws_path: "/ws".to_string(),
            max_datagram_bytes: 1024,
            dispatch_capacity: 1,
            write_timeout_ms: 5_000,
        }
    }
}

impl RelayConfig {
    /// Per-consumer write deadline as a [`Duration`].
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Check the configuration for values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch_capacity == 0 {
            return Err(Error::Config(
                "dispatch_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_datagram_bytes == 0 || self.max_datagram_bytes > MAX_UDP_PAYLOAD {
            return Err(Error::Config(format!(
                "max_datagram_bytes must be between 1 and {MAX_UDP_PAYLOAD}, got {}",
                self.max_datagram_bytes
            )));
        }
        if !self.ws_path.starts_with('/') {
            return Err(Error::Config(format!(
                "ws_path must start with '/', got {:?}",
                self.ws_path
            )));
        }
        if self.ws_path == HEALTH_PATH {
            return Err(Error::Config(format!(
                "ws_path must not shadow the health endpoint {HEALTH_PATH}"
            )));
        }
        if self.write_timeout_ms == 0 {
            return Err(Error::Config(
                "write_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration: defaults, then the optional file, then `TELEMUX_*`
/// environment variables.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => RelayConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Read a JSON config file. Missing fields fall back to their defaults.
pub fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply environment overrides using `lookup` to resolve variables.
///
/// Unlike a missing variable, a present but unparsable one is an error.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("TELEMUX_UDP_ADDR") {
        config.udp_addr = parse_env("TELEMUX_UDP_ADDR", &val)?;
    }
    if let Some(val) = lookup("TELEMUX_HTTP_ADDR") {
        config.http_addr = parse_env("TELEMUX_HTTP_ADDR", &val)?;
    }
    if let Some(val) = lookup("TELEMUX_WS_PATH") {
        config.ws_path = val;
    }
    if let Some(val) = lookup("TELEMUX_MAX_DATAGRAM_BYTES") {
        config.max_datagram_bytes = parse_env("TELEMUX_MAX_DATAGRAM_BYTES", &val)?;
    }
    if let Some(val) = lookup("TELEMUX_DISPATCH_CAPACITY") {
        config.dispatch_capacity = parse_env("TELEMUX_DISPATCH_CAPACITY", &val)?;
    }
    if let Some(val) = lookup("TELEMUX_WRITE_TIMEOUT_MS") {
        config.write_timeout_ms = parse_env("TELEMUX_WRITE_TIMEOUT_MS", &val)?;
    }
    Ok(())
}

fn parse_env<T>(key: &str, val: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid value for {key} ({val:?}): {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_matches_gateway_ports() {
        let config = RelayConfig::default();
        assert_eq!(config.udp_addr.port(), 8000);
        assert_eq!(config.http_addr.port(), 8081);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.max_datagram_bytes, 1024);
        assert_eq!(config.dispatch_capacity, 1);
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = RelayConfig {
            dispatch_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_datagram_limits_out_of_range() {
        for size in [0, MAX_UDP_PAYLOAD + 1] {
            let config = RelayConfig {
                max_datagram_bytes: size,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "size {size} should be rejected");
        }
        let config = RelayConfig {
            max_datagram_bytes: MAX_UDP_PAYLOAD,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_ws_paths() {
        for path in ["ws", "", HEALTH_PATH] {
            let config = RelayConfig {
                ws_path: path.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "path {path:?} should be rejected");
        }
    }

    #[test]
    fn validate_rejects_zero_write_timeout() {
        let config = RelayConfig {
            write_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"udp_addr": "127.0.0.1:9000", "max_datagram_bytes": 4096}}"#
        )
        .unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.udp_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.max_datagram_bytes, 4096);
        assert_eq!(config.http_addr.port(), 8081);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn config_file_parse_error_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_config_file(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("TELEMUX_HTTP_ADDR", "127.0.0.1:9090"),
            ("TELEMUX_WS_PATH", "/stream"),
            ("TELEMUX_DISPATCH_CAPACITY", " 8 "),
            ("TELEMUX_WRITE_TIMEOUT_MS", "250"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.ws_path, "/stream");
        assert_eq!(config.dispatch_capacity, 8);
        assert_eq!(config.write_timeout(), Duration::from_millis(250));
        assert_eq!(config.udp_addr.port(), 8000);
    }

    #[test]
    fn unparsable_env_override_is_an_error() {
        let mut config = RelayConfig::default();
        let result = apply_env_overrides(&mut config, |key| {
            (key == "TELEMUX_MAX_DATAGRAM_BYTES").then(|| "lots".to_string())
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("TELEMUX_MAX_DATAGRAM_BYTES"));
    }
}
