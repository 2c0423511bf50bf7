//! Client/server configuration, plus the layered environment/TOML
//! loading the CLI binaries build on top of it.

use crate::error::ConfigError;
use crate::model::Imei;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub imei: Imei,
    pub heartbeat_seconds: u32,
    pub location_seconds: u32,
    pub reconnect_seconds: u32,
    pub max_reconnect_attempts: i32,
}

impl ClientConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u32,
        imei: &str,
        heartbeat_seconds: u32,
        location_seconds: u32,
        reconnect_seconds: u32,
        max_reconnect_attempts: i32,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 || port > 65535 {
            return Err(ConfigError::InvalidPort(port));
        }
        if !(5..=300).contains(&heartbeat_seconds) {
            return Err(ConfigError::InvalidHeartbeatInterval(heartbeat_seconds));
        }
        if !(5..=3600).contains(&location_seconds) {
            return Err(ConfigError::InvalidLocationInterval(location_seconds));
        }
        let imei = Imei::normalize(imei)?;
        Ok(Self {
            host,
            port: port as u16,
            imei,
            heartbeat_seconds,
            location_seconds,
            reconnect_seconds,
            max_reconnect_attempts,
        })
    }

    pub fn default_for(host: impl Into<String>, imei: &str) -> Result<Self, ConfigError> {
        Self::new(host, 5023, imei, 30, 60, 10, -1)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>, port: u32) -> Result<Self, ConfigError> {
        if port == 0 || port > 65535 {
            return Err(ConfigError::InvalidPort(port));
        }
        Ok(Self { bind_addr: bind_addr.into(), port: port as u16 })
    }

    pub fn default_bind() -> Result<Self, ConfigError> {
        Self::new("0.0.0.0", 5023)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_port() {
        assert!(ClientConfig::new("h", 70000, "123456789012345", 30, 60, 10, -1).is_err());
    }

    #[test]
    fn rejects_out_of_range_heartbeat() {
        assert!(ClientConfig::new("h", 5023, "123456789012345", 1, 60, 10, -1).is_err());
    }

    #[test]
    fn accepts_default_shape() {
        let c = ClientConfig::default_for("127.0.0.1", "123456789012345").unwrap();
        assert_eq!(c.port, 5023);
        assert_eq!(c.heartbeat_seconds, 30);
    }
}
