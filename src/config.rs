//! Environment-driven configuration, in the shape of `chopin_core::config::Config`:
//! every field has a sane default and a missing/unparseable env var falls back
//! to it rather than failing startup.
use std::time::Duration;

/// HTTP server configuration (§6).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("WICK_HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("WICK_HTTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            workers: std::env::var("WICK_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(num_cpus::get),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: num_cpus::get(),
        }
    }
}

/// WebSocket server configuration (§3 "Server configuration").
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub host: String,
    pub port: u16,
    pub max_inactivity: Duration,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
}

impl WsConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("WICK_WS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("WICK_WS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8081),
            max_inactivity: Duration::from_secs(
                std::env::var("WICK_MAX_INACTIVITY_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            max_message_size: std::env::var("WICK_MAX_MESSAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16 * 1024 * 1024),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WICK_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_inactivity: Duration::from_secs(300),
            max_message_size: 16 * 1024 * 1024,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_config_defaults() {
        let cfg = HttpConfig::default();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.workers >= 1);
    }

    #[test]
    fn ws_config_defaults() {
        let cfg = WsConfig::default();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.max_inactivity, Duration::from_secs(300));
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
    }
}
