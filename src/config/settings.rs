//! Configuration settings for the finwire server and client.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::TransportError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port; 0 lets the OS pick one.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection and framing limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Maximum concurrently open client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-frame write timeout in seconds (0 disables it).
    #[serde(default = "default_write_timeout")]
    pub write_timeout_seconds: u64,
    /// Close connections idle for this many seconds (0 disables it).
    #[serde(default)]
    pub idle_timeout_seconds: u64,
    /// How long `stop_server` waits for connection tasks to finish.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Client connector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Dial timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Reply timeout for `request` in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_max_frame_size() -> usize {
    1_048_576 // 1MB
}

fn default_max_connections() -> usize {
    100
}

fn default_write_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string passed to the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            max_connections: default_max_connections(),
            write_timeout_seconds: default_write_timeout(),
            idle_timeout_seconds: 0,
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

impl LimitsConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        seconds(self.write_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        seconds(self.idle_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        seconds(self.connect_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        seconds(self.request_timeout_seconds)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TransportError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml_str(&content).map_err(|e| TransportError::Config {
            message: format!("Invalid config file '{}': {}", path.display(), e),
        })
    }

    /// Load settings from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, TransportError> {
        let settings: Settings = toml::from_str(content).map_err(|e| TransportError::Config {
            message: e.to_string(),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), TransportError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(TransportError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(TransportError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.limits.max_frame_size == 0 {
            return Err(TransportError::Config {
                message: "limits.max_frame_size must be greater than zero".to_string(),
            });
        }

        if self.limits.max_connections == 0 {
            return Err(TransportError::Config {
                message: "limits.max_connections must be greater than zero".to_string(),
            });
        }

        if self.server.host.trim().is_empty() {
            return Err(TransportError::Config {
                message: "server.host must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.bind_address(), "127.0.0.1:5050");
        assert_eq!(settings.limits.max_frame_size, 1_048_576);
        assert_eq!(settings.limits.idle_timeout(), None);
        assert_eq!(settings.limits.write_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [server]
            port = 6060

            [limits]
            idle_timeout_seconds = 120
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6060);
        assert_eq!(settings.limits.idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(settings.client.request_timeout_seconds, 30);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for toml in [
            "[logging]\nlevel = \"loud\"",
            "[logging]\nformat = \"xml\"",
            "[limits]\nmax_connections = 0",
            "[limits]\nmax_frame_size = 0",
            "[server]\nport = \"not a port\"",
        ] {
            assert!(
                matches!(Settings::from_toml_str(toml), Err(TransportError::Config { .. })),
                "expected config error for {toml}"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhost = \"0.0.0.0\"\nport = 7070").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.server.bind_address(), "0.0.0.0:7070");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.server.port, 5050);
        assert!(Settings::load(dir.path().join("absent.toml")).is_err());
    }
}
