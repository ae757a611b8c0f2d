//! Configuration module
//!
//! Handles loading and saving KeyBridge configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{ClientConfig, NetworkConfig as SessionConfig};
use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Device to talk to
    #[serde(default)]
    pub target: TargetConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Target device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Host name or address of the device
    #[serde(default = "default_host")]
    pub host: String,
    /// Network ADB port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in ms
    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,
    /// Socket read/write timeout in ms
    #[serde(default = "default_timeout")]
    pub read_timeout_ms: u64,
    /// Local stream id used for every OPEN
    #[serde(default = "default_local_stream_id")]
    pub local_stream_id: u32,
    /// Verify checksum and magic of received packets
    #[serde(default)]
    pub strict_checksums: bool,
    /// Deadline for one whole command in ms (unset = socket timeouts only)
    pub operation_timeout_ms: Option<u64>,
}

fn default_timeout() -> u64 {
    5000
}

fn default_local_stream_id() -> u32 {
    1
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout(),
            read_timeout_ms: default_timeout(),
            local_stream_id: default_local_stream_id(),
            strict_checksums: false,
            operation_timeout_ms: None,
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in ms
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("keybridge/config.toml")),
            Some(PathBuf::from("./keybridge.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Build the client settings described by this configuration
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            network: SessionConfig {
                connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
                read_timeout: Duration::from_millis(self.network.read_timeout_ms),
                local_stream_id: self.network.local_stream_id,
                strict_checksums: self.network.strict_checksums,
            },
            max_attempts: self.reconnect.max_attempts,
            retry_delay: Duration::from_millis(self.reconnect.retry_delay_ms),
            operation_timeout: self.network.operation_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        target: TargetConfig {
            host: "192.168.1.50".to_string(),
            port: DEFAULT_PORT,
        },
        network: NetworkConfig {
            operation_timeout_ms: Some(15_000),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target.port, DEFAULT_PORT);
        assert_eq!(config.reconnect.max_attempts, 3);

        let client = config.client_config();
        assert_eq!(client.network.read_timeout, Duration::from_secs(5));
        assert_eq!(client.network.connect_timeout, Duration::from_secs(5));
        assert_eq!(client.network.local_stream_id, 1);
        assert_eq!(client.retry_delay, Duration::from_secs(5));
        assert!(client.operation_timeout.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.target.host = "tablet.local".to_string();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.target.host, "tablet.local");
        assert_eq!(loaded.target.port, config.target.port);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[target]\nhost = \"10.0.0.7\"\n\n[network]\nstrict_checksums = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target.host, "10.0.0.7");
        assert_eq!(config.target.port, DEFAULT_PORT);
        assert!(config.network.strict_checksums);
        assert_eq!(config.network.read_timeout_ms, 5000);
        assert_eq!(config.reconnect.retry_delay_ms, 5000);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/keybridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.target.host, "192.168.1.50");
        assert_eq!(
            parsed.client_config().operation_timeout,
            Some(Duration::from_secs(15))
        );
    }
}
