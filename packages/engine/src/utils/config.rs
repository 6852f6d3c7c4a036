// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Loaded with priority (lowest first):
//! 1. Built-in defaults
//! 2. `config/portsniffer.toml` (optional) or an explicit file
//! 3. Environment variables prefixed with `PORTSNIFFER__`,
//!    e.g. `PORTSNIFFER__CONTROL__PORT=9000`

use crate::capture::pool::PoolConfig;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Default per-device log capacity.
///
/// Worst case is a 115200 baud port read one byte at a time (14400 bytes/s)
/// with a consumer polling every 10 ms: 144 entries between two polls.
pub const DEFAULT_MAX_ENTRIES_PER_DEVICE: usize = 160;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub pool: PoolConfig,
    pub deferred: DeferredConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub devices: DevicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum number of buffered events per device
    pub max_entries_per_device: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_entries_per_device: DEFAULT_MAX_ENTRIES_PER_DEVICE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    /// Maximum number of read handoffs waiting for the worker
    pub queue_depth: usize,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self { queue_depth: 1024 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl ControlConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| EngineError::InvalidRequest(format!("Invalid control address: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9184".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Port names the enumeration service reports as attachable
    pub attachable: Vec<String>,

    /// Port names to attach at start-up
    pub attach: Vec<String>,
}

impl EngineConfig {
    /// Load from `config/portsniffer.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::build(File::with_name("config/portsniffer").required(false))
    }

    /// Load from an explicit file and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build(file: File<config::FileSourceFile, config::FileFormat>) -> Result<Self> {
        let config: EngineConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("PORTSNIFFER")
                    .prefix_separator("__")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capture.max_entries_per_device == 0 {
            return Err(EngineError::InvalidRequest(
                "capture.max_entries_per_device must be greater than zero".to_string(),
            ));
        }
        if self.pool.capacity == 0 {
            return Err(EngineError::InvalidRequest(
                "pool.capacity must be greater than zero".to_string(),
            ));
        }
        if self.deferred.queue_depth == 0 {
            return Err(EngineError::InvalidRequest(
                "deferred.queue_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.capture.max_entries_per_device, 160);
        assert_eq!(config.control.port, 7878);
        assert!(!config.metrics.enabled);
        assert!(config.devices.attach.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[capture]
max_entries_per_device = 32

[control]
port = 9100

[devices]
attachable = ["COM1", "COM2", "LPT1"]
attach = ["COM1"]
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.capture.max_entries_per_device, 32);
        assert_eq!(config.control.port, 9100);
        assert_eq!(config.control.host, "127.0.0.1");
        assert_eq!(config.devices.attachable.len(), 3);
        assert_eq!(config.devices.attach, vec!["COM1".to_string()]);
        // Untouched sections keep their defaults
        assert_eq!(config.deferred.queue_depth, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = EngineConfig::default();
        config.capture.max_entries_per_device = 0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn test_socket_addr() {
        let config = ControlConfig::default();
        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.port(), 7878);
    }
}
