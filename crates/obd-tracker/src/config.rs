//! Tracker configuration

use crate::TrackerError;
use obd_protocol::{CodecConfig, ObdCommand, ObdError, ObdProtocol, TransportConfig};
use obd_scheduler::ProducerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Device identifier that selects the built-in simulated adapter
pub const MOCK_DEVICE: &str = "mock";

/// Prefix for environment overrides, e.g. `OBD_TRACKER__PRODUCER__READ_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "OBD_TRACKER";

/// A command polled on a fixed interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEntry {
    /// Catalog name, e.g. "RPM"
    pub name: String,
    pub interval_ms: u64,
}

impl PollEntry {
    pub fn new(name: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            interval_ms,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
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

/// Top-level tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Serial device path, or "mock"
    pub device: String,
    pub baud_rate: u32,
    /// OBD protocol selected during initialization
    pub protocol: ObdProtocol,
    /// Adapter-side response timeout set during initialization
    pub adapter_timeout_ms: u64,
    /// How often the binary logs the result table
    pub report_interval_ms: u64,
    /// Serve Prometheus metrics on this address when set
    pub metrics_listen: Option<SocketAddr>,
    pub codec: CodecConfig,
    pub transport: TransportConfig,
    pub producer: ProducerConfig,
    pub poll: Vec<PollEntry>,
    pub logging: LoggingConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device: MOCK_DEVICE.to_string(),
            baud_rate: 38400,
            protocol: ObdProtocol::Auto,
            adapter_timeout_ms: 200,
            report_interval_ms: 5000,
            metrics_listen: None,
            codec: CodecConfig::default(),
            transport: TransportConfig::default(),
            producer: ProducerConfig::default(),
            poll: vec![
                PollEntry::new("RPM", 200),
                PollEntry::new("SPEED", 200),
                PollEntry::new("ENGINE_LOAD", 500),
                PollEntry::new("COOLANT_TEMP", 1000),
                PollEntry::new("MAF", 1000),
                PollEntry::new("FUEL_LEVEL", 10_000),
            ],
            logging: LoggingConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, TrackerError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Resolve the poll list against the command catalog
    pub fn poll_commands(&self) -> Result<Vec<(ObdCommand, Duration)>, ObdError> {
        self.poll
            .iter()
            .map(|entry| {
                let command = ObdCommand::by_name(&entry.name)?;
                Ok((command, Duration::from_millis(entry.interval_ms)))
            })
            .collect()
    }

    /// Commands sent after every connect or reset
    pub fn init_sequence(&self) -> Vec<ObdCommand> {
        ObdCommand::init_sequence(self.protocol, self.adapter_timeout_ms)
    }

    pub fn is_mock(&self) -> bool {
        self.device == MOCK_DEVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert!(config.is_mock());
        assert_eq!(config.producer.read_timeout_ms, 2000);
        assert_eq!(config.codec.no_data_sentinel, "NODATA");
        assert_eq!(config.poll_commands().unwrap().len(), config.poll.len());
        assert_eq!(config.init_sequence().len(), 4);
    }

    #[test]
    fn test_load_file_over_defaults() {
        let path = std::env::temp_dir().join(format!("obd-tracker-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
device = "/dev/rfcomm0"
baud_rate = 9600

[producer]
read_timeout_ms = 750

[codec]
no_data_sentinel = "NO_DATA"

[[poll]]
name = "SPEED"
interval_ms = 100
"#,
        )
        .unwrap();

        let config = TrackerConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.device, "/dev/rfcomm0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.producer.read_timeout_ms, 750);
        assert_eq!(config.producer.stop_timeout_ms, 5000);
        assert_eq!(config.codec.no_data_sentinel, "NO_DATA");
        assert_eq!(config.poll, vec![PollEntry::new("SPEED", 100)]);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("obd-tracker-does-not-exist.toml");
        assert!(matches!(
            TrackerConfig::load(Some(path.as_path())),
            Err(TrackerError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_poll_name() {
        let config = TrackerConfig {
            poll: vec![PollEntry::new("WARP_CORE", 100)],
            ..Default::default()
        };
        assert!(matches!(
            config.poll_commands(),
            Err(ObdError::UnknownCommand(_))
        ));
    }
}
