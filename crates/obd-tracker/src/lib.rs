//! OBD-II Tracker
//!
//! Wires the transport, job queue, producer and poller into a session and
//! keeps a table of the latest reading per command.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod results;
pub mod session;

pub use config::{LoggingConfig, PollEntry, TrackerConfig, MOCK_DEVICE};
pub use results::{ResultAggregator, ResultEntry, ResultTable};
pub use session::ObdSession;

/// Tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Obd(#[from] obd_protocol::ObdError),

    #[error(transparent)]
    Scheduler(#[from] obd_scheduler::SchedulerError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), TrackerError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| TrackerError::Logging(format!("unknown level '{}'", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| TrackerError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            json: false,
        };
        assert!(matches!(init_logging(&config), Err(TrackerError::Logging(_))));
    }
}
