//! Scheduler Error Types

use obd_protocol::ObdError;
use thiserror::Error;

/// Errors raised by the job queue and producer lifecycle
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A state machine was asked to make a transition it does not allow
    #[error("Invalid {machine} transition: {from} -> {to}")]
    InvalidTransition {
        machine: &'static str,
        from: String,
        to: String,
    },

    /// Underlying protocol error
    #[error(transparent)]
    Obd(#[from] ObdError),
}

impl SchedulerError {
    pub(crate) fn transition(
        machine: &'static str,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        SchedulerError::InvalidTransition {
            machine,
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }
}
