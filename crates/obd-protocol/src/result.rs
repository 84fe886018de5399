//! Decoded command results

use serde::{Deserialize, Serialize};

/// Classification of a command outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    /// Response decoded into a value
    Ok,
    /// Adapter reported that the vehicle has no data for this request
    NoData,
    /// Transport failure, adapter error or malformed frame
    Failed,
}

/// Result of one command.
///
/// `raw == None` means nothing usable came back from the transport. A
/// no-data response keeps the sentinel in `raw` so the two cases stay
/// distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObdResult {
    /// Command name
    pub name: String,
    /// Outcome classification
    pub status: ResultStatus,
    /// Response text with echo and prompt removed
    pub raw: Option<String>,
    /// Unit-converted display value
    pub formatted: Option<String>,
    /// Numeric value for PID commands
    pub value: Option<f64>,
    /// Failure reason
    pub error: Option<String>,
}

impl ObdResult {
    /// Successfully decoded response
    pub fn ok(name: impl Into<String>, raw: String, formatted: String, value: Option<f64>) -> Self {
        Self {
            name: name.into(),
            status: ResultStatus::Ok,
            raw: Some(raw),
            formatted: Some(formatted),
            value,
            error: None,
        }
    }

    /// Protocol-reported "no data available"
    pub fn no_data(name: impl Into<String>, sentinel: &str) -> Self {
        Self {
            name: name.into(),
            status: ResultStatus::NoData,
            raw: Some(sentinel.to_string()),
            formatted: None,
            value: None,
            error: None,
        }
    }

    /// Failed command, keeping whatever raw text arrived
    pub fn failed(name: impl Into<String>, raw: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ResultStatus::Failed,
            raw,
            formatted: None,
            value: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    pub fn is_no_data(&self) -> bool {
        self.status == ResultStatus::NoData
    }

    pub fn is_failed(&self) -> bool {
        self.status == ResultStatus::Failed
    }
}
