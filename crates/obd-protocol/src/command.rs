//! Command Catalog
//!
//! An [`ObdCommand`] pairs the name published on the result stream with the
//! request text sent to the adapter. Commands are immutable once built.

use crate::error::ObdError;
use crate::pid::Pid;
use crate::protocol::ObdProtocol;
use serde::{Deserialize, Serialize};

/// Name of the privileged adapter reset command
pub const RESET_NAME: &str = "RESET";

/// How a command's response is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// ELM327 AT command, textual response
    At,
    /// Mode 01 PID query, hex response
    Pid(Pid),
    /// Arbitrary request, response passed through as text
    Raw,
}

/// A single request to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObdCommand {
    name: String,
    request: String,
    kind: CommandKind,
}

impl ObdCommand {
    /// Mode 01 PID query
    pub fn pid(pid: Pid) -> Self {
        Self {
            name: pid.name().to_string(),
            request: pid.request(),
            kind: CommandKind::Pid(pid),
        }
    }

    /// AT command with a textual response
    pub fn at(name: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: request.into(),
            kind: CommandKind::At,
        }
    }

    /// Raw request whose response is passed through untouched
    pub fn raw(name: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: request.into(),
            kind: CommandKind::Raw,
        }
    }

    /// Full adapter reset (`ATZ`)
    pub fn reset() -> Self {
        Self::at(RESET_NAME, "ATZ")
    }

    /// Disable command echo (`ATE0`)
    pub fn echo_off() -> Self {
        Self::at("ECHO_OFF", "ATE0")
    }

    /// Disable line feeds after carriage returns (`ATL0`)
    pub fn line_feed_off() -> Self {
        Self::at("LINE_FEED_OFF", "ATL0")
    }

    /// Adapter-side response timeout (`ATSTxx`, in 4 ms units)
    pub fn adapter_timeout(timeout_ms: u64) -> Self {
        let units = (timeout_ms / 4).clamp(1, 255);
        Self::at("ADAPTER_TIMEOUT", format!("ATST{:02X}", units))
    }

    /// Protocol selection (`ATSPn`)
    pub fn select_protocol(protocol: ObdProtocol) -> Self {
        Self::at("SELECT_PROTOCOL", protocol.to_elm_command())
    }

    /// Adapter identification (`ATI`)
    pub fn adapter_version() -> Self {
        Self::at("ADAPTER_VERSION", "ATI")
    }

    /// Battery voltage as measured by the adapter (`ATRV`)
    pub fn battery_voltage() -> Self {
        Self::at("BATTERY_VOLTAGE", "ATRV")
    }

    /// Commands sent after connecting and after every reset
    pub fn init_sequence(protocol: ObdProtocol, adapter_timeout_ms: u64) -> Vec<Self> {
        vec![
            Self::echo_off(),
            Self::line_feed_off(),
            Self::adapter_timeout(adapter_timeout_ms),
            Self::select_protocol(protocol),
        ]
    }

    /// Look up a catalog command by name (case-insensitive)
    pub fn by_name(name: &str) -> Result<Self, ObdError> {
        if let Some(pid) = Pid::from_name(name) {
            return Ok(Self::pid(pid));
        }

        let command = match name.trim().to_ascii_uppercase().as_str() {
            RESET_NAME => Self::reset(),
            "ECHO_OFF" => Self::echo_off(),
            "LINE_FEED_OFF" => Self::line_feed_off(),
            "ADAPTER_VERSION" => Self::adapter_version(),
            "BATTERY_VOLTAGE" => Self::battery_voltage(),
            _ => return Err(ObdError::UnknownCommand(name.to_string())),
        };
        Ok(command)
    }

    /// Name used for de-duplication and on the result stream
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request text without terminator
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Response interpretation
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Whether this is the adapter reset
    pub fn is_reset(&self) -> bool {
        self.name == RESET_NAME
    }

    /// Polling priority (higher = more important)
    pub fn priority(&self) -> u8 {
        match self.kind {
            CommandKind::Pid(pid) => pid.sampling_priority(),
            CommandKind::At | CommandKind::Raw => 0,
        }
    }
}
