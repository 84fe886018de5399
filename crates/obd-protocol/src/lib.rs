//! OBD-II Protocol Implementation
//!
//! This crate provides async serial communication with ELM327-compatible
//! OBD-II adapters: the prompt-framed transport, the command catalog and the
//! codec that turns adapter replies into typed results.

mod codec;
mod command;
mod error;
pub mod mock;
mod pid;
mod protocol;
mod result;
mod transport;

pub use codec::{CodecConfig, CommandCodec, DEFAULT_NO_DATA_SENTINEL, PROMPT, TERMINATOR};
pub use command::{CommandKind, ObdCommand, RESET_NAME};
pub use error::ObdError;
pub use pid::Pid;
pub use protocol::ObdProtocol;
pub use result::{ObdResult, ResultStatus};
pub use transport::{
    BoxedLink, ConnectFuture, ConnectionState, Connector, Link, SerialConnector, Transport,
    TransportConfig,
};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
