//! ELM327 Command Codec
//!
//! Encodes commands into wire frames and classifies adapter responses.
//! Decoding is total: every input maps to an [`ObdResult`], malformed
//! frames included, so one bad frame can never end a session.

use crate::command::{CommandKind, ObdCommand};
use crate::pid::Pid;
use crate::result::ObdResult;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Request terminator
pub const TERMINATOR: u8 = b'\r';

/// Adapter prompt marking the end of a response
pub const PROMPT: u8 = b'>';

/// Default no-data sentinel, as reported by common OBD libraries
pub const DEFAULT_NO_DATA_SENTINEL: &str = "NODATA";

/// Adapter error replies, compared without whitespace
const ERROR_REPLIES: [&str; 12] = [
    "?",
    "ERROR",
    "UNABLETOCONNECT",
    "STOPPED",
    "BUSERROR",
    "BUSBUSY",
    "CANERROR",
    "BUFFERFULL",
    "FBERROR",
    "DATAERROR",
    "<DATAERROR",
    "<RXERROR",
];

/// Codec configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Response text meaning "no data available"; whitespace is ignored
    pub no_data_sentinel: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            no_data_sentinel: DEFAULT_NO_DATA_SENTINEL.to_string(),
        }
    }
}

/// Stateless encoder/decoder for ELM327 text frames
#[derive(Debug, Clone)]
pub struct CommandCodec {
    config: CodecConfig,
    sentinel_key: String,
}

impl CommandCodec {
    pub fn new(config: CodecConfig) -> Self {
        let sentinel_key = normalize(&config.no_data_sentinel);
        Self {
            config,
            sentinel_key,
        }
    }

    /// Configured no-data sentinel
    pub fn no_data_sentinel(&self) -> &str {
        &self.config.no_data_sentinel
    }

    /// Request bytes with the terminator appended
    pub fn encode(&self, command: &ObdCommand) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(command.request().len() + 1);
        bytes.extend_from_slice(command.request().as_bytes());
        bytes.push(TERMINATOR);
        bytes
    }

    /// Classify a raw response frame
    pub fn decode(&self, command: &ObdCommand, raw: &[u8]) -> ObdResult {
        let name = command.name();
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                return ObdResult::failed(
                    name,
                    Some(String::from_utf8_lossy(raw).into_owned()),
                    "response is not valid text",
                );
            }
        };

        let lines = payload_lines(command, text);
        let joined = lines.join("\n");
        trace!(command = name, response = %joined, "decoding response");

        if lines.is_empty() {
            return ObdResult::failed(name, Some(joined), "empty response");
        }

        let keys: Vec<String> = lines.iter().map(|line| normalize(line)).collect();

        // A data line from any ECU wins over no-data or error lines from others
        let frame = match command.kind() {
            CommandKind::Pid(pid) => {
                let result = self.decode_pid(name, pid, &keys, &joined);
                if result.is_ok() {
                    return result;
                }
                Some(result)
            }
            CommandKind::At | CommandKind::Raw => None,
        };

        if keys.iter().any(|k| self.is_sentinel(k)) {
            return ObdResult::no_data(name, &self.config.no_data_sentinel);
        }

        if let Some(reply) = keys.iter().find(|k| is_error_reply(k)) {
            let reason = format!("adapter replied {}", reply);
            return ObdResult::failed(name, Some(joined), reason);
        }

        frame.unwrap_or_else(|| ObdResult::ok(name, joined.clone(), joined, None))
    }

    fn is_sentinel(&self, key: &str) -> bool {
        !self.sentinel_key.is_empty() && key == self.sentinel_key
    }

    /// Decode a Mode 01 reply, taking the first line whose header matches
    fn decode_pid(&self, name: &str, pid: Pid, keys: &[String], joined: &str) -> ObdResult {
        let expected = [0x40 | crate::mode::CURRENT_DATA, pid.as_hex()];
        let raw = || Some(joined.to_string());

        for key in keys {
            if self.is_sentinel(key) || is_error_reply(key) {
                continue;
            }
            let bytes = match parse_hex(key) {
                Some(bytes) => bytes,
                None => return ObdResult::failed(name, raw(), format!("malformed frame '{}'", key)),
            };
            if bytes.len() < 2 || bytes[..2] != expected {
                continue;
            }
            return match pid.decode(&bytes[2..]) {
                Some(value) => ObdResult::ok(name, joined.to_string(), pid.format(value), Some(value)),
                None => ObdResult::failed(
                    name,
                    raw(),
                    format!(
                        "truncated frame: expected {} data bytes, got {}",
                        pid.response_bytes(),
                        bytes.len() - 2
                    ),
                ),
            };
        }

        ObdResult::failed(
            name,
            raw(),
            format!("no response header {:02X} {:02X}", expected[0], expected[1]),
        )
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

fn is_error_reply(key: &str) -> bool {
    ERROR_REPLIES.contains(&key)
}

/// Response lines with prompt, echo and progress chatter removed
fn payload_lines<'a>(command: &ObdCommand, text: &'a str) -> Vec<&'a str> {
    let request_key = normalize(command.request());
    let name_key = normalize(command.name());

    text.split(['\r', '\n'])
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == PROMPT as char))
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let key = normalize(line);
            key != request_key
                && key != name_key
                && !key.starts_with("SEARCHING")
                && !key.starts_with("BUSINIT")
        })
        .collect()
}

/// Uppercase with all whitespace removed
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Parse a whitespace-free hex string into bytes
fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultStatus;
    use proptest::prelude::*;

    fn codec() -> CommandCodec {
        CommandCodec::new(CodecConfig::default())
    }

    #[test]
    fn test_encode_appends_terminator() {
        assert_eq!(codec().encode(&ObdCommand::pid(Pid::Rpm)), b"010C\r".to_vec());
        assert_eq!(codec().encode(&ObdCommand::reset()), b"ATZ\r".to_vec());
    }

    #[test]
    fn test_rpm_with_name_echo() {
        let result = codec().decode(&ObdCommand::pid(Pid::Rpm), b"RPM\r41 0C 1B 58\r\r>");
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.name, "RPM");
        assert_eq!(result.formatted.as_deref(), Some("1750 rpm"));
        assert_eq!(result.raw.as_deref(), Some("41 0C 1B 58"));
    }

    #[test]
    fn test_rpm_with_request_echo_and_no_prompt() {
        // ((0x1A * 256) + 0xF8) / 4 = 1726
        let result = codec().decode(&ObdCommand::pid(Pid::Rpm), b"010C\r41 0C 1A F8\r");
        assert_eq!(result.formatted.as_deref(), Some("1726 rpm"));
    }

    #[test]
    fn test_spaces_off_and_searching() {
        let result = codec().decode(
            &ObdCommand::pid(Pid::Speed),
            b"SEARCHING...\r410D28\r\r>",
        );
        assert_eq!(result.formatted.as_deref(), Some("40 km/h"));
        assert_eq!(result.value, Some(40.0));
    }

    #[test]
    fn test_no_data_sentinel() {
        let result = codec().decode(&ObdCommand::pid(Pid::Maf), b"NO DATA\r\r>");
        assert_eq!(result.status, ResultStatus::NoData);
        assert_eq!(result.raw.as_deref(), Some("NODATA"));
        assert_eq!(result.formatted, None);
    }

    #[test]
    fn test_custom_sentinel() {
        let codec = CommandCodec::new(CodecConfig {
            no_data_sentinel: "NO_DATA".to_string(),
        });
        let result = codec.decode(&ObdCommand::pid(Pid::Maf), b"NO_DATA\r>");
        assert!(result.is_no_data());
        assert_eq!(result.raw.as_deref(), Some("NO_DATA"));
        assert!(codec.decode(&ObdCommand::pid(Pid::Maf), b"NO DATA\r>").is_failed());
    }

    #[test]
    fn test_adapter_error_reply() {
        let result = codec().decode(&ObdCommand::pid(Pid::Rpm), b"UNABLE TO CONNECT\r\r>");
        assert!(result.is_failed());
        assert_eq!(result.raw.as_deref(), Some("UNABLE TO CONNECT"));

        assert!(codec().decode(&ObdCommand::at("BOGUS", "ATXX"), b"?\r\r>").is_failed());
    }

    #[test]
    fn test_malformed_frames() {
        let rpm = ObdCommand::pid(Pid::Rpm);
        // Odd digit count
        assert!(codec().decode(&rpm, b"41 0C 1B 5\r>").is_failed());
        // Not hex
        assert!(codec().decode(&rpm, b"41 0C ZZ 58\r>").is_failed());
        // Header for a different PID
        assert!(codec().decode(&rpm, b"41 0D 28\r>").is_failed());
        // Truncated payload
        let truncated = codec().decode(&rpm, b"41 0C 1B\r>");
        assert!(truncated.is_failed());
        assert_eq!(truncated.raw.as_deref(), Some("41 0C 1B"));
        // Empty
        assert!(codec().decode(&rpm, b"\r\r>").is_failed());
        // Not UTF-8, raw kept
        let binary = codec().decode(&rpm, &[0xFF, 0xFE, b'>']);
        assert!(binary.is_failed());
        assert!(binary.raw.is_some());
    }

    #[test]
    fn test_at_reply_passthrough() {
        let result = codec().decode(&ObdCommand::reset(), b"ATZ\r\r\rELM327 v1.5\r\r>");
        assert!(result.is_ok());
        assert_eq!(result.formatted.as_deref(), Some("ELM327 v1.5"));

        let ok = codec().decode(&ObdCommand::echo_off(), b"ATE0\rOK\r\r>");
        assert_eq!(ok.formatted.as_deref(), Some("OK"));
    }

    #[test]
    fn test_multiple_ecus_first_match_wins() {
        let result = codec().decode(&ObdCommand::pid(Pid::CoolantTemp), b"7F 01 12\r41 05 73\r>");
        assert_eq!(result.formatted.as_deref(), Some("75 °C"));
    }

    #[test]
    fn test_data_line_beats_no_data_from_other_ecu() {
        let rpm = ObdCommand::pid(Pid::Rpm);
        for frame in [&b"NO DATA\r41 0C 1B 58\r\r>"[..], b"41 0C 1B 58\rNO DATA\r\r>"] {
            let result = codec().decode(&rpm, frame);
            assert!(result.is_ok());
            assert_eq!(result.formatted.as_deref(), Some("1750 rpm"));
        }

        // Without a matching data line, no data still wins over errors
        let result = codec().decode(&rpm, b"NO DATA\rCAN ERROR\r>");
        assert!(result.is_no_data());
    }

    proptest! {
        #[test]
        fn decode_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            let result = codec().decode(&ObdCommand::pid(Pid::Rpm), &raw);
            prop_assert_eq!(result.name.as_str(), "RPM");
            if result.is_ok() {
                prop_assert!(result.formatted.is_some());
            }
        }

        #[test]
        fn decode_text_never_panics(raw in "[0-9A-F >\\r\\n]{0,40}") {
            let result = codec().decode(&ObdCommand::pid(Pid::Maf), raw.as_bytes());
            prop_assert!(result.is_ok() || result.is_failed() || result.is_no_data());
        }
    }
}
