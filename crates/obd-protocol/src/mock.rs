//! Simulated ELM327 Adapter
//!
//! Runs an in-memory adapter on the far end of a `tokio::io::duplex` pipe,
//! so the full pipeline can run without hardware. Replies can be scripted
//! per request to reproduce silent adapters, garbled frames and the like.

use crate::error::ObdError;
use crate::transport::{BoxedLink, ConnectFuture, Connector};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

/// A scripted adapter reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Response body; echo (if enabled) and the prompt are added
    Text(String),
    /// Bytes written verbatim, no echo, no prompt
    Bytes(Vec<u8>),
    /// No reply at all
    Silence,
}

/// In-memory ELM327 simulation
#[derive(Debug, Clone)]
pub struct MockAdapter {
    echo: bool,
    scripted: HashMap<String, VecDeque<MockReply>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        // Real adapters power up with echo enabled
        Self {
            echo: true,
            scripted: HashMap::new(),
        }
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with echo on or off
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Queue a one-shot reply for `request`; later requests fall back to defaults
    pub fn script(mut self, request: &str, reply: MockReply) -> Self {
        self.scripted
            .entry(normalize(request))
            .or_default()
            .push_back(reply);
        self
    }

    /// Spawn the adapter task and return the client end of the link
    pub fn spawn(self) -> DuplexStream {
        let (client, device) = duplex(1024);
        tokio::spawn(self.run(device));
        client
    }

    async fn run(mut self, mut device: DuplexStream) {
        let mut line = Vec::new();
        let mut chunk = [0u8; 64];

        loop {
            let n = match device.read(&mut chunk).await {
                Ok(0) | Err(_) => {
                    debug!("Mock adapter link closed");
                    return;
                }
                Ok(n) => n,
            };

            for &byte in &chunk[..n] {
                match byte {
                    b'\r' => {
                        let request = String::from_utf8_lossy(&line).into_owned();
                        line.clear();
                        if let Some(reply) = self.respond(&request) {
                            if device.write_all(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    b'\n' => {}
                    other => line.push(other),
                }
            }
        }
    }

    fn respond(&mut self, request: &str) -> Option<Vec<u8>> {
        let command = normalize(request);
        if command.is_empty() {
            return None;
        }
        trace!(command = %command, "Mock adapter request");

        let reply = self
            .scripted
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| MockReply::Text(default_reply(&command).to_string()));

        let body = match reply {
            MockReply::Silence => return None,
            MockReply::Bytes(bytes) => return Some(bytes),
            MockReply::Text(body) => body,
        };

        let mut out = String::new();
        if self.echo {
            out.push_str(request.trim());
            out.push('\r');
        }
        out.push_str(&body);
        out.push_str("\r\r>");

        match command.as_str() {
            "ATZ" | "ATE1" => self.echo = true,
            "ATE0" => self.echo = false,
            _ => {}
        }
        Some(out.into_bytes())
    }
}

/// Canned replies for a warm engine at idle-ish revs
fn default_reply(command: &str) -> &'static str {
    match command {
        "ATZ" => "\rELM327 v1.5",
        "ATI" => "ELM327 v1.5",
        "ATRV" => "12.6V",
        "ATE0" | "ATE1" | "ATL0" | "ATL1" | "ATS0" | "ATS1" | "ATH0" | "ATH1" => "OK",
        c if c.starts_with("ATSP") || c.starts_with("ATST") || c.starts_with("ATAT") => "OK",

        "0100" => "41 00 BE 3F A8 13",
        "0104" => "41 04 64",       // Engine load: 39.2%
        "0105" => "41 05 73",       // Coolant temp: 75°C
        "0106" => "41 06 80",       // Short fuel trim: 0%
        "0107" => "41 07 82",       // Long fuel trim: 1.6%
        "010B" => "41 0B 21",       // MAP: 33 kPa
        "010C" => "41 0C 1B 58",    // RPM: 1750
        "010D" => "41 0D 28",       // Speed: 40 km/h
        "010F" => "41 0F 38",       // Intake air temp: 16°C
        "0110" => "41 10 01 F4",    // MAF: 5.00 g/s
        "0111" => "41 11 45",       // Throttle: 27.1%
        "0114" => "41 14 5A FF",    // O2: 0.450 V
        "011F" => "41 1F 00 3C",    // Runtime: 60 s
        "012F" => "41 2F 80",       // Fuel level: 50.2%
        "0146" => "NO DATA",        // Ambient air temp unsupported

        _ => "?",
    }
}

fn normalize(request: &str) -> String {
    request
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Connector that hands out a fresh [`MockAdapter`] per connect attempt
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    adapter: MockAdapter,
    refuse: Option<String>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(adapter: MockAdapter) -> Self {
        Self {
            adapter,
            ..Default::default()
        }
    }

    /// Connector whose every attempt fails, as an unpaired device would
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            refuse: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Number of connect attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, device: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = &self.refuse {
                return Err(ObdError::Connection(format!("{}: {}", device, reason)));
            }
            debug!(device, "Spawning mock OBD adapter");
            Ok(Box::new(self.adapter.clone().spawn()) as BoxedLink)
        })
    }
}
