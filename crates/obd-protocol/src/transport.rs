//! Serial Transport
//!
//! Owns the byte-stream link to the adapter. Reads are framed by the ELM327
//! prompt and always bounded by a timeout. Connection state is held in a
//! watch channel; closing the transport flips that state, which unblocks
//! any read or write that is still waiting on the link. Every transition is
//! also sent on a broadcast channel so observers never miss one.

use crate::codec::PROMPT;
use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Link state as observed by the producer and UI collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connect attempt failed or the link broke; the caller must reconnect
    Failed,
}

/// Any connected byte stream (RFCOMM TTY, USB serial, in-memory duplex)
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedLink = Box<dyn Link>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxedLink, ObdError>> + Send + 'a>>;

/// Opens a link to a device identifier
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, device: &'a str) -> ConnectFuture<'a>;
}

/// Connector for serial devices (e.g. "/dev/rfcomm0", "/dev/ttyUSB0" or "COM3")
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Connector for SerialConnector {
    fn connect<'a>(&'a self, device: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            debug!(device, baud_rate = self.baud_rate, "Opening serial port");
            let builder = tokio_serial::new(device, self.baud_rate);
            let stream = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| ObdError::Connection(format!("{}: {}", device, e)))?;
            Ok(Box::new(stream) as BoxedLink)
        })
    }
}

/// Buffered state transitions per observer
const STATE_EVENT_CAPACITY: usize = 32;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound for a connect attempt
    pub connect_timeout_ms: u64,
    /// Consecutive I/O errors before the link is marked failed
    pub max_consecutive_io_errors: u32,
    /// Largest response accepted before a prompt must appear
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_consecutive_io_errors: 3,
            max_frame_bytes: 4096,
        }
    }
}

struct Inner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    link: Mutex<Option<BoxedLink>>,
    device: StdMutex<Option<String>>,
    io_errors: AtomicU32,
}

/// Shared handle to the adapter link
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                transitions,
                link: Mutex::new(None),
                device: StdMutex::new(None),
                io_errors: AtomicU32::new(0),
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe the latest connection state
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every connection state transition, in order
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions.subscribe()
    }

    /// Identifier of the last opened device
    pub fn device(&self) -> Option<String> {
        self.inner
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Open a link to `device`. Never retries; a failure leaves the state `Failed`.
    pub async fn open(&self, device: &str, connector: &dyn Connector) -> Result<(), ObdError> {
        if matches!(self.state(), ConnectionState::Connected | ConnectionState::Connecting) {
            info!(device, "Replacing existing OBD link");
            self.close().await;
        }

        self.set_state(ConnectionState::Connecting);
        info!(device, "Connecting to OBD adapter");

        let timeout_ms = self.inner.config.connect_timeout_ms;
        let attempt = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            connector.connect(device),
        )
        .await;

        let link = match attempt {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Failed);
                error!(device, "Unsuccessful connection with OBD adapter: {}", e);
                return Err(match e {
                    ObdError::Connection(msg) => ObdError::Connection(msg),
                    other => ObdError::Connection(other.to_string()),
                });
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed);
                error!(device, timeout_ms, "OBD adapter did not answer the connect attempt");
                return Err(ObdError::Connection(format!(
                    "{} did not connect within {}ms",
                    device, timeout_ms
                )));
            }
        };

        self.install(device, link).await;
        Ok(())
    }

    /// Adopt an already connected link
    pub async fn attach(&self, device: &str, link: BoxedLink) {
        if self.is_connected() {
            self.close().await;
        }
        self.install(device, link).await;
    }

    async fn install(&self, device: &str, link: BoxedLink) {
        *self.inner.link.lock().await = Some(link);
        *self
            .inner
            .device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(device.to_string());
        self.inner.io_errors.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
        info!(device, "OBD adapter connected");
    }

    /// Write a frame, discarding any stale adapter output first
    pub async fn write(&self, bytes: &[u8]) -> Result<(), ObdError> {
        let mut closed = self.inner.state.subscribe();
        if *closed.borrow_and_update() != ConnectionState::Connected {
            return Err(ObdError::NotConnected);
        }

        let mut guard = self.inner.link.lock().await;
        let link = guard.as_mut().ok_or(ObdError::NotConnected)?;

        let outcome = tokio::select! {
            _ = wait_closed(&mut closed) => Err(ObdError::Io("transport closed".to_string())),
            res = write_frame(link, bytes) => res,
        };
        drop(guard);
        self.track(outcome)
    }

    /// Read one prompt-terminated frame within `timeout`
    pub async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ObdError> {
        let mut closed = self.inner.state.subscribe();
        if *closed.borrow_and_update() != ConnectionState::Connected {
            return Err(ObdError::NotConnected);
        }

        let mut guard = self.inner.link.lock().await;
        let link = guard.as_mut().ok_or(ObdError::NotConnected)?;
        let limit = self.inner.config.max_frame_bytes;

        let outcome = tokio::select! {
            _ = wait_closed(&mut closed) => Err(ObdError::Io("transport closed".to_string())),
            res = tokio::time::timeout(timeout, read_frame(link, limit)) => match res {
                Ok(frame) => frame,
                Err(_) => Err(ObdError::Timeout(timeout.as_millis() as u64)),
            },
        };
        drop(guard);
        self.track(outcome)
    }

    /// Close the link. Idempotent; pending reads fail with an I/O error.
    pub async fn close(&self) {
        let was = self.state();
        self.set_state(ConnectionState::Disconnected);

        let link = self.inner.link.lock().await.take();
        self.inner.io_errors.store(0, Ordering::Relaxed);

        match link {
            Some(mut link) => {
                let _ = tokio::time::timeout(Duration::from_secs(1), link.shutdown()).await;
                info!(device = ?self.device(), "OBD transport closed");
            }
            None if was != ConnectionState::Disconnected => {
                debug!(state = ?was, "OBD transport reset without a link");
            }
            None => {}
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = ?*state, to = ?next, "Connection state changed");
            *state = next;
            true
        });
        if changed {
            let _ = self.inner.transitions.send(next);
        }
    }

    fn track<T>(&self, outcome: Result<T, ObdError>) -> Result<T, ObdError> {
        match &outcome {
            Ok(_) => self.inner.io_errors.store(0, Ordering::Relaxed),
            Err(e) if e.is_io() => {
                let count = self.inner.io_errors.fetch_add(1, Ordering::Relaxed) + 1;
                let limit = self.inner.config.max_consecutive_io_errors;
                if count >= limit && self.is_connected() {
                    warn!(count, "Consecutive I/O errors on OBD link, marking it failed");
                    self.set_state(ConnectionState::Failed);
                }
            }
            Err(_) => {}
        }
        outcome
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

async fn wait_closed(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|s| *s != ConnectionState::Connected)
        .await;
}

async fn write_frame(link: &mut BoxedLink, bytes: &[u8]) -> Result<(), ObdError> {
    discard_stale(link).await;
    link.write_all(bytes).await?;
    link.flush().await?;
    Ok(())
}

/// Drop bytes already buffered on the link, e.g. a late reply to a timed-out command
async fn discard_stale(link: &mut BoxedLink) {
    let mut scratch = [0u8; 128];
    while let Ok(Ok(n)) = tokio::time::timeout(Duration::ZERO, link.read(&mut scratch)).await {
        if n == 0 {
            break;
        }
        debug!(bytes = n, "Discarding stale adapter output");
    }
}

async fn read_frame(link: &mut BoxedLink, limit: usize) -> Result<Vec<u8>, ObdError> {
    let mut frame = Vec::with_capacity(64);
    let mut chunk = [0u8; 128];

    loop {
        let n = link.read(&mut chunk).await?;
        if n == 0 {
            return Err(ObdError::Io("link closed by peer".to_string()));
        }
        frame.extend_from_slice(&chunk[..n]);

        if let Some(pos) = frame.iter().position(|b| *b == PROMPT) {
            if pos + 1 < frame.len() {
                debug!(bytes = frame.len() - pos - 1, "Dropping bytes after prompt");
            }
            frame.truncate(pos + 1);
            return Ok(frame);
        }
        if frame.len() > limit {
            return Err(ObdError::FrameTooLong {
                limit,
                raw: String::from_utf8_lossy(&frame).into_owned(),
            });
        }
    }
}
