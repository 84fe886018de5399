//! OBD Session
//!
//! The control surface for one adapter: connect, disconnect, producer
//! start/stop and reset. Transport state changes are republished on the
//! event bus so subscribers see connection and result events on one stream.

use crate::config::TrackerConfig;
use crate::TrackerError;
use obd_protocol::{
    CommandCodec, ConnectionState, Connector, ObdCommand, Transport,
};
use obd_scheduler::{EventBus, JobQueue, ObdEvent, Poller, Producer, ProducerState};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One adapter session
pub struct ObdSession {
    config: TrackerConfig,
    connector: Arc<dyn Connector>,
    transport: Transport,
    queue: JobQueue,
    bus: EventBus,
    producer: Producer,
    poller: Poller,
    forwarder: JoinHandle<()>,
}

impl ObdSession {
    /// Build a session. Must be called from within a Tokio runtime.
    pub fn new(config: TrackerConfig, connector: Arc<dyn Connector>) -> Result<Self, TrackerError> {
        let transport = Transport::new(config.transport.clone());
        let queue = JobQueue::new();
        let bus = EventBus::new(config.producer.event_capacity);

        let producer = Producer::new(
            queue.clone(),
            transport.clone(),
            CommandCodec::new(config.codec.clone()),
            bus.clone(),
            config.producer.clone(),
        );

        let mut poller = Poller::new(queue.clone());
        for (command, interval) in config.poll_commands()? {
            poller.add(command, interval);
        }

        let forwarder = tokio::spawn(forward_connection_state(transport.transitions(), bus.clone()));

        Ok(Self {
            config,
            connector,
            transport,
            queue,
            bus,
            producer,
            poller,
            forwarder,
        })
    }

    /// Open the adapter link and queue the initialization sequence.
    ///
    /// A failed attempt stops the producer and poller and leaves the
    /// connection `Failed`; retrying is up to the caller.
    pub async fn connect(&self, device: &str) -> Result<(), TrackerError> {
        if let Err(e) = self.transport.open(device, self.connector.as_ref()).await {
            error!(device, "Unable to connect to OBD adapter: {}", e);
            self.poller.stop().await;
            self.producer.stop().await;
            return Err(e.into());
        }

        let queued = self.queue.enqueue_front_all(self.config.init_sequence());
        info!(device, commands = queued, "OBD adapter initialization queued");
        Ok(())
    }

    /// Stop everything and drop the link. Pending jobs are discarded.
    pub async fn disconnect(&self) {
        self.poller.stop().await;
        self.producer.stop().await;
        self.transport.close().await;
        let dropped = self.queue.clear();
        info!(dropped, "OBD session disconnected");
    }

    pub fn start_producer(&self) -> Result<(), TrackerError> {
        self.producer.start()?;
        self.poller.start();
        Ok(())
    }

    pub async fn stop_producer(&self) {
        self.poller.stop().await;
        self.producer.stop().await;
    }

    /// Queue an adapter reset plus re-initialization ahead of everything else
    pub fn submit_reset(&self) -> usize {
        let mut commands = vec![ObdCommand::reset()];
        commands.extend(self.config.init_sequence());
        let queued = self.queue.enqueue_front_all(commands);
        info!("OBD adapter reset requested");
        queued
    }

    /// Queue a catalog command by name. Returns `false` if already queued.
    pub fn enqueue(&self, name: &str) -> Result<bool, TrackerError> {
        Ok(self.queue.enqueue(ObdCommand::by_name(name)?))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObdEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn producer_state(&self) -> ProducerState {
        self.producer.state()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Drop for ObdSession {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward_connection_state(
    mut transitions: broadcast::Receiver<ConnectionState>,
    bus: EventBus,
) {
    loop {
        match transitions.recv().await {
            Ok(state) => {
                bus.publish(ObdEvent::Connection(state));
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection transitions dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
