//! Event Bus
//!
//! Fans producer output out to any number of subscribers. Publishing never
//! blocks: a subscriber that falls behind loses the oldest events and is
//! told how many it missed.

use crate::producer::ProducerState;
use crate::queue::JobState;
use obd_protocol::{ConnectionState, ObdResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub job_id: u64,
    /// Terminal job state
    pub state: JobState,
    pub result: ObdResult,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
}

/// Everything published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObdEvent {
    Result(ResultEvent),
    Connection(ConnectionState),
    Producer(ProducerState),
}

/// Broadcast channel for [`ObdEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ObdEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers, returning how many received it
    pub fn publish(&self, event: ObdEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No event subscribers, event dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObdEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` for every event on a dedicated task until the bus is dropped
    pub fn spawn_listener<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(ObdEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(ObdEvent::Producer(ProducerState::Running)), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let event = ObdEvent::Connection(ConnectionState::Connected);
        assert_eq!(bus.publish(event.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        for _ in 0..10 {
            bus.publish(ObdEvent::Producer(ProducerState::Running));
        }
        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(8))));
        assert!(slow.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_listener_sees_events_in_order() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = bus.spawn_listener(move |event| sink.lock().unwrap().push(event));

        bus.publish(ObdEvent::Connection(ConnectionState::Connecting));
        bus.publish(ObdEvent::Connection(ConnectionState::Connected));
        drop(bus);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ObdEvent::Connection(ConnectionState::Connecting),
                ObdEvent::Connection(ConnectionState::Connected),
            ]
        );
    }
}
