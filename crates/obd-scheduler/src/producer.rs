//! Job Producer
//!
//! Background task that drains the job queue over the transport, one
//! command at a time, and publishes every outcome on the event bus.

use crate::config::ProducerConfig;
use crate::error::SchedulerError;
use crate::events::{unix_millis, EventBus, ObdEvent, ResultEvent};
use crate::queue::{Job, JobQueue, JobState};
use obd_protocol::{CommandCodec, ObdCommand, ObdError, ObdResult, Transport};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Producer lifecycle. A stopped producer may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Owns the dispatch task
pub struct Producer {
    queue: JobQueue,
    transport: Transport,
    codec: Arc<CommandCodec>,
    bus: EventBus,
    config: ProducerConfig,
    state: watch::Sender<ProducerState>,
    stop: Arc<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    pub fn new(
        queue: JobQueue,
        transport: Transport,
        codec: CommandCodec,
        bus: EventBus,
        config: ProducerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ProducerState::Idle);
        let (stop, _) = watch::channel(false);
        Self {
            queue,
            transport,
            codec: Arc::new(codec),
            bus,
            config,
            state,
            stop: Arc::new(stop),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ProducerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProducerState> {
        self.state.subscribe()
    }

    /// Spawn the dispatch task. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state();
        if !matches!(current, ProducerState::Idle | ProducerState::Stopped) {
            return Err(SchedulerError::transition(
                "producer",
                current,
                ProducerState::Running,
            ));
        }

        self.stop.send_replace(false);
        self.set_state(ProducerState::Running);

        let worker = Worker {
            queue: self.queue.clone(),
            transport: self.transport.clone(),
            codec: self.codec.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            stop: self.stop.subscribe(),
        };
        *task = Some(tokio::spawn(worker.run()));

        info!("OBD job producer started");
        Ok(())
    }

    /// Stop dispatching and wait for the task to exit.
    ///
    /// The in-flight job gets up to `stop_timeout_ms` to finish. After that
    /// the task is aborted and the job is reported as failed.
    pub async fn stop(&self) {
        let handle = {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            if self.state() != ProducerState::Running {
                debug!(state = ?self.state(), "Producer stop requested while not running");
                return;
            }
            self.set_state(ProducerState::Stopping);
            self.stop.send_replace(true);
            task.take()
        };

        if let Some(mut handle) = handle {
            let limit = self.config.stop_timeout();
            match tokio::time::timeout(limit, &mut handle).await {
                Ok(_) => debug!("Dispatch task drained"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.stop_timeout_ms,
                        "Dispatch task did not drain in time, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;

                    if let Some((job_id, name)) = self.queue.release_in_flight() {
                        let result =
                            ObdResult::failed(name, None, "producer stopped before a reply");
                        self.bus.publish(ObdEvent::Result(ResultEvent {
                            job_id,
                            state: JobState::Failed,
                            result,
                            timestamp_ms: unix_millis(),
                        }));
                    }
                }
            }
        }

        self.set_state(ProducerState::Stopped);
        info!("OBD job producer stopped");
    }

    fn set_state(&self, next: ProducerState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            self.bus.publish(ObdEvent::Producer(next));
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// State moved into the dispatch task
struct Worker {
    queue: JobQueue,
    transport: Transport,
    codec: Arc<CommandCodec>,
    bus: EventBus,
    config: ProducerConfig,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                break;
            }

            if !self.transport.is_connected() {
                tokio::select! {
                    _ = stop_requested(&mut self.stop) => break,
                    _ = tokio::time::sleep(self.config.disconnected_backoff()) => continue,
                }
            }

            let Some(job) = self.queue.next_ready() else {
                tokio::select! {
                    _ = stop_requested(&mut self.stop) => break,
                    _ = self.queue.notified() => {}
                    // Re-check the link even if nothing is enqueued
                    _ = tokio::time::sleep(self.config.disconnected_backoff()) => {}
                }
                continue;
            };

            self.dispatch(job).await;
        }
        debug!("Dispatch loop exited");
    }

    async fn dispatch(&self, job: Job) {
        let started = Instant::now();
        let name = job.command().name().to_string();
        debug!(job = job.id(), command = %name, "Dispatching OBD command");

        let finished = match self.exchange(job.command()).await {
            Ok(raw) => {
                let result = self.codec.decode(job.command(), &raw);
                if result.is_failed() {
                    warn!(
                        command = %name,
                        raw = ?result.raw,
                        "Undecodable OBD response: {}",
                        result.error.as_deref().unwrap_or("unknown")
                    );
                } else if result.is_no_data() {
                    debug!(command = %name, "No data for command");
                }
                self.queue.complete(job, result)
            }
            Err(e) => {
                warn!(command = %name, "OBD command failed: {}", e);
                self.queue.fail(job, &e)
            }
        };

        match finished {
            Ok(event) => {
                let outcome = match (event.state, event.result.is_no_data()) {
                    (JobState::Failed, _) => "failed",
                    (_, true) => "no_data",
                    _ => "completed",
                };
                metrics::counter!("obd_jobs_total", "outcome" => outcome).increment(1);
                metrics::histogram!("obd_job_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                self.bus.publish(ObdEvent::Result(event));
            }
            Err(e) => error!(command = %name, "Job bookkeeping failed: {}", e),
        }
    }

    async fn exchange(&self, command: &ObdCommand) -> Result<Vec<u8>, ObdError> {
        self.transport.write(&self.codec.encode(command)).await?;
        self.transport.read(self.config.read_timeout()).await
    }
}

/// Resolves once a stop is requested or the producer is gone
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::mock::{MockAdapter, MockReply};
    use obd_protocol::{ConnectionState, Pid, ResultStatus};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Rig {
        producer: Producer,
        queue: JobQueue,
        transport: Transport,
        events: broadcast::Receiver<ObdEvent>,
    }

    fn rig(config: ProducerConfig) -> Rig {
        let queue = JobQueue::new();
        let transport = Transport::default();
        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let producer = Producer::new(
            queue.clone(),
            transport.clone(),
            CommandCodec::default(),
            bus,
            config,
        );
        Rig {
            producer,
            queue,
            transport,
            events,
        }
    }

    fn fast_config() -> ProducerConfig {
        ProducerConfig {
            read_timeout_ms: 200,
            disconnected_backoff_ms: 10,
            stop_timeout_ms: 1000,
            event_capacity: 64,
        }
    }

    async fn next_result(events: &mut broadcast::Receiver<ObdEvent>) -> ResultEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
                .await
                .expect("no result event")
                .unwrap();
            if let ObdEvent::Result(result) = event {
                return result;
            }
        }
    }

    fn drain_results(events: &mut broadcast::Receiver<ObdEvent>) -> Vec<ResultEvent> {
        let mut results = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ObdEvent::Result(result) = event {
                results.push(result);
            }
        }
        results
    }

    #[tokio::test]
    async fn test_rpm_published_once() {
        let mut rig = rig(fast_config());
        let adapter = MockAdapter::new()
            .with_echo(false)
            .script("010C", MockReply::Bytes(b"RPM\r41 0C 1B 58\r\r>".to_vec()));
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;

        assert!(rig.queue.enqueue(ObdCommand::pid(Pid::Rpm)));
        rig.producer.start().unwrap();

        let event = next_result(&mut rig.events).await;
        assert_eq!(event.state, JobState::Completed);
        assert_eq!(event.result.name, "RPM");
        assert_eq!(event.result.formatted.as_deref(), Some("1750 rpm"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain_results(&mut rig.events).is_empty());
        rig.producer.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_then_next_job() {
        let mut rig = rig(fast_config());
        let adapter = MockAdapter::new()
            .with_echo(false)
            .script("010C", MockReply::Silence);
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;

        rig.queue.enqueue(ObdCommand::pid(Pid::Rpm));
        rig.queue.enqueue(ObdCommand::pid(Pid::Speed));
        rig.producer.start().unwrap();

        let first = next_result(&mut rig.events).await;
        assert_eq!(first.result.name, "RPM");
        assert_eq!(first.state, JobState::Failed);
        assert_eq!(first.result.raw, None);

        let second = next_result(&mut rig.events).await;
        assert_eq!(second.result.name, "SPEED");
        assert_eq!(second.result.formatted.as_deref(), Some("40 km/h"));
        assert_eq!(rig.transport.state(), ConnectionState::Connected);
        rig.producer.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_session() {
        let mut rig = rig(fast_config());
        let adapter = MockAdapter::new()
            .with_echo(false)
            .script("010C", MockReply::Text("41 0C ZZ".to_string()));
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;

        rig.queue.enqueue(ObdCommand::pid(Pid::Rpm));
        rig.queue.enqueue(ObdCommand::pid(Pid::AmbientAirTemp));
        rig.queue.enqueue(ObdCommand::pid(Pid::CoolantTemp));
        rig.producer.start().unwrap();

        let malformed = next_result(&mut rig.events).await;
        assert_eq!(malformed.state, JobState::Failed);
        assert_eq!(malformed.result.raw.as_deref(), Some("41 0C ZZ"));

        let no_data = next_result(&mut rig.events).await;
        assert_eq!(no_data.state, JobState::Completed);
        assert_eq!(no_data.result.status, ResultStatus::NoData);

        let coolant = next_result(&mut rig.events).await;
        assert_eq!(coolant.result.formatted.as_deref(), Some("75 °C"));
        rig.producer.stop().await;
    }

    #[tokio::test]
    async fn test_waits_while_disconnected() {
        let mut rig = rig(fast_config());
        rig.queue.enqueue(ObdCommand::pid(Pid::Speed));
        rig.producer.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.queue.len(), 1);
        assert!(rig.queue.in_flight().is_none());

        let adapter = MockAdapter::new().with_echo(false);
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;
        let event = next_result(&mut rig.events).await;
        assert_eq!(event.result.name, "SPEED");
        rig.producer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_while_read_blocked() {
        let mut rig = rig(fast_config());
        let adapter = MockAdapter::new()
            .with_echo(false)
            .script("010C", MockReply::Silence);
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;

        rig.queue.enqueue(ObdCommand::pid(Pid::Rpm));
        rig.producer.start().unwrap();
        while rig.queue.in_flight().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = Instant::now();
        rig.producer.stop().await;
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(rig.producer.state(), ProducerState::Stopped);

        let event = next_result(&mut rig.events).await;
        assert_eq!(event.state, JobState::Failed);
        assert!(rig.queue.in_flight().is_none());
    }

    #[tokio::test]
    async fn test_stop_aborts_after_timeout() {
        let mut rig = rig(ProducerConfig {
            read_timeout_ms: 10_000,
            stop_timeout_ms: 100,
            ..fast_config()
        });
        let adapter = MockAdapter::new()
            .with_echo(false)
            .script("010D", MockReply::Silence);
        rig.transport.attach("mock", Box::new(adapter.spawn())).await;

        rig.queue.enqueue(ObdCommand::pid(Pid::Speed));
        rig.producer.start().unwrap();
        while rig.queue.in_flight().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = Instant::now();
        rig.producer.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(rig.producer.state(), ProducerState::Stopped);
        assert!(rig.queue.in_flight().is_none());

        let event = next_result(&mut rig.events).await;
        assert_eq!(event.result.name, "SPEED");
        assert_eq!(event.state, JobState::Failed);
        assert!(rig.queue.enqueue(ObdCommand::pid(Pid::Speed)));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let rig = rig(fast_config());
        let mut states = rig.producer.subscribe_state();
        assert_eq!(rig.producer.state(), ProducerState::Idle);

        // Stopping an idle producer is a no-op
        rig.producer.stop().await;
        assert_eq!(rig.producer.state(), ProducerState::Idle);

        rig.producer.start().unwrap();
        assert!(matches!(
            rig.producer.start(),
            Err(SchedulerError::InvalidTransition { .. })
        ));
        rig.producer.stop().await;
        assert_eq!(*states.borrow_and_update(), ProducerState::Stopped);

        // Restart from Stopped
        rig.producer.start().unwrap();
        assert_eq!(rig.producer.state(), ProducerState::Running);
        rig.producer.stop().await;
    }

    #[tokio::test]
    async fn test_broken_link_escalates_and_stops_dequeuing() {
        let mut rig = rig(fast_config());
        let (client, adapter) = tokio::io::duplex(64);
        rig.transport.attach("mock", Box::new(client)).await;
        drop(adapter);

        for pid in [Pid::Rpm, Pid::Speed, Pid::Maf, Pid::FuelLevel] {
            rig.queue.enqueue(ObdCommand::pid(pid));
        }
        rig.producer.start().unwrap();

        for _ in 0..3 {
            let event = next_result(&mut rig.events).await;
            assert_eq!(event.state, JobState::Failed);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.transport.state(), ConnectionState::Failed);
        assert_eq!(rig.queue.pending_names(), vec!["FUEL_LEVEL"]);
        rig.producer.stop().await;
    }
}
