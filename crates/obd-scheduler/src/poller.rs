//! Periodic Command Poller
//!
//! Re-enqueues a fixed set of commands on their own intervals. Entries are
//! kept in a min-heap by due time; de-duplication in the job queue keeps a
//! slow adapter from accumulating a backlog of the same reading.

use crate::producer::stop_requested;
use crate::queue::JobQueue;
use obd_protocol::ObdCommand;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Shortest accepted polling interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// A command with its polling schedule
#[derive(Debug, Clone)]
pub struct ScheduledCommand {
    /// The command to enqueue
    pub command: ObdCommand,
    /// Time between enqueues
    pub interval: Duration,
    /// Next due time
    pub next_due: Instant,
    /// Priority (higher = more important)
    pub priority: u8,
}

impl ScheduledCommand {
    pub fn new(command: ObdCommand, interval: Duration) -> Self {
        let priority = command.priority();
        Self {
            command,
            interval: interval.max(MIN_INTERVAL),
            next_due: Instant::now(),
            priority,
        }
    }

    pub fn schedule_next(&mut self) {
        self.next_due = Instant::now() + self.interval;
    }
}

impl Eq for ScheduledCommand {}

impl PartialEq for ScheduledCommand {
    fn eq(&self, other: &Self) -> bool {
        self.next_due == other.next_due && self.priority == other.priority
    }
}

impl Ord for ScheduledCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest due first, then higher priority
        other
            .next_due
            .cmp(&self.next_due)
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

impl PartialOrd for ScheduledCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Feeds the job queue with periodic commands
pub struct Poller {
    queue: JobQueue,
    entries: Vec<(ObdCommand, Duration)>,
    stop: Arc<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(queue: JobQueue) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            queue,
            entries: Vec::new(),
            stop: Arc::new(stop),
            task: Mutex::new(None),
        }
    }

    /// Poll `command` every `interval`
    pub fn add(&mut self, command: ObdCommand, interval: Duration) -> &mut Self {
        self.entries.push((command, interval));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn the polling task. Returns `false` if already running or empty.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.entries.is_empty() || task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let heap: BinaryHeap<ScheduledCommand> = self
            .entries
            .iter()
            .map(|(command, interval)| ScheduledCommand::new(command.clone(), *interval))
            .collect();

        self.stop.send_replace(false);
        info!("Command poller started with {} commands", heap.len());
        *task = Some(tokio::spawn(poll_loop(
            self.queue.clone(),
            heap,
            self.stop.subscribe(),
        )));
        true
    }

    pub async fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.stop.send_replace(true);
            let _ = handle.await;
            info!("Command poller stopped");
        }
    }
}

impl Drop for Poller {
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

async fn poll_loop(
    queue: JobQueue,
    mut heap: BinaryHeap<ScheduledCommand>,
    mut stop: watch::Receiver<bool>,
) {
    while let Some(mut next) = heap.pop() {
        tokio::select! {
            _ = stop_requested(&mut stop) => break,
            _ = tokio::time::sleep_until(next.next_due) => {}
        }

        if queue.enqueue(next.command.clone()) {
            trace!(command = next.command.name(), "Poll enqueued");
        } else {
            debug!(command = next.command.name(), "Previous poll still pending");
        }

        next.schedule_next();
        heap.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::Pid;

    #[test]
    fn test_scheduled_command_ordering() {
        let now = Instant::now();
        let mut rpm = ScheduledCommand::new(ObdCommand::pid(Pid::Rpm), Duration::from_millis(200));
        let mut maf = ScheduledCommand::new(ObdCommand::pid(Pid::Maf), Duration::from_secs(1));
        rpm.next_due = now;
        maf.next_due = now;

        // Same due time: higher priority first
        assert!(rpm > maf);

        // Earlier due time wins regardless of priority
        maf.next_due = now - Duration::from_millis(1);
        assert!(maf > rpm);
    }

    #[test]
    fn test_interval_floor() {
        let scheduled = ScheduledCommand::new(ObdCommand::pid(Pid::Rpm), Duration::ZERO);
        assert_eq!(scheduled.interval, MIN_INTERVAL);
    }

    #[tokio::test]
    async fn test_poller_feeds_queue_without_duplicates() {
        let queue = JobQueue::new();
        let mut poller = Poller::new(queue.clone());
        assert!(!poller.start());

        poller
            .add(ObdCommand::pid(Pid::Rpm), Duration::from_millis(20))
            .add(ObdCommand::pid(Pid::Speed), Duration::from_millis(20));
        assert!(poller.start());
        assert!(!poller.start());
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut names = queue.pending_names();
        names.sort();
        assert_eq!(names, vec!["RPM", "SPEED"]);

        poller.stop().await;
        assert!(!poller.is_running());
    }
}
