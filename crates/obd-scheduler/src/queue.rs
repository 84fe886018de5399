//! Job Queue
//!
//! FIFO of pending OBD commands with name-based de-duplication. The queue
//! hands out at most one job at a time; the next job becomes available only
//! after the in-flight one is completed, failed or released.

use crate::error::SchedulerError;
use crate::events::{unix_millis, ResultEvent};
use obd_protocol::{ObdCommand, ObdError, ObdResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Lifecycle of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::InFlight)
                | (JobState::InFlight, JobState::Completed)
                | (JobState::InFlight, JobState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A command scheduled for execution
#[derive(Debug)]
pub struct Job {
    id: u64,
    command: ObdCommand,
    enqueued_at: Instant,
    state: JobState,
}

impl Job {
    fn new(id: u64, command: ObdCommand) -> Self {
        Self {
            id,
            command,
            enqueued_at: Instant::now(),
            state: JobState::Pending,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> &ObdCommand {
        &self.command
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Time spent since the job was enqueued
    pub fn age(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }

    fn transition(&mut self, next: JobState) -> Result<(), SchedulerError> {
        if !self.state.can_transition_to(next) {
            return Err(SchedulerError::transition("job", self.state, next));
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// Pending or in-flight job count per command name
    active: HashMap<String, usize>,
    in_flight: Option<(u64, String)>,
    next_id: u64,
}

impl QueueState {
    fn admit(&mut self, command: ObdCommand) -> Job {
        self.next_id += 1;
        *self.active.entry(command.name().to_string()).or_insert(0) += 1;
        Job::new(self.next_id, command)
    }

    fn retire(&mut self, name: &str) {
        if let Some(count) = self.active.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(name);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Shared handle to the job queue
#[derive(Clone, Default)]
pub struct JobQueue {
    inner: Arc<Shared>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command unless one with the same name is pending or in flight
    pub fn enqueue(&self, command: ObdCommand) -> bool {
        let mut state = self.lock();
        if state.active.contains_key(command.name()) {
            debug!(command = command.name(), "Command already queued, skipping");
            return false;
        }
        let job = state.admit(command);
        debug!(job = job.id, command = job.command.name(), "Command queued");
        state.pending.push_back(job);
        drop(state);

        self.inner.notify.notify_one();
        true
    }

    /// Place commands ahead of everything pending, in the given order.
    ///
    /// Bypasses de-duplication: used for reset sequences that must run next
    /// even when an identical command is already waiting.
    pub fn enqueue_front_all(&self, commands: Vec<ObdCommand>) -> usize {
        let mut state = self.lock();
        let jobs: Vec<Job> = commands.into_iter().map(|c| state.admit(c)).collect();
        let count = jobs.len();
        for job in jobs.into_iter().rev() {
            state.pending.push_front(job);
        }
        drop(state);

        if count > 0 {
            debug!(count, "Commands queued at the head");
            self.inner.notify.notify_one();
        }
        count
    }

    /// Next pending job, or `None` if the queue is empty or a job is in flight
    pub fn next_ready(&self) -> Option<Job> {
        let mut state = self.lock();
        if state.in_flight.is_some() {
            return None;
        }
        let mut job = state.pending.pop_front()?;
        debug_assert_eq!(job.state, JobState::Pending);
        job.state = JobState::InFlight;
        state.in_flight = Some((job.id, job.command.name().to_string()));
        Some(job)
    }

    /// Finish the in-flight job with a decoded result.
    ///
    /// A result flagged failed by the codec moves the job to `Failed`,
    /// anything else to `Completed`.
    pub fn complete(&self, job: Job, result: ObdResult) -> Result<ResultEvent, SchedulerError> {
        let next = if result.is_failed() {
            JobState::Failed
        } else {
            JobState::Completed
        };
        self.finish(job, next, result)
    }

    /// Finish the in-flight job after a transport error, keeping any partial response
    pub fn fail(&self, job: Job, error: &ObdError) -> Result<ResultEvent, SchedulerError> {
        let raw = error.raw().map(str::to_string);
        let result = ObdResult::failed(job.command.name(), raw, error.to_string());
        self.finish(job, JobState::Failed, result)
    }

    fn finish(
        &self,
        mut job: Job,
        next: JobState,
        result: ObdResult,
    ) -> Result<ResultEvent, SchedulerError> {
        job.transition(next)?;

        let mut state = self.lock();
        match state.in_flight.take() {
            Some((id, name)) if id == job.id => state.retire(&name),
            Some(other) => {
                warn!(job = job.id, in_flight = other.0, "Finished job is not the one in flight");
                state.in_flight = Some(other);
            }
            // Released by a stop that gave up on it
            None => {}
        }
        drop(state);

        self.inner.notify.notify_one();
        Ok(ResultEvent {
            job_id: job.id,
            state: job.state,
            result,
            timestamp_ms: unix_millis(),
        })
    }

    /// Forget the in-flight job without a result, returning its id and name
    pub fn release_in_flight(&self) -> Option<(u64, String)> {
        let mut state = self.lock();
        let (id, name) = state.in_flight.take()?;
        state.retire(&name);
        drop(state);

        self.inner.notify.notify_one();
        Some((id, name))
    }

    /// Drop all pending jobs. The in-flight job, if any, is untouched.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped: Vec<Job> = state.pending.drain(..).collect();
        for job in &dropped {
            state.retire(job.command.name());
        }
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Pending commands cleared");
        }
        dropped.len()
    }

    /// Number of pending jobs
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Name of the in-flight command
    pub fn in_flight(&self) -> Option<String> {
        self.lock().in_flight.as_ref().map(|(_, name)| name.clone())
    }

    /// Names of pending commands in dispatch order
    pub fn pending_names(&self) -> Vec<String> {
        self.lock()
            .pending
            .iter()
            .map(|job| job.command.name().to_string())
            .collect()
    }

    /// Resolves after the next enqueue or job completion
    pub fn notified(&self) -> Notified<'_> {
        self.inner.notify.notified()
    }
}
