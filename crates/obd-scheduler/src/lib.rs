//! OBD-II Job Scheduling
//!
//! Serializes commands onto a single adapter link: a de-duplicating FIFO
//! job queue, a producer task that runs one job at a time and publishes
//! each outcome, and a poller that re-enqueues periodic readings.

mod config;
mod error;
mod events;
mod poller;
mod producer;
mod queue;

pub use config::ProducerConfig;
pub use error::SchedulerError;
pub use events::{unix_millis, EventBus, ObdEvent, ResultEvent};
pub use poller::{Poller, ScheduledCommand, MIN_INTERVAL};
pub use producer::{Producer, ProducerState};
pub use queue::{Job, JobQueue, JobState};
