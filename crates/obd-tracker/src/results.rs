//! Result Table
//!
//! Keeps the latest displayable value per command name. The table is wiped
//! when the adapter disconnects so stale readings never outlive a session.

use obd_protocol::ConnectionState;
use obd_scheduler::{unix_millis, EventBus, ObdEvent, ResultEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Latest value of one reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Formatted value, e.g. "1750 rpm"
    pub value: String,
    /// Unix timestamp in milliseconds when the value was stored
    pub timestamp_ms: u64,
}

/// Latest readings keyed by command name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    entries: BTreeMap<String, ResultEntry>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result if it carries a displayable value
    pub fn apply(&mut self, event: &ResultEvent) -> bool {
        let result = &event.result;
        if result.raw.is_none() {
            return false;
        }
        if result.is_no_data() {
            debug!(command = %result.name, "No data reported, keeping previous value");
            return false;
        }
        let Some(value) = &result.formatted else {
            return false;
        };

        self.entries.insert(
            result.name.clone(),
            ResultEntry {
                value: value.clone(),
                timestamp_ms: unix_millis(),
            },
        );
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ResultEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultEntry)> {
        self.entries.iter()
    }
}

/// Feeds a shared [`ResultTable`] from the event bus
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    table: Arc<Mutex<ResultTable>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResultTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self, event: &ObdEvent) {
        match event {
            ObdEvent::Result(result) => {
                self.lock().apply(result);
            }
            ObdEvent::Connection(ConnectionState::Disconnected) => {
                let mut table = self.lock();
                if !table.is_empty() {
                    info!(readings = table.len(), "Adapter disconnected, clearing results");
                    table.clear();
                }
            }
            _ => {}
        }
    }

    /// Subscribe to `bus` on a background task
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let aggregator = self.clone();
        bus.spawn_listener(move |event| aggregator.handle(&event))
    }

    /// Copy of the current table
    pub fn snapshot(&self) -> ResultTable {
        self.lock().clone()
    }

    pub fn get(&self, name: &str) -> Option<ResultEntry> {
        self.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::ObdResult;
    use obd_scheduler::JobState;

    fn event(result: ObdResult) -> ObdEvent {
        let state = if result.is_failed() {
            JobState::Failed
        } else {
            JobState::Completed
        };
        ObdEvent::Result(ResultEvent {
            job_id: 1,
            state,
            result,
            timestamp_ms: 0,
        })
    }

    fn rpm(formatted: &str) -> ObdResult {
        ObdResult::ok("RPM", "41 0C 1B 58".into(), formatted.into(), Some(1750.0))
    }

    #[test]
    fn test_latest_value_wins() {
        let aggregator = ResultAggregator::new();
        aggregator.handle(&event(rpm("1750 rpm")));
        aggregator.handle(&event(rpm("1800 rpm")));
        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.get("RPM").unwrap().value, "1800 rpm");
    }

    #[test]
    fn test_no_data_and_null_results_ignored() {
        let aggregator = ResultAggregator::new();
        aggregator.handle(&event(ObdResult::no_data("MAF", "NODATA")));
        aggregator.handle(&event(ObdResult::failed("SPEED", None, "timed out")));
        aggregator.handle(&event(ObdResult::failed(
            "RPM",
            Some("41 0C ZZ".into()),
            "malformed frame",
        )));
        assert!(aggregator.is_empty());

        // No data keeps the previous value
        aggregator.handle(&event(rpm("1750 rpm")));
        aggregator.handle(&event(ObdResult::no_data("RPM", "NODATA")));
        assert_eq!(aggregator.get("RPM").unwrap().value, "1750 rpm");
    }

    #[test]
    fn test_disconnect_clears_table() {
        let aggregator = ResultAggregator::new();
        aggregator.handle(&event(rpm("1750 rpm")));
        aggregator.handle(&ObdEvent::Connection(ConnectionState::Failed));
        assert_eq!(aggregator.len(), 1);
        aggregator.handle(&ObdEvent::Connection(ConnectionState::Disconnected));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let mut table = ResultTable::new();
        for name in ["SPEED", "COOLANT_TEMP", "RPM"] {
            let result = ObdResult::ok(name, "00".into(), "0".into(), Some(0.0));
            if let ObdEvent::Result(e) = event(result) {
                assert!(table.apply(&e));
            }
        }
        let names: Vec<&str> = table.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["COOLANT_TEMP", "RPM", "SPEED"]);
    }

    #[tokio::test]
    async fn test_attached_to_bus() {
        let bus = EventBus::new(16);
        let aggregator = ResultAggregator::new();
        let handle = aggregator.attach(&bus);

        bus.publish(event(rpm("1750 rpm")));
        drop(bus);
        handle.await.unwrap();
        assert_eq!(aggregator.get("RPM").unwrap().value, "1750 rpm");
    }
}
