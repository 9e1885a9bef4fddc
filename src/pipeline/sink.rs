use super::mapping::EventKey;
use crate::actuation::{ActuationRequest, Coordinator};
use crate::remote::{Action, Target};
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::{debug, warn};

/// A mapped event that passed every filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub key: EventKey,
    pub action: Action,
    /// Device timestamp of the originating event
    pub received_at: DateTime<Local>,
}

/// Receives triggers from the consumer loop.
///
/// `dispatch` runs on the consumer loop and must not wait for network I/O.
pub trait TriggerSink: Send + Sync {
    fn dispatch(&self, trigger: Trigger);
}

/// Fires each trigger as a detached, immediate, cached-session actuation.
pub struct CoordinatorSink {
    coordinator: Coordinator,
    targets: Vec<Target>,
    call_timeout: Duration,
}

impl CoordinatorSink {
    pub fn new(coordinator: Coordinator, targets: Vec<Target>, call_timeout: Duration) -> Self {
        Self {
            coordinator,
            targets,
            call_timeout,
        }
    }
}

impl TriggerSink for CoordinatorSink {
    fn dispatch(&self, trigger: Trigger) {
        let request =
            ActuationRequest::immediate(self.targets.clone(), trigger.action, self.call_timeout);
        match self.coordinator.spawn_detached(request) {
            Ok(_) => debug!("Dispatched {} (event at {})", trigger.key, trigger.received_at),
            Err(e) => warn!("Dropping trigger {}: {}", trigger.key, e),
        }
    }
}
