//! Event ingestion pipeline
//!
//! Turns a device event stream into triggers. A single consumer task reads
//! events in arrival order, runs each through the [`EventFilter`] and hands
//! dispatchable ones to a [`TriggerSink`]. Events are never processed
//! concurrently with each other.
//!
//! # State Machine
//!
//! ```text
//! Idle ──(open device)──► Listening ──(stop / stream closed)──► Idle
//! ```
//!
//! [`PipelineHandle`] owns the running task and its cancellation token.

pub mod error;
pub mod filter;
pub mod mapping;
pub mod sink;

pub use error::PipelineError;
pub use filter::{EventFilter, FilterSettings, IgnoreReason, Verdict};
pub use mapping::{parse_channels, parse_note_map, EventKey, MappingTable};
pub use sink::{CoordinatorSink, Trigger, TriggerSink};

use crate::midi::{DeviceDriver, DeviceHandle, MidiEvent};
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum ListenerState {
    Idle,
    Listening,
}

#[machine]
pub struct EventListener<S: ListenerState> {
    device: String,
    filter: EventFilter,
    sink: Arc<dyn TriggerSink>,
    // Present while Listening
    handle: Option<Box<dyn DeviceHandle>>,
    events: Option<mpsc::Receiver<MidiEvent>>,
}

impl<S: ListenerState> EventListener<S> {
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl EventListener<Idle> {
    pub fn create(device: String, filter: EventFilter, sink: Arc<dyn TriggerSink>) -> Self {
        Self::new(device, filter, sink, None, None)
    }

    /// Opens the device and transitions to Listening.
    pub fn open(
        mut self,
        driver: &dyn DeviceDriver,
    ) -> Result<EventListener<Listening>, PipelineError> {
        if self.device.trim().is_empty() {
            return Err(PipelineError::NoDevice);
        }
        let (handle, events) = driver.open(&self.device)?;
        info!(
            "Listening on {} ({} mappings, debounce {:?}, rate limit {:?})",
            self.device,
            self.filter.table().len(),
            self.filter.settings().debounce,
            self.filter.settings().rate_limit
        );
        self.handle = Some(handle);
        self.events = Some(events);
        Ok(self.transition())
    }
}

impl EventListener<Listening> {
    /// Consumes events until `cancel` fires or the stream closes, then
    /// releases the device.
    pub async fn run_until_cancelled(mut self, cancel: CancellationToken) -> EventListener<Idle> {
        if let Some(mut events) = self.events.take() {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Stop requested for {}", self.device);
                        break;
                    }
                    next = events.recv() => match next {
                        Some(event) => self.handle_event(&event),
                        None => {
                            info!("Event stream closed for {}", self.device);
                            break;
                        }
                    }
                }
            }
        }
        self.release();
        self.transition()
    }

    fn handle_event(&mut self, event: &MidiEvent) {
        match self.filter.evaluate(event, Instant::now()) {
            Verdict::Dispatch { key, action } => {
                info!("{} -> {}", key, action);
                self.sink.dispatch(Trigger {
                    key,
                    action,
                    received_at: event.timestamp,
                });
            }
            Verdict::Ignored(reason) => debug!(
                "Ignoring {} ch{} {}: {}",
                event.event_type, event.channel, event.data1, reason
            ),
        }
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            match handle.close() {
                Ok(()) => debug!("Closed input device {}", self.device),
                Err(e) => warn!("Failed to close input device {}: {}", self.device, e),
            }
        }
    }
}

/// Runs an [`EventListener`] in a tokio task.
#[derive(Debug, Default)]
pub struct PipelineHandle {
    device: Option<String>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `device` and starts consuming its events. A running listener is
    /// stopped first.
    pub async fn start(
        &mut self,
        driver: &dyn DeviceDriver,
        device: &str,
        settings: FilterSettings,
        table: MappingTable,
        sink: Arc<dyn TriggerSink>,
    ) -> Result<(), PipelineError> {
        self.stop().await;

        let listener = EventListener::create(
            device.to_string(),
            EventFilter::new(settings, table),
            sink,
        )
        .open(driver)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let idle = listener.run_until_cancelled(token).await;
            debug!("Listener for {} is idle", idle.device());
        });

        self.device = Some(device.to_string());
        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    /// Signals the listener to stop and waits for it to release the device.
    /// No-op when nothing is running.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        match self.task.take() {
            Some(task) => {
                if let Err(e) = task.await {
                    error!("Listener task failed: {}", e);
                }
                if let Some(device) = self.device.take() {
                    info!("Stopped listening on {}", device);
                }
            }
            None => debug!("Pipeline not running"),
        }
    }

    /// True while the consumer task is alive.
    pub fn is_listening(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Action;
    use crate::test_support::{RecordingSink, ScriptedDriver};
    use std::time::Duration;

    fn settings(debounce_ms: u64, rate_limit_ms: u64) -> FilterSettings {
        FilterSettings {
            debounce: Duration::from_millis(debounce_ms),
            rate_limit: Duration::from_millis(rate_limit_ms),
            channels: Vec::new(),
        }
    }

    async fn wait_idle(handle: &PipelineHandle) {
        for _ in 0..200 {
            if !handle.is_listening() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("listener did not finish");
    }

    #[tokio::test]
    async fn mapped_note_fires_once_and_unmapped_is_ignored() {
        let driver = ScriptedDriver::new(&["Pads"]);
        let sink = RecordingSink::new();
        let mut handle = PipelineHandle::new();

        handle
            .start(
                driver.as_ref(),
                "Pads",
                settings(0, 0),
                MappingTable::from_note_maps(&["1:36=SceneA"]),
                sink.clone(),
            )
            .await
            .unwrap();
        assert!(handle.is_listening());

        let tx = driver.sender();
        tx.send(MidiEvent::note_on(1, 36, 100)).await.unwrap();
        tx.send(MidiEvent::note_on(1, 99, 100)).await.unwrap();
        drop(tx);
        driver.disconnect();
        wait_idle(&handle).await;

        let triggers = sink.triggers();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].key, EventKey::new(1, 36));
        assert_eq!(triggers[0].action, Action::scene("SceneA"));
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test]
    async fn events_are_handled_in_arrival_order() {
        let driver = ScriptedDriver::new(&["Pads"]);
        let sink = RecordingSink::new();
        let mut handle = PipelineHandle::new();
        handle
            .start(
                driver.as_ref(),
                "Pads",
                settings(0, 0),
                MappingTable::from_note_maps(&["1:36=A", "1:37=B", "1:38=C"]),
                sink.clone(),
            )
            .await
            .unwrap();

        let tx = driver.sender();
        for note in [38, 36, 37, 36] {
            tx.send(MidiEvent::note_on(1, note, 100)).await.unwrap();
        }
        drop(tx);
        driver.disconnect();
        wait_idle(&handle).await;

        let scenes: Vec<Action> = sink.triggers().into_iter().map(|t| t.action).collect();
        assert_eq!(
            scenes,
            vec![
                Action::scene("C"),
                Action::scene("A"),
                Action::scene("B"),
                Action::scene("A"),
            ]
        );
    }

    #[tokio::test]
    async fn burst_within_debounce_yields_one_trigger() {
        let driver = ScriptedDriver::new(&["Pads"]);
        let sink = RecordingSink::new();
        let mut handle = PipelineHandle::new();
        handle
            .start(
                driver.as_ref(),
                "Pads",
                settings(500, 0),
                MappingTable::from_note_maps(&["1:36=A", "1:37=B"]),
                sink.clone(),
            )
            .await
            .unwrap();

        let tx = driver.sender();
        tx.send(MidiEvent::note_on(1, 36, 100)).await.unwrap();
        tx.send(MidiEvent::note_on(1, 37, 100)).await.unwrap();
        drop(tx);
        driver.disconnect();
        wait_idle(&handle).await;

        assert_eq!(sink.triggers().len(), 1);
    }

    #[tokio::test]
    async fn stop_while_blocked_releases_device() {
        let driver = ScriptedDriver::new(&["Pads"]);
        let mut handle = PipelineHandle::new();
        handle
            .start(
                driver.as_ref(),
                "Pads",
                settings(0, 0),
                MappingTable::new(),
                RecordingSink::new(),
            )
            .await
            .unwrap();

        // The sender stays alive, so the loop is parked in recv
        let _tx = driver.sender();
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();

        assert!(!handle.is_listening());
        assert_eq!(handle.device(), None);
        assert_eq!(driver.close_count(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut handle = PipelineHandle::new();
        handle.stop().await;
        handle.stop().await;
        assert!(!handle.is_listening());
    }

    #[tokio::test]
    async fn restart_stops_the_previous_listener() {
        let driver = ScriptedDriver::new(&["Pads", "Keys"]);
        let mut handle = PipelineHandle::new();
        for device in ["Pads", "Keys"] {
            handle
                .start(
                    driver.as_ref(),
                    device,
                    settings(0, 0),
                    MappingTable::new(),
                    RecordingSink::new(),
                )
                .await
                .unwrap();
        }

        assert_eq!(driver.open_count(), 2);
        assert_eq!(driver.close_count(), 1);
        assert_eq!(handle.device(), Some("Keys"));

        handle.stop().await;
        assert_eq!(driver.close_count(), 2);
    }

    #[tokio::test]
    async fn start_fails_without_a_usable_device() {
        let driver = ScriptedDriver::new(&["Pads"]);
        let mut handle = PipelineHandle::new();

        let err = handle
            .start(
                driver.as_ref(),
                "  ",
                settings(0, 0),
                MappingTable::new(),
                RecordingSink::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoDevice));

        let err = handle
            .start(
                driver.as_ref(),
                "Launchpad",
                settings(0, 0),
                MappingTable::new(),
                RecordingSink::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Device(_)));
        assert!(!handle.is_listening());
        assert_eq!(driver.open_count(), 0);
    }
}
