//! Scripted collaborator doubles for unit tests
//!
//! [`ScriptedConnector`] stands in for the remote-control client. It records
//! every open, close and successful issue, and can delay or fail them.
//! [`ScriptedDriver`] stands in for an input device driver and hands the test
//! the sending side of the event stream. [`RecordingSink`] collects pipeline triggers.

use crate::midi::{select_port, DeviceDriver, DeviceError, DeviceHandle, MidiEvent};
use crate::pipeline::{Trigger, TriggerSink};
use crate::remote::{Action, Connector, RemoteError, Session};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Script {
    unreachable: HashSet<String>,
    // Remaining scripted issue failures per address
    failing: HashMap<String, usize>,
    // Issue delay per address, with the number of issues it still applies to
    slow: HashMap<String, (Duration, Option<usize>)>,
    slow_open: HashMap<String, Duration>,
    slow_close: HashMap<String, Duration>,
    // Session indexes whose issues always fail
    dead: HashSet<usize>,
    scenes: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct Record {
    opens: Vec<(String, Option<String>)>,
    // Indexed by session, in open order
    closes: Vec<usize>,
    issued: Vec<(String, Action, DateTime<Local>)>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    record: Mutex<Record>,
}

#[derive(Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opening `address` fails.
    pub fn unreachable(self: Arc<Self>, address: &str) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .unreachable
            .insert(address.to_string());
        self
    }

    /// The next `count` issues against `address` fail, across sessions.
    pub fn failing_issues(self: Arc<Self>, address: &str, count: usize) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .failing
            .insert(address.to_string(), count);
        self
    }

    /// Issues against `address` take `delay` before completing.
    pub fn slow(self: Arc<Self>, address: &str, delay: Duration) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .slow
            .insert(address.to_string(), (delay, None));
        self
    }

    /// Only the next `count` issues against `address` take `delay`.
    pub fn slow_issues(self: Arc<Self>, address: &str, delay: Duration, count: usize) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .slow
            .insert(address.to_string(), (delay, Some(count)));
        self
    }

    /// Opening `address` takes `delay` before the session exists.
    pub fn slow_open(self: Arc<Self>, address: &str, delay: Duration) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .slow_open
            .insert(address.to_string(), delay);
        self
    }

    /// Closing sessions to `address` takes `delay`; the close is recorded
    /// once it completes.
    pub fn slow_close(self: Arc<Self>, address: &str, delay: Duration) -> Arc<Self> {
        self.shared
            .script
            .lock()
            .unwrap()
            .slow_close
            .insert(address.to_string(), delay);
        self
    }

    /// Every issue on the `index`-th opened session fails from now on.
    pub fn kill_session(&self, index: usize) {
        self.shared.script.lock().unwrap().dead.insert(index);
    }

    pub fn scenes(self: Arc<Self>, address: &str, scenes: &[&str]) -> Arc<Self> {
        self.shared.script.lock().unwrap().scenes.insert(
            address.to_string(),
            scenes.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Open attempts for `address`, failed ones included.
    pub fn open_count(&self, address: &str) -> usize {
        self.shared
            .record
            .lock()
            .unwrap()
            .opens
            .iter()
            .filter(|(a, _)| a == address)
            .count()
    }

    pub fn credentials_used(&self, address: &str) -> Vec<Option<String>> {
        self.shared
            .record
            .lock()
            .unwrap()
            .opens
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Close calls on the `index`-th successfully opened session.
    pub fn close_count(&self, index: usize) -> usize {
        self.shared
            .record
            .lock()
            .unwrap()
            .closes
            .get(index)
            .copied()
            .unwrap_or(0)
    }

    /// Successful issues as `(address, action, issued_at)`.
    pub fn issued(&self) -> Vec<(String, Action, DateTime<Local>)> {
        self.shared.record.lock().unwrap().issued.clone()
    }

    pub fn issued_to(&self, address: &str) -> usize {
        self.shared
            .record
            .lock()
            .unwrap()
            .issued
            .iter()
            .filter(|(a, _, _)| a == address)
            .count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        address: &str,
        credential: Option<&str>,
    ) -> Result<Box<dyn Session>, RemoteError> {
        let (unreachable, delay) = {
            let script = self.shared.script.lock().unwrap();
            (
                script.unreachable.contains(address),
                script.slow_open.get(address).copied(),
            )
        };
        self.shared
            .record
            .lock()
            .unwrap()
            .opens
            .push((address.to_string(), credential.map(str::to_string)));
        if unreachable {
            return Err(RemoteError::Connect(format!("{} refused", address)));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut record = self.shared.record.lock().unwrap();
        let index = record.closes.len();
        record.closes.push(0);
        Ok(Box::new(ScriptedSession {
            index,
            address: address.to_string(),
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedSession {
    index: usize,
    address: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn issue_action(&self, action: &Action) -> Result<(), RemoteError> {
        let delay = {
            let mut script = self.shared.script.lock().unwrap();
            match script.slow.get_mut(&self.address) {
                Some((delay, None)) => Some(*delay),
                Some((delay, Some(remaining))) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*delay)
                }
                _ => None,
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut script = self.shared.script.lock().unwrap();
            if script.dead.contains(&self.index) {
                return Err(RemoteError::Request("Session closed".to_string()));
            }
            if let Some(remaining) = script.failing.get_mut(&self.address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RemoteError::Request("scripted failure".to_string()));
                }
            }
        }
        self.shared.record.lock().unwrap().issued.push((
            self.address.clone(),
            action.clone(),
            Local::now(),
        ));
        Ok(())
    }

    async fn list_scenes(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .shared
            .script
            .lock()
            .unwrap()
            .scenes
            .get(&self.address)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let delay = self
            .shared
            .script
            .lock()
            .unwrap()
            .slow_close
            .get(&self.address)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.record.lock().unwrap().closes[self.index] += 1;
        Ok(())
    }
}

/// Driver exposing a fixed port list. Each open replaces the stored sender.
pub struct ScriptedDriver {
    ports: Vec<String>,
    sender: Mutex<Option<mpsc::Sender<MidiEvent>>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    pub fn new(ports: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            sender: Mutex::new(None),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Sending side of the most recently opened stream.
    pub fn sender(&self) -> mpsc::Sender<MidiEvent> {
        self.sender
            .lock()
            .unwrap()
            .clone()
            .expect("no device opened")
    }

    /// Drops the stored sender, ending the stream once the test's clones are
    /// gone too.
    pub fn disconnect(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DeviceDriver for ScriptedDriver {
    fn list_inputs(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.ports.clone())
    }

    fn open(
        &self,
        device_name: &str,
    ) -> Result<(Box<dyn DeviceHandle>, mpsc::Receiver<MidiEvent>), DeviceError> {
        let index = select_port(&self.ports, device_name)
            .ok_or_else(|| DeviceError::NotFound(device_name.to_string()))?;
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((
            Box::new(ScriptedHandle {
                port: self.ports[index].clone(),
                closes: self.closes.clone(),
            }),
            rx,
        ))
    }
}

struct ScriptedHandle {
    port: String,
    closes: Arc<AtomicUsize>,
}

impl DeviceHandle for ScriptedHandle {
    fn close(&mut self) -> Result<(), DeviceError> {
        tracing::debug!("Closing scripted port {}", self.port);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps every trigger it receives.
#[derive(Default)]
pub struct RecordingSink {
    triggers: Mutex<Vec<Trigger>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.triggers.lock().unwrap().clone()
    }
}

impl TriggerSink for RecordingSink {
    fn dispatch(&self, trigger: Trigger) {
        self.triggers.lock().unwrap().push(trigger);
    }
}
