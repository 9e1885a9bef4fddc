//! Input device boundary
//!
//! A [`DeviceDriver`] opens a named input port and hands back a
//! [`DeviceHandle`] plus an ordered stream of normalised [`MidiEvent`]s.
//! Closing the handle, or the driver dropping its sender, ends the stream.
//!
//! Native driver bindings live outside this crate; implementations can use
//! [`MidiEvent::decode`] for raw bytes and [`select_port`] for name matching.

pub mod event;

pub use event::{MidiEvent, MidiEventType};

use tokio::sync::mpsc;

// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Input device not found: {0}")]
    NotFound(String),

    #[error("Failed to open input device: {0}")]
    Open(String),

    #[error("Failed to enumerate input devices: {0}")]
    Enumerate(String),

    #[error("Failed to close input device: {0}")]
    Close(String),
}

/// An open input port
pub trait DeviceHandle: Send {
    fn close(&mut self) -> Result<(), DeviceError>;
}

pub trait DeviceDriver: Send + Sync {
    fn list_inputs(&self) -> Result<Vec<String>, DeviceError>;

    fn open(
        &self,
        device_name: &str,
    ) -> Result<(Box<dyn DeviceHandle>, mpsc::Receiver<MidiEvent>), DeviceError>;
}

/// Picks the port for `wanted`: an exact name match wins, otherwise the first
/// port whose name contains `wanted`.
pub fn select_port<S: AsRef<str>>(ports: &[S], wanted: &str) -> Option<usize> {
    ports
        .iter()
        .position(|p| p.as_ref() == wanted)
        .or_else(|| ports.iter().position(|p| p.as_ref().contains(wanted)))
}
