//! Error definitions for the event pipeline

use crate::midi::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No device name was configured
    #[error("No input device configured")]
    NoDevice,

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A note-map entry could not be parsed
    #[error("Invalid note mapping '{entry}': {reason}")]
    InvalidMapping { entry: String, reason: String },
}

impl PipelineError {
    pub(crate) fn mapping(entry: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidMapping {
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }
}
