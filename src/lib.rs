//! # scenefire
//!
//! Fires one action on several remote show-control endpoints as close to a
//! shared instant as possible, and turns note input from a controller into
//! such actions.
//!
//! ## Architecture
//!
//! ```text
//! DeviceDriver ──► pipeline (filter ─► sink) ──┐
//!                                              ▼
//!                 ShowControl ──────────► Coordinator ──► ConnectionCache ──► Connector
//!                                              │
//!                                        scheduler::wait_until
//! ```
//!
//! - [`scheduler`] - deadline wait with a busy-poll tail
//! - [`remote`] - remote-control client seam and connection cache
//! - [`actuation`] - multi-target coordinator and its error taxonomy
//! - [`midi`] - input device seam and event decoding
//! - [`pipeline`] - event ingestion state machine
//! - [`config`] - TOML configuration
//! - [`show`] - owning context tying the above together
//!
//! Concrete network and device clients are supplied by the embedding
//! application through [`remote::Connector`] and [`midi::DeviceDriver`].

pub mod actuation;
pub mod config;
pub mod logging;
pub mod midi;
pub mod pipeline;
pub mod remote;
pub mod scheduler;
pub mod show;

#[cfg(test)]
pub(crate) mod test_support;

pub use actuation::{ActuationError, ActuationReport, ActuationRequest, Coordinator};
pub use config::AppConfig;
pub use remote::{Action, Target};
pub use show::ShowControl;
