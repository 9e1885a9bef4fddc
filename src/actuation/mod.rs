//! Synchronised multi-target actuation
//!
//! Issues one [`Action`] to every target of a request as close as possible to a
//! shared fire time:
//!
//! 1. [`coordinator`] - resolves sessions, runs one unit of work per target and
//!    aggregates the outcome
//! 2. [`error`] - call-level and target-level error taxonomy
//!
//! # Flow
//!
//! ```text
//!                    ┌─► unit(target 1): wait_until ─► issue ─► report
//! resolve sessions ──┼─► unit(target 2): wait_until ─► issue ─► report ──► aggregate
//!                    └─► unit(target N): wait_until ─► issue ─► report
//! ```
//!
//! "Simultaneous" means within the scheduler's spin-window precision plus
//! task scheduling and network jitter; issue order across targets carries no
//! meaning.

pub mod coordinator;
pub mod error;

pub use coordinator::{Coordinator, ProbeResult, ProbeStatus};
pub use error::{ActuationError, TargetError, TargetFailure};

use crate::remote::{Action, Target};
use chrono::{DateTime, Local};
use std::time::Duration;

/// How sessions are obtained for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Fresh session per target, closed when the call completes. For one-shot
    /// invocations.
    Ephemeral,
    /// Sessions come from the connection cache. A failed issue invalidates the
    /// session and retries once on a new one.
    Cached,
}

/// Timing knobs shared by every target of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Trailing part of the wait serviced by busy-polling.
    pub spin_window: Duration,
    /// Bound for each connect and each issue call.
    pub call_timeout: Duration,
    /// Log `actual fire timestamp - requested fire time` per target.
    pub skew_log: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            spin_window: Duration::from_millis(2),
            call_timeout: Duration::from_secs(5),
            skew_log: true,
        }
    }
}

impl Timing {
    /// Reactive trigger: no spin window, no skew logging.
    pub fn immediate(call_timeout: Duration) -> Self {
        Self {
            spin_window: Duration::ZERO,
            call_timeout,
            skew_log: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActuationRequest {
    pub targets: Vec<Target>,
    pub action: Action,
    /// May be in the past, meaning "fire now".
    pub fire_time: DateTime<Local>,
    pub timing: Timing,
    pub policy: SessionPolicy,
}

impl ActuationRequest {
    /// Immediate request through the connection cache.
    pub fn immediate(targets: Vec<Target>, action: Action, call_timeout: Duration) -> Self {
        Self {
            targets,
            action,
            fire_time: Local::now(),
            timing: Timing::immediate(call_timeout),
            policy: SessionPolicy::Cached,
        }
    }
}

/// A target that received the action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTarget {
    pub name: String,
    pub address: String,
    pub fired_at: DateTime<Local>,
    /// `fired_at - fire_time`
    pub skew: chrono::Duration,
}

/// Outcome of a call in which every resolved target succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActuationReport {
    pub fired: Vec<FiredTarget>,
    /// Targets that could not be connected; the call still succeeded for the
    /// rest.
    pub unreachable: Vec<TargetFailure>,
}

impl ActuationReport {
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty()
    }
}
