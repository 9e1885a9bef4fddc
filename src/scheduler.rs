//! Deadline scheduler
//!
//! Waits until a wall-clock instant with a two-phase strategy: a coarse
//! `tokio::time::sleep` for the bulk of the wait, then a busy-poll with
//! voluntary yields for the trailing `spin_window`. Coarse timers routinely
//! overshoot by a scheduler tick, so the spin phase is what gives sub-tick
//! accuracy when firing several targets at the same instant.

use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::debug;

/// Returns once `Local::now() >= deadline`.
///
/// A deadline in the past (or exactly now) returns immediately. The spin
/// window cannot be negative; a window larger than the remaining time means
/// the whole wait is spent polling.
pub async fn wait_until(deadline: DateTime<Local>, spin_window: Duration) {
    let remaining = match (deadline - Local::now()).to_std() {
        Ok(remaining) if !remaining.is_zero() => remaining,
        _ => return,
    };

    if remaining > spin_window {
        let coarse = remaining - spin_window;
        debug!(
            "Sleeping {:?} before spinning for the last {:?}",
            coarse, spin_window
        );
        tokio::time::sleep(coarse).await;
    }

    while Local::now() < deadline {
        tokio::task::yield_now().await;
    }
}
