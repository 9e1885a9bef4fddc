//! Per-event admission rules
//!
//! Every event passes through the same ordered checks:
//!
//! 1. global debounce (any event type; a debounced event leaves the window
//!    where it was)
//! 2. trigger type (note-on only)
//! 3. channel allow-list
//! 4. mapping lookup
//! 5. per-key rate limit (the key's fire time is recorded on dispatch)
//!
//! The filter is owned by the single consumer loop, so it needs no locking.

use super::mapping::{EventKey, MappingTable};
use crate::midi::{MidiEvent, MidiEventType};
use crate::remote::Action;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSettings {
    /// Minimum spacing between any two accepted events. Zero disables it.
    pub debounce: Duration,
    /// Minimum spacing between two dispatches for one key. Zero disables it.
    pub rate_limit: Duration,
    /// Allowed channels; empty allows all.
    pub channels: Vec<u8>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(30),
            rate_limit: Duration::from_millis(50),
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Debounced,
    NotTrigger,
    ChannelFiltered,
    Unmapped,
    RateLimited,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::Debounced => write!(f, "debounced"),
            IgnoreReason::NotTrigger => write!(f, "not a trigger event"),
            IgnoreReason::ChannelFiltered => write!(f, "channel filtered"),
            IgnoreReason::Unmapped => write!(f, "no mapping"),
            IgnoreReason::RateLimited => write!(f, "rate limited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Dispatch { key: EventKey, action: Action },
    Ignored(IgnoreReason),
}

pub struct EventFilter {
    settings: FilterSettings,
    table: MappingTable,
    last_event: Option<Instant>,
    last_fired: HashMap<EventKey, Instant>,
}

impl EventFilter {
    pub fn new(settings: FilterSettings, table: MappingTable) -> Self {
        Self {
            settings,
            table,
            last_event: None,
            last_fired: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Decides what to do with `event` received at `now`.
    pub fn evaluate(&mut self, event: &MidiEvent, now: Instant) -> Verdict {
        if within(self.last_event, now, self.settings.debounce) {
            return Verdict::Ignored(IgnoreReason::Debounced);
        }
        self.last_event = Some(now);

        if event.event_type != MidiEventType::NoteOn {
            return Verdict::Ignored(IgnoreReason::NotTrigger);
        }

        if !self.settings.channels.is_empty() && !self.settings.channels.contains(&event.channel)
        {
            return Verdict::Ignored(IgnoreReason::ChannelFiltered);
        }

        let key = EventKey::of(event);
        let action = match self.table.get(&key) {
            Some(action) => action.clone(),
            None => return Verdict::Ignored(IgnoreReason::Unmapped),
        };

        if within(
            self.last_fired.get(&key).copied(),
            now,
            self.settings.rate_limit,
        ) {
            return Verdict::Ignored(IgnoreReason::RateLimited);
        }
        self.last_fired.insert(key, now);

        Verdict::Dispatch { key, action }
    }
}

// True if `last` is less than `interval` before `now`
fn within(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(last) if !interval.is_zero() => now.saturating_duration_since(last) < interval,
        _ => false,
    }
}
