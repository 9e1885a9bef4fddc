//! Event keys and the note-to-action mapping table

use super::PipelineError;
use crate::midi::MidiEvent;
use crate::remote::Action;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const MAX_NOTE: u8 = 127;

/// Identity of an input control: `(channel, note)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    /// 1-16
    pub channel: u8,
    /// 0-127
    pub note: u8,
}

impl EventKey {
    pub fn new(channel: u8, note: u8) -> Self {
        Self { channel, note }
    }

    pub fn of(event: &MidiEvent) -> Self {
        Self::new(event.channel, event.data1)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.note)
    }
}

impl FromStr for EventKey {
    type Err = PipelineError;

    /// Parses `"ch:note"`, whitespace around either number allowed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, note) = s
            .split_once(':')
            .ok_or_else(|| PipelineError::mapping(s, "expected ch:note"))?;
        if note.contains(':') {
            return Err(PipelineError::mapping(s, "expected ch:note"));
        }
        let channel = parse_channel(channel.trim())
            .ok_or_else(|| PipelineError::mapping(s, "channel must be 1-16"))?;
        let note = note
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|n| *n <= MAX_NOTE)
            .ok_or_else(|| PipelineError::mapping(s, "note must be 0-127"))?;
        Ok(Self::new(channel, note))
    }
}

/// Lookup from [`EventKey`] to the [`Action`] it triggers.
///
/// Later inserts for the same key replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: HashMap<EventKey, Action>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the action previously mapped to `key`, if any.
    pub fn insert(&mut self, key: EventKey, action: Action) -> Option<Action> {
        self.entries.insert(key, action)
    }

    pub fn get(&self, key: &EventKey) -> Option<&Action> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by key.
    pub fn entries(&self) -> Vec<(EventKey, &Action)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(k, a)| (*k, a)).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }

    /// Builds a table from `"ch:note=Scene"` strings. Malformed entries are
    /// logged and skipped.
    pub fn from_note_maps<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut table = Self::new();
        table.extend_note_maps(entries);
        table
    }

    /// Adds `"ch:note=Scene"` strings on top of the current entries.
    pub fn extend_note_maps<S: AsRef<str>>(&mut self, entries: &[S]) {
        for entry in entries {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                continue;
            }
            match parse_note_map(entry) {
                Ok((key, scene)) => {
                    self.insert(key, Action::SetScene(scene));
                }
                Err(e) => warn!("Skipping note mapping: {}", e),
            }
        }
    }
}

/// Parses one `"ch:note=Scene"` entry.
pub fn parse_note_map(entry: &str) -> Result<(EventKey, String), PipelineError> {
    let (key, scene) = entry
        .trim()
        .split_once('=')
        .ok_or_else(|| PipelineError::mapping(entry, "expected ch:note=Scene"))?;
    let scene = scene.trim();
    if scene.is_empty() {
        return Err(PipelineError::mapping(entry, "scene name is empty"));
    }
    let key = key
        .trim()
        .parse::<EventKey>()
        .map_err(|e| match e {
            PipelineError::InvalidMapping { reason, .. } => PipelineError::mapping(entry, reason),
            other => other,
        })?;
    Ok((key, scene.to_string()))
}

/// Parses a comma-separated channel allow-list such as `"1, 2"`.
///
/// Entries that are not a channel number in 1-16 are dropped. An empty result
/// means every channel is allowed.
pub fn parse_channels(raw: &str) -> Vec<u8> {
    let mut channels = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match parse_channel(part) {
            Some(ch) if !channels.contains(&ch) => channels.push(ch),
            Some(_) => {}
            None => warn!("Ignoring invalid channel '{}'", part),
        }
    }
    channels
}

/// Consecutive keys on `channel` starting at `start_note`, one per name,
/// stopping after note 127. Names beyond that are not assigned.
pub fn sequential_keys<S: AsRef<str>>(
    names: &[S],
    channel: u8,
    start_note: u8,
) -> Vec<(EventKey, String)> {
    (start_note..=MAX_NOTE)
        .zip(names)
        .map(|(note, name)| (EventKey::new(channel, note), name.as_ref().to_string()))
        .collect()
}

fn parse_channel(raw: &str) -> Option<u8> {
    raw.parse::<u8>().ok().filter(|ch| (1..=16).contains(ch))
}
