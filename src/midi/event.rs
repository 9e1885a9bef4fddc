use chrono::{DateTime, Local};
use std::fmt;

// Event type after normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiEventType {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
}

impl fmt::Display for MidiEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiEventType::NoteOn => write!(f, "note_on"),
            MidiEventType::NoteOff => write!(f, "note_off"),
            MidiEventType::ControlChange => write!(f, "control_change"),
            MidiEventType::ProgramChange => write!(f, "program_change"),
        }
    }
}

/// Normalised channel message from an input device
#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    pub event_type: MidiEventType,
    /// 1-16
    pub channel: u8,
    /// Note / controller / program number
    pub data1: u8,
    /// Velocity / controller value; 0 for program change
    pub data2: u8,
    pub timestamp: DateTime<Local>,
}

impl MidiEvent {
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            event_type: MidiEventType::NoteOn,
            channel,
            data1: note,
            data2: velocity,
            timestamp: Local::now(),
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self {
            event_type: MidiEventType::NoteOff,
            channel,
            data1: note,
            data2: 0,
            timestamp: Local::now(),
        }
    }

    /// Decodes one raw MIDI message.
    ///
    /// Only note on/off, control change and program change are kept; system
    /// messages (status >= 0xF0), other channel messages and truncated
    /// messages yield `None`. A note-on with velocity 0 is reported as a
    /// note-off.
    pub fn decode(bytes: &[u8], timestamp: DateTime<Local>) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        if status >= 0xF0 {
            return None;
        }
        let channel = (status & 0x0F) + 1;
        let data1 = data.first().map(|b| b & 0x7F);
        let data2 = data.get(1).map(|b| b & 0x7F);

        let (event_type, data1, data2) = match status >> 4 {
            0x8 => (MidiEventType::NoteOff, data1?, data2?),
            0x9 => {
                let (note, velocity) = (data1?, data2?);
                if velocity == 0 {
                    (MidiEventType::NoteOff, note, 0)
                } else {
                    (MidiEventType::NoteOn, note, velocity)
                }
            }
            0xB => (MidiEventType::ControlChange, data1?, data2?),
            0xC => (MidiEventType::ProgramChange, data1?, 0),
            _ => return None,
        };

        Some(Self {
            event_type,
            channel,
            data1,
            data2,
            timestamp,
        })
    }
}
