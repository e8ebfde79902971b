//! MIDI event primitives carried by MIDI ports

use serde::{Deserialize, Serialize};

/// MIDI 1.0 status bytes
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PITCH_BEND: u8 = 0xE0;
}

/// Single MIDI 1.0 message, sample-accurate within a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Sample offset within the block (0 = start of block)
    pub sample_offset: u32,
    /// Raw message bytes (status, data1, data2)
    pub data: [u8; 3],
}

impl MidiEvent {
    pub fn new(sample_offset: u32, data: [u8; 3]) -> Self {
        Self {
            sample_offset,
            data,
        }
    }

    /// Create a Note On event
    pub fn note_on(sample_offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            sample_offset,
            [status::NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        )
    }

    /// Create a Note Off event
    pub fn note_off(sample_offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            sample_offset,
            [status::NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        )
    }

    /// Create a Control Change event
    pub fn control_change(sample_offset: u32, channel: u8, controller: u8, value: u8) -> Self {
        Self::new(
            sample_offset,
            [
                status::CONTROL_CHANGE | (channel & 0x0F),
                controller & 0x7F,
                value & 0x7F,
            ],
        )
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.data[0] & 0x0F
    }

    /// Note On with velocity 0 counts as Note Off
    pub fn is_note_on(&self) -> bool {
        self.status() == status::NOTE_ON && self.data[2] > 0
    }

    pub fn is_note_off(&self) -> bool {
        self.status() == status::NOTE_OFF || (self.status() == status::NOTE_ON && self.data[2] == 0)
    }
}
