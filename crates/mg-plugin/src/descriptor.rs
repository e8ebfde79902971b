//! Plugin descriptors
//!
//! A descriptor is everything known about a plugin before it is
//! instantiated: identity strings, hosting protocol, category and the
//! shape of its port set.

use serde::{Deserialize, Serialize};

/// Hosting protocol of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Built-in processor
    Internal,
    Vst3,
    Clap,
    Lv2,
    /// Audio Unit (macOS only)
    AudioUnit,
}

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginCategory {
    /// Effect processor (EQ, compressor, reverb, etc.)
    Effect,
    /// Virtual instrument / synth
    Instrument,
    /// MIDI in, MIDI out (arpeggiator, transposer, etc.)
    MidiEffect,
    /// Analyzer (spectrum, meter, etc.)
    Analyzer,
    /// Utility (gain, routing, etc.)
    Utility,
    Unknown,
}

/// Signal class a plugin or plugin group deals in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceGroupType {
    Audio,
    Midi,
    Instrument,
    Cv,
}

impl DeviceGroupType {
    /// Whether a plugin with `signal` as its primary signal may join a group of this type
    pub fn accepts(self, signal: DeviceGroupType) -> bool {
        self == signal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceGroupType::Audio => "audio",
            DeviceGroupType::Midi => "MIDI",
            DeviceGroupType::Instrument => "instrument",
            DeviceGroupType::Cv => "CV",
        }
    }
}

/// Plugin information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Display name
    pub name: String,
    pub vendor: String,
    pub protocol: Protocol,
    pub category: PluginCategory,
    /// Mono audio ports, one per channel
    pub audio_inputs: u32,
    pub audio_outputs: u32,
    pub midi_inputs: u32,
    pub midi_outputs: u32,
    pub cv_inputs: u32,
    pub cv_outputs: u32,
}

impl PluginDescriptor {
    /// Stereo effect shape (2 in, 2 out)
    pub fn new(name: &str, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            vendor: String::new(),
            protocol,
            category: PluginCategory::Effect,
            audio_inputs: 2,
            audio_outputs: 2,
            midi_inputs: 0,
            midi_outputs: 0,
            cv_inputs: 0,
            cv_outputs: 0,
        }
    }

    /// Built-in plugin of the given category with the port shape that category implies
    pub fn internal(name: &str, category: PluginCategory) -> Self {
        let base = Self {
            vendor: String::from("mixgraph"),
            category,
            ..Self::new(name, Protocol::Internal)
        };
        match category {
            PluginCategory::Instrument => base.with_audio_io(0, 2).with_midi_io(1, 0),
            PluginCategory::MidiEffect => base.with_audio_io(0, 0).with_midi_io(1, 1),
            _ => base,
        }
    }

    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = vendor.to_string();
        self
    }

    pub fn with_audio_io(mut self, inputs: u32, outputs: u32) -> Self {
        self.audio_inputs = inputs;
        self.audio_outputs = outputs;
        self
    }

    pub fn with_midi_io(mut self, inputs: u32, outputs: u32) -> Self {
        self.midi_inputs = inputs;
        self.midi_outputs = outputs;
        self
    }

    pub fn with_cv_io(mut self, inputs: u32, outputs: u32) -> Self {
        self.cv_inputs = inputs;
        self.cv_outputs = outputs;
        self
    }

    /// True for instrument plugins, or anything turning MIDI into audio
    pub fn is_instrument(&self) -> bool {
        self.category == PluginCategory::Instrument
            || (self.midi_inputs > 0 && self.audio_outputs > 0 && self.audio_inputs == 0)
    }

    pub fn is_midi_effect(&self) -> bool {
        self.category == PluginCategory::MidiEffect
            || (self.audio_outputs == 0 && self.midi_outputs > 0)
    }

    pub fn primary_signal(&self) -> DeviceGroupType {
        if self.is_instrument() {
            DeviceGroupType::Instrument
        } else if self.audio_outputs > 0 {
            DeviceGroupType::Audio
        } else if self.midi_outputs > 0 || self.is_midi_effect() {
            DeviceGroupType::Midi
        } else {
            DeviceGroupType::Cv
        }
    }
}
