//! Typed signal endpoints
//!
//! A port is a named, directed endpoint of a processor carrying one block of
//! signal per processing cycle:
//! - Audio ports hold one sample buffer per channel (mono/stereo/custom)
//! - MIDI ports hold a sample-ordered event queue
//! - CV ports hold a single control-rate sample buffer

use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MidiEvent, ProcessorId, Sample};

/// Stable port identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signal type carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    Midi,
    Cv,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Audio => write!(f, "Audio"),
            PortType::Midi => write!(f, "MIDI"),
            PortType::Cv => write!(f, "CV"),
        }
    }
}

/// Signal direction relative to the owning processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

/// Channel layout of an audio port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioLayout {
    Mono,
    #[default]
    Stereo,
    Custom(usize),
}

impl AudioLayout {
    pub fn channels(self) -> usize {
        match self {
            AudioLayout::Mono => 1,
            AudioLayout::Stereo => 2,
            AudioLayout::Custom(n) => n,
        }
    }
}

/// Per-block signal storage
#[derive(Debug, Clone, PartialEq)]
pub enum PortBuffer {
    Audio(Vec<Vec<Sample>>),
    Midi(Vec<MidiEvent>),
    Cv(Vec<Sample>),
}

impl PortBuffer {
    fn empty(port_type: PortType, channels: usize) -> Self {
        match port_type {
            PortType::Audio => PortBuffer::Audio(vec![Vec::new(); channels]),
            PortType::Midi => PortBuffer::Midi(Vec::new()),
            PortType::Cv => PortBuffer::Cv(Vec::new()),
        }
    }

    /// Zero audio/CV samples and drop queued MIDI events
    pub fn clear(&mut self) {
        match self {
            PortBuffer::Audio(channels) => {
                for channel in channels.iter_mut() {
                    channel.fill(0.0);
                }
            }
            PortBuffer::Midi(events) => events.clear(),
            PortBuffer::Cv(samples) => samples.fill(0.0),
        }
    }
}

/// Serializable port identity and shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub id: PortId,
    pub name: String,
    pub port_type: PortType,
    pub flow: PortFlow,
    pub channels: usize,
}

/// A typed, named signal endpoint
pub struct Port {
    id: PortId,
    name: String,
    port_type: PortType,
    flow: PortFlow,
    channels: usize,
    /// Back-reference to the owning processor (set once, never ownership)
    owner: OnceLock<ProcessorId>,
    buffer: Mutex<PortBuffer>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("port_type", &self.port_type)
            .field("flow", &self.flow)
            .field("channels", &self.channels)
            .field("owner", &self.owner.get())
            .finish()
    }
}

impl Port {
    fn with_shape(
        id: PortId,
        name: impl Into<String>,
        port_type: PortType,
        flow: PortFlow,
        channels: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            port_type,
            flow,
            channels,
            owner: OnceLock::new(),
            buffer: Mutex::new(PortBuffer::empty(port_type, channels)),
        }
    }

    /// Create an audio port with a fresh identity
    pub fn audio(name: impl Into<String>, flow: PortFlow, layout: AudioLayout) -> Self {
        Self::with_shape(PortId::new(), name, PortType::Audio, flow, layout.channels())
    }

    /// Create a MIDI port with a fresh identity
    pub fn midi(name: impl Into<String>, flow: PortFlow) -> Self {
        Self::with_shape(PortId::new(), name, PortType::Midi, flow, 1)
    }

    /// Create a CV port with a fresh identity
    pub fn cv(name: impl Into<String>, flow: PortFlow) -> Self {
        Self::with_shape(PortId::new(), name, PortType::Cv, flow, 1)
    }

    /// Recreate a port from its serialized identity
    pub fn from_snapshot(snapshot: &PortSnapshot) -> Self {
        Self::with_shape(
            snapshot.id,
            snapshot.name.clone(),
            snapshot.port_type,
            snapshot.flow,
            snapshot.channels,
        )
    }

    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            id: self.id,
            name: self.name.clone(),
            port_type: self.port_type,
            flow: self.flow,
            channels: self.channels,
        }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    #[inline]
    pub fn flow(&self) -> PortFlow {
        self.flow
    }

    pub fn is_input(&self) -> bool {
        self.flow == PortFlow::Input
    }

    pub fn is_output(&self) -> bool {
        self.flow == PortFlow::Output
    }

    /// Number of audio channels (1 for MIDI and CV)
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn owner(&self) -> Option<ProcessorId> {
        self.owner.get().copied()
    }

    /// Attach the owning processor. Returns false if an owner was already set.
    pub fn set_owner(&self, owner: ProcessorId) -> bool {
        self.owner.set(owner).is_ok()
    }

    /// Allocate buffers for `block_size` frames
    pub fn prepare(&self, block_size: usize) {
        let mut buffer = self.buffer.lock();
        match &mut *buffer {
            PortBuffer::Audio(channels) => {
                channels.resize(self.channels, Vec::new());
                for channel in channels.iter_mut() {
                    channel.clear();
                    channel.resize(block_size, 0.0);
                }
            }
            PortBuffer::Midi(events) => {
                events.clear();
                events.reserve(block_size.min(1024));
            }
            PortBuffer::Cv(samples) => {
                samples.clear();
                samples.resize(block_size, 0.0);
            }
        }
    }

    /// Release buffer memory
    pub fn release(&self) {
        *self.buffer.lock() = PortBuffer::empty(self.port_type, self.channels);
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Lock the buffer for direct access
    pub fn buffer(&self) -> MutexGuard<'_, PortBuffer> {
        self.buffer.lock()
    }

    /// Add `source`'s signal into this port.
    ///
    /// Audio/CV are summed; a mono source feeds every channel of this port,
    /// otherwise channels are matched positionally. MIDI events are merged
    /// and kept ordered by sample offset. Mismatched types are ignored.
    pub fn accumulate_from(&self, source: &Port) {
        self.accumulate_scaled(source, 1.0);
    }

    /// `accumulate_from` with `source` scaled by `gain`. A zero gain adds
    /// no MIDI events.
    pub fn accumulate_scaled(&self, source: &Port, gain: Sample) {
        if source.id == self.id {
            return;
        }
        let src = source.buffer.lock();
        let mut dst = self.buffer.lock();
        match (&*src, &mut *dst) {
            (PortBuffer::Audio(src_channels), PortBuffer::Audio(dst_channels)) => {
                if src_channels.is_empty() {
                    return;
                }
                for (ch, dst_channel) in dst_channels.iter_mut().enumerate() {
                    let src_channel = if src_channels.len() == 1 {
                        &src_channels[0]
                    } else if let Some(c) = src_channels.get(ch) {
                        c
                    } else {
                        continue;
                    };
                    for (d, s) in dst_channel.iter_mut().zip(src_channel.iter()) {
                        *d += *s * gain;
                    }
                }
            }
            (PortBuffer::Cv(src_samples), PortBuffer::Cv(dst_samples)) => {
                for (d, s) in dst_samples.iter_mut().zip(src_samples.iter()) {
                    *d += *s * gain;
                }
            }
            (PortBuffer::Midi(src_events), PortBuffer::Midi(dst_events)) => {
                if gain == 0.0 {
                    return;
                }
                dst_events.extend_from_slice(src_events);
                dst_events.sort_by_key(|e| e.sample_offset);
            }
            _ => {}
        }
    }

    /// Overwrite `range` of this port with `source` scaled by `gain`.
    ///
    /// Channel mapping follows `accumulate_from`. MIDI events are copied
    /// unscaled; a zero gain drops them.
    pub fn copy_from(&self, source: &Port, gain: Sample, range: Range<usize>) {
        if source.id == self.id {
            return;
        }
        let src = source.buffer.lock();
        let mut dst = self.buffer.lock();
        match (&*src, &mut *dst) {
            (PortBuffer::Audio(src_channels), PortBuffer::Audio(dst_channels)) => {
                for (ch, dst_channel) in dst_channels.iter_mut().enumerate() {
                    let src_channel = match src_channels.len() {
                        0 => None,
                        1 => src_channels.first(),
                        _ => src_channels.get(ch),
                    };
                    scale_into(dst_channel, src_channel.map(Vec::as_slice), gain, range.clone());
                }
            }
            (PortBuffer::Cv(src_samples), PortBuffer::Cv(dst_samples)) => {
                scale_into(dst_samples, Some(src_samples), gain, range);
            }
            (PortBuffer::Midi(src_events), PortBuffer::Midi(dst_events)) => {
                dst_events.clear();
                if gain != 0.0 {
                    dst_events.extend_from_slice(src_events);
                }
            }
            _ => {}
        }
    }

    /// Apply `gain` in place over `range`. Zero gain also drops MIDI events.
    pub fn apply_gain(&self, gain: Sample, range: Range<usize>) {
        match &mut *self.buffer.lock() {
            PortBuffer::Audio(channels) => {
                for channel in channels.iter_mut() {
                    let end = range.end.min(channel.len());
                    let start = range.start.min(end);
                    for s in &mut channel[start..end] {
                        *s *= gain;
                    }
                }
            }
            PortBuffer::Cv(samples) => {
                let end = range.end.min(samples.len());
                let start = range.start.min(end);
                for s in &mut samples[start..end] {
                    *s *= gain;
                }
            }
            PortBuffer::Midi(events) => {
                if gain == 0.0 {
                    events.clear();
                }
            }
        }
    }

    /// Copy one audio channel into this port (no-op on non-audio ports)
    pub fn write_audio(&self, channel: usize, samples: &[Sample]) {
        if let PortBuffer::Audio(channels) = &mut *self.buffer.lock() {
            if let Some(dst) = channels.get_mut(channel) {
                let len = dst.len().min(samples.len());
                dst[..len].copy_from_slice(&samples[..len]);
            }
        }
    }

    /// Copy of one audio channel (empty for non-audio ports)
    pub fn read_audio(&self, channel: usize) -> Vec<Sample> {
        match &*self.buffer.lock() {
            PortBuffer::Audio(channels) => channels.get(channel).cloned().unwrap_or_default(),
            PortBuffer::Cv(samples) if channel == 0 => samples.clone(),
            _ => Vec::new(),
        }
    }

    /// Queue a MIDI event (no-op on non-MIDI ports)
    pub fn push_midi(&self, event: MidiEvent) {
        if let PortBuffer::Midi(events) = &mut *self.buffer.lock() {
            events.push(event);
        }
    }

    /// Copy of queued MIDI events (empty for non-MIDI ports)
    pub fn midi_events(&self) -> Vec<MidiEvent> {
        match &*self.buffer.lock() {
            PortBuffer::Midi(events) => events.clone(),
            _ => Vec::new(),
        }
    }
}

fn scale_into(dst: &mut [Sample], src: Option<&[Sample]>, gain: Sample, range: Range<usize>) {
    let end = range.end.min(dst.len());
    let start = range.start.min(end);
    match src {
        Some(src) => {
            for i in start..end {
                dst[i] = src.get(i).copied().unwrap_or(0.0) * gain;
            }
        }
        None => dst[start..end].fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_layout_channels() {
        let port = Port::audio("Out", PortFlow::Output, AudioLayout::Stereo);
        assert_eq!(port.channels(), 2);
        assert_eq!(port.port_type(), PortType::Audio);
        assert!(port.is_output());

        let custom = Port::audio("Surround", PortFlow::Input, AudioLayout::Custom(6));
        assert_eq!(custom.channels(), 6);
    }

    #[test]
    fn test_owner_is_set_once() {
        let port = Port::midi("MIDI In", PortFlow::Input);
        let a = ProcessorId::new();
        let b = ProcessorId::new();
        assert!(port.set_owner(a));
        assert!(!port.set_owner(b));
        assert_eq!(port.owner(), Some(a));
    }

    #[test]
    fn test_mono_source_feeds_all_channels() {
        let src = Port::audio("Mono", PortFlow::Output, AudioLayout::Mono);
        let dst = Port::audio("Stereo", PortFlow::Input, AudioLayout::Stereo);
        src.prepare(4);
        dst.prepare(4);
        src.write_audio(0, &[1.0, 2.0, 3.0, 4.0]);

        dst.accumulate_from(&src);
        dst.accumulate_from(&src);

        assert_eq!(dst.read_audio(0), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(dst.read_audio(1), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_scaled_accumulate() {
        let src = Port::audio("Out", PortFlow::Output, AudioLayout::Stereo);
        let dst = Port::audio("In", PortFlow::Input, AudioLayout::Stereo);
        src.prepare(2);
        dst.prepare(2);
        src.write_audio(0, &[1.0, 1.0]);
        src.write_audio(1, &[2.0, 2.0]);
        dst.write_audio(0, &[0.5, 0.5]);

        dst.accumulate_scaled(&src, 0.5);
        assert_eq!(dst.read_audio(0), vec![1.0, 1.0]);
        assert_eq!(dst.read_audio(1), vec![1.0, 1.0]);

        let midi_src = Port::midi("A", PortFlow::Output);
        let midi_dst = Port::midi("In", PortFlow::Input);
        midi_src.push_midi(MidiEvent::note_on(0, 0, 60, 100));
        midi_dst.accumulate_scaled(&midi_src, 0.0);
        assert!(midi_dst.midi_events().is_empty());
    }

    #[test]
    fn test_midi_merge_is_sorted() {
        let a = Port::midi("A", PortFlow::Output);
        let b = Port::midi("B", PortFlow::Output);
        let dst = Port::midi("In", PortFlow::Input);
        a.push_midi(MidiEvent::note_on(10, 0, 60, 100));
        b.push_midi(MidiEvent::note_on(2, 0, 64, 100));

        dst.accumulate_from(&a);
        dst.accumulate_from(&b);

        let offsets: Vec<u32> = dst.midi_events().iter().map(|e| e.sample_offset).collect();
        assert_eq!(offsets, vec![2, 10]);
    }

    #[test]
    fn test_snapshot_preserves_identity() {
        let port = Port::cv("Mod", PortFlow::Input);
        let restored = Port::from_snapshot(&port.snapshot());
        assert_eq!(restored.id(), port.id());
        assert_eq!(restored.name(), "Mod");
        assert_eq!(restored.port_type(), PortType::Cv);
    }

    #[test]
    fn test_copy_from_scales_stereo() {
        let src = Port::audio("Out", PortFlow::Output, AudioLayout::Stereo);
        let dst = Port::audio("In", PortFlow::Input, AudioLayout::Stereo);
        src.prepare(2);
        dst.prepare(2);
        src.write_audio(0, &[1.0, 1.0]);
        src.write_audio(1, &[0.5, -0.5]);
        dst.write_audio(0, &[9.0, 9.0]);

        dst.copy_from(&src, 0.5, 0..2);

        assert_eq!(dst.read_audio(0), vec![0.5, 0.5]);
        assert_eq!(dst.read_audio(1), vec![0.25, -0.25]);
    }

    #[test]
    fn test_zero_gain_drops_midi() {
        let port = Port::midi("MIDI", PortFlow::Output);
        port.push_midi(MidiEvent::note_on(0, 0, 60, 100));
        port.apply_gain(1.0, 0..64);
        assert_eq!(port.midi_events().len(), 1);
        port.apply_gain(0.0, 0..64);
        assert!(port.midi_events().is_empty());
    }

    #[test]
    fn test_clear_zeroes_samples() {
        let port = Port::audio("Out", PortFlow::Output, AudioLayout::Mono);
        port.prepare(2);
        port.write_audio(0, &[0.5, 0.5]);
        port.clear();
        assert_eq!(port.read_audio(0), vec![0.0, 0.0]);
    }
}
