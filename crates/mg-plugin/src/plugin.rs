//! Plugin processors
//!
//! `Plugin` is a `Processor` that also carries a descriptor and an
//! enabled/bypass flag. `InternalPlugin` is the built-in implementation
//! used for internal devices and for testing chains.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mg_core::{
    AudioLayout, EngineProcessTimeInfo, Port, PortFlow, PortType, Processor, ProcessorBase,
    ProcessorId, Sample,
};

use crate::{DeviceGroupType, PluginDescriptor};

/// Hosted plugin instance
pub trait Plugin: Processor {
    fn descriptor(&self) -> &PluginDescriptor;

    fn is_enabled(&self) -> bool;

    /// Disabled plugins pass their input through unchanged
    fn set_enabled(&self, enabled: bool);

    /// Upcast for graph registration
    fn as_processor(self: Arc<Self>) -> Arc<dyn Processor>;

    fn group_signal(&self) -> DeviceGroupType {
        self.descriptor().primary_signal()
    }
}

/// Built-in plugin with one mono audio port per declared channel
pub struct InternalPlugin {
    base: ProcessorBase,
    descriptor: PluginDescriptor,
    enabled: AtomicBool,
    /// Linear gain as f64 bits
    gain: AtomicU64,
    audio_ins: Vec<Arc<Port>>,
    audio_outs: Vec<Arc<Port>>,
    midi_ins: Vec<Arc<Port>>,
    midi_outs: Vec<Arc<Port>>,
    cv_ins: Vec<Arc<Port>>,
    cv_outs: Vec<Arc<Port>>,
}

impl InternalPlugin {
    pub fn new(descriptor: PluginDescriptor) -> Self {
        Self::with_id(ProcessorId::new(), descriptor)
    }

    /// Instantiate with a known identity
    pub fn with_id(id: ProcessorId, descriptor: PluginDescriptor) -> Self {
        let mut base = ProcessorBase::with_id(id, descriptor.name.clone());

        let mut add_ports = |count: u32, flow: PortFlow, port_type: PortType| -> Vec<Arc<Port>> {
            let dir = match flow {
                PortFlow::Input => "In",
                PortFlow::Output => "Out",
            };
            (0..count)
                .map(|i| {
                    let port = match port_type {
                        PortType::Audio => Port::audio(
                            format!("Audio {} {}", dir, i + 1),
                            flow,
                            AudioLayout::Mono,
                        ),
                        PortType::Midi => Port::midi(format!("MIDI {} {}", dir, i + 1), flow),
                        PortType::Cv => Port::cv(format!("CV {} {}", dir, i + 1), flow),
                    };
                    match flow {
                        PortFlow::Input => base.add_input_port(port),
                        PortFlow::Output => base.add_output_port(port),
                    }
                })
                .collect()
        };

        let audio_ins = add_ports(descriptor.audio_inputs, PortFlow::Input, PortType::Audio);
        let midi_ins = add_ports(descriptor.midi_inputs, PortFlow::Input, PortType::Midi);
        let cv_ins = add_ports(descriptor.cv_inputs, PortFlow::Input, PortType::Cv);
        let audio_outs = add_ports(descriptor.audio_outputs, PortFlow::Output, PortType::Audio);
        let midi_outs = add_ports(descriptor.midi_outputs, PortFlow::Output, PortType::Midi);
        let cv_outs = add_ports(descriptor.cv_outputs, PortFlow::Output, PortType::Cv);

        Self {
            base,
            descriptor,
            enabled: AtomicBool::new(true),
            gain: AtomicU64::new(1.0_f64.to_bits()),
            audio_ins,
            audio_outs,
            midi_ins,
            midi_outs,
            cv_ins,
            cv_outs,
        }
    }

    pub fn gain(&self) -> Sample {
        f64::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Set the linear gain applied while enabled (negative values clamp to 0)
    pub fn set_gain(&self, gain: Sample) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn base(&self) -> &ProcessorBase {
        &self.base
    }
}

impl Processor for InternalPlugin {
    fn id(&self) -> ProcessorId {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn input_ports(&self) -> &[Arc<Port>] {
        self.base.input_ports()
    }

    fn output_ports(&self) -> &[Arc<Port>] {
        self.base.output_ports()
    }

    fn prepare_for_processing(&self, _sample_rate: f64, max_block_size: usize) {
        self.base.prepare_ports(max_block_size);
    }

    fn process_block(&self, time: &EngineProcessTimeInfo) {
        let range = time.range();
        let gain = if self.is_enabled() { self.gain() } else { 1.0 };

        // Output i reads input i % n
        for (i, out) in self.audio_outs.iter().enumerate() {
            if self.audio_ins.is_empty() {
                out.clear();
            } else {
                let input = &self.audio_ins[i % self.audio_ins.len()];
                out.copy_from(input, gain, range.clone());
            }
        }

        for (i, out) in self.cv_outs.iter().enumerate() {
            if self.cv_ins.is_empty() {
                out.clear();
            } else {
                out.copy_from(&self.cv_ins[i % self.cv_ins.len()], 1.0, range.clone());
            }
        }

        for out in &self.midi_outs {
            out.clear();
            for input in &self.midi_ins {
                out.accumulate_from(input);
            }
        }
    }

    fn release_resources(&self) {
        self.base.release_ports();
    }
}

impl Plugin for InternalPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn as_processor(self: Arc<Self>) -> Arc<dyn Processor> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginCategory;
    use approx::assert_relative_eq;
    use mg_core::MidiEvent;

    #[test]
    fn test_port_layout_follows_descriptor() {
        let plugin = InternalPlugin::new(PluginDescriptor::internal("Synth", PluginCategory::Instrument));

        assert_eq!(plugin.input_ports_of_type(PortType::Midi).len(), 1);
        assert_eq!(plugin.input_ports_of_type(PortType::Audio).len(), 0);
        let outs = plugin.output_ports_of_type(PortType::Audio);
        assert_eq!(outs.len(), 2);
        assert!(outs.iter().all(|p| p.channels() == 1));
        assert!(outs.iter().all(|p| p.owner() == Some(plugin.id())));
    }

    #[test]
    fn test_gain_applies_when_enabled() {
        let plugin = InternalPlugin::new(PluginDescriptor::internal("Gain", PluginCategory::Utility));
        plugin.prepare_for_processing(48000.0, 4);
        plugin.set_gain(0.5);
        plugin.input_ports()[0].write_audio(0, &[1.0, 1.0, 1.0, 1.0]);
        plugin.input_ports()[1].write_audio(0, &[0.2, 0.2, 0.2, 0.2]);

        plugin.process_block(&EngineProcessTimeInfo::new(0, 4));
        assert_relative_eq!(plugin.output_ports()[0].read_audio(0)[0], 0.5);
        assert_relative_eq!(plugin.output_ports()[1].read_audio(0)[3], 0.1);

        plugin.set_enabled(false);
        plugin.process_block(&EngineProcessTimeInfo::new(4, 4));
        assert_relative_eq!(plugin.output_ports()[0].read_audio(0)[0], 1.0);
    }

    #[test]
    fn test_mono_in_feeds_every_output() {
        let desc = PluginDescriptor::internal("Widener", PluginCategory::Effect).with_audio_io(1, 2);
        let plugin = InternalPlugin::new(desc);
        plugin.prepare_for_processing(48000.0, 2);
        plugin.input_ports()[0].write_audio(0, &[0.25, 0.75]);

        plugin.process_block(&EngineProcessTimeInfo::new(0, 2));

        for out in plugin.output_ports() {
            assert_eq!(out.read_audio(0), vec![0.25, 0.75]);
        }
    }

    #[test]
    fn test_midi_forwarded_to_all_outputs() {
        let desc = PluginDescriptor::internal("Splitter", PluginCategory::MidiEffect).with_midi_io(1, 2);
        let plugin = InternalPlugin::new(desc);
        plugin.prepare_for_processing(48000.0, 64);
        plugin.input_ports()[0].push_midi(MidiEvent::note_on(3, 0, 60, 90));

        plugin.process_block(&EngineProcessTimeInfo::new(0, 64));

        for out in plugin.output_ports() {
            assert_eq!(out.midi_events(), vec![MidiEvent::note_on(3, 0, 60, 90)]);
        }
    }
}
