//! Pre/post-fader tap points
//!
//! A passthrough copies its input to its output unchanged. Channels use
//! one before and one after the fader so sends and meters have a fixed
//! place to tap the signal.

use std::sync::Arc;

use mg_core::{
    AudioLayout, EngineProcessTimeInfo, MgResult, Port, PortFlow, PortType, Processor,
    ProcessorBase, ProcessorId, ProcessorSnapshot,
};
use serde::{Deserialize, Serialize};

use crate::{SignalType, check_single_io};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassthroughState {
    pub processor: ProcessorSnapshot,
    pub signal_type: SignalType,
}

pub struct Passthrough {
    base: ProcessorBase,
    signal_type: SignalType,
}

impl Passthrough {
    pub fn new(name: &str, signal_type: SignalType) -> Self {
        let mut base = ProcessorBase::new(name);
        match signal_type {
            SignalType::Audio => {
                base.add_input_port(Port::audio(
                    format!("{} Audio In", name),
                    PortFlow::Input,
                    AudioLayout::Stereo,
                ));
                base.add_output_port(Port::audio(
                    format!("{} Audio Out", name),
                    PortFlow::Output,
                    AudioLayout::Stereo,
                ));
            }
            SignalType::Midi => {
                base.add_input_port(Port::midi(format!("{} MIDI In", name), PortFlow::Input));
                base.add_output_port(Port::midi(format!("{} MIDI Out", name), PortFlow::Output));
            }
        }
        Self { base, signal_type }
    }

    pub fn from_state(state: &PassthroughState) -> MgResult<Self> {
        let base = ProcessorBase::from_snapshot(&state.processor);
        check_single_io(&base, state.signal_type)?;
        Ok(Self {
            base,
            signal_type: state.signal_type,
        })
    }

    pub fn state(&self) -> PassthroughState {
        PassthroughState {
            processor: self.base.snapshot(),
            signal_type: self.signal_type,
        }
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn input_port(&self) -> &Arc<Port> {
        &self.base.input_ports()[0]
    }

    pub fn output_port(&self) -> &Arc<Port> {
        &self.base.output_ports()[0]
    }

    pub fn audio_in_port(&self) -> Option<&Arc<Port>> {
        self.base.input_ports_of_type(PortType::Audio).next()
    }

    pub fn audio_out_port(&self) -> Option<&Arc<Port>> {
        self.base.output_ports_of_type(PortType::Audio).next()
    }

    pub fn midi_in_port(&self, index: usize) -> Option<&Arc<Port>> {
        self.base.input_ports_of_type(PortType::Midi).nth(index)
    }

    pub fn midi_out_port(&self, index: usize) -> Option<&Arc<Port>> {
        self.base.output_ports_of_type(PortType::Midi).nth(index)
    }
}

impl Processor for Passthrough {
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
        self.output_port()
            .copy_from(self.input_port(), 1.0, time.range());
    }

    fn release_resources(&self) {
        self.base.release_ports();
    }
}
