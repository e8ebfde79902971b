//! Channel sends
//!
//! A send taps the channel before or after the fader and copies the signal,
//! scaled by its amount, to an optional destination port. The destination
//! is a weak reference by id; it may live in another channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mg_core::{
    AudioLayout, EngineProcessTimeInfo, MgResult, Port, PortFlow, PortId, Processor,
    ProcessorBase, ProcessorId, ProcessorSnapshot,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{SignalType, check_single_io};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendState {
    pub processor: ProcessorSnapshot,
    pub signal_type: SignalType,
    pub is_prefader: bool,
    pub index: usize,
    pub amount: f64,
    pub enabled: bool,
    pub destination: Option<PortId>,
}

pub struct ChannelSend {
    base: ProcessorBase,
    signal_type: SignalType,
    is_prefader: bool,
    /// Slot within its pre- or post-fader list
    index: usize,
    /// Linear amount as f64 bits
    amount: AtomicU64,
    enabled: AtomicBool,
    destination: RwLock<Option<PortId>>,
}

impl ChannelSend {
    pub fn new(signal_type: SignalType, index: usize, is_prefader: bool) -> Self {
        let tap = if is_prefader { "Pre-Fader" } else { "Post-Fader" };
        let mut base = ProcessorBase::new(format!("{} Send {}", tap, index + 1));
        match signal_type {
            SignalType::Audio => {
                base.add_input_port(Port::audio("Send In", PortFlow::Input, AudioLayout::Stereo));
                base.add_output_port(Port::audio("Send Out", PortFlow::Output, AudioLayout::Stereo));
            }
            SignalType::Midi => {
                base.add_input_port(Port::midi("Send MIDI In", PortFlow::Input));
                base.add_output_port(Port::midi("Send MIDI Out", PortFlow::Output));
            }
        }
        Self {
            base,
            signal_type,
            is_prefader,
            index,
            amount: AtomicU64::new(1.0_f64.to_bits()),
            enabled: AtomicBool::new(false),
            destination: RwLock::new(None),
        }
    }

    pub fn from_state(state: &SendState) -> MgResult<Self> {
        let base = ProcessorBase::from_snapshot(&state.processor);
        check_single_io(&base, state.signal_type)?;
        let send = Self {
            base,
            signal_type: state.signal_type,
            is_prefader: state.is_prefader,
            index: state.index,
            amount: AtomicU64::new(1.0_f64.to_bits()),
            enabled: AtomicBool::new(state.enabled),
            destination: RwLock::new(state.destination),
        };
        send.set_amount(state.amount);
        Ok(send)
    }

    pub fn state(&self) -> SendState {
        SendState {
            processor: self.base.snapshot(),
            signal_type: self.signal_type,
            is_prefader: self.is_prefader,
            index: self.index,
            amount: self.amount(),
            enabled: self.is_enabled(),
            destination: self.destination(),
        }
    }

    pub fn is_prefader(&self) -> bool {
        self.is_prefader
    }

    pub fn index(&self) -> usize {
        self.index
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

    pub fn amount(&self) -> f64 {
        f64::from_bits(self.amount.load(Ordering::Relaxed))
    }

    /// Set the linear send amount (clamped to 0..=2)
    pub fn set_amount(&self, amount: f64) {
        let amount = if amount.is_nan() { 0.0 } else { amount.clamp(0.0, 2.0) };
        self.amount.store(amount.to_bits(), Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn destination(&self) -> Option<PortId> {
        *self.destination.read()
    }

    pub fn set_destination(&self, port: PortId) {
        *self.destination.write() = Some(port);
    }

    pub fn clear_destination(&self) {
        *self.destination.write() = None;
    }
}

impl Processor for ChannelSend {
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
        let gain = match (self.is_enabled(), self.signal_type) {
            (false, _) => 0.0,
            (true, SignalType::Audio) => self.amount(),
            (true, SignalType::Midi) => 1.0,
        };
        self.output_port()
            .copy_from(self.input_port(), gain, time.range());
    }

    fn release_resources(&self) {
        self.base.release_ports();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let send = ChannelSend::new(SignalType::Audio, 0, true);
        assert!(send.is_prefader());
        assert!(!send.is_enabled());
        assert_eq!(send.amount(), 1.0);
        assert_eq!(send.destination(), None);
        assert_eq!(send.name(), "Pre-Fader Send 1");
    }

    #[test]
    fn test_disabled_send_is_silent() {
        let send = ChannelSend::new(SignalType::Audio, 0, false);
        send.prepare_for_processing(48000.0, 2);
        send.input_port().write_audio(0, &[1.0, 1.0]);

        send.process_block(&EngineProcessTimeInfo::new(0, 2));
        assert_eq!(send.output_port().read_audio(0), vec![0.0, 0.0]);

        send.set_enabled(true);
        send.set_amount(0.25);
        send.process_block(&EngineProcessTimeInfo::new(2, 2));
        assert_relative_eq!(send.output_port().read_audio(0)[1], 0.25);
    }

    #[test]
    fn test_destination() {
        let send = ChannelSend::new(SignalType::Midi, 0, false);
        let target = PortId::new();
        send.set_destination(target);
        assert_eq!(send.destination(), Some(target));

        let restored = ChannelSend::from_state(&send.state()).unwrap();
        assert_eq!(restored.destination(), Some(target));
        assert_eq!(restored.id(), send.id());
        assert!(!restored.is_prefader());

        send.clear_destination();
        assert_eq!(send.destination(), None);
    }
}
