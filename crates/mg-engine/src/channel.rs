//! Mixer channel strip
//!
//! A channel owns three plugin slots (MIDI FX, instrument, inserts), a
//! fader, a passthrough on each side of the fader and its sends. The
//! channel's signal type is fixed at construction and decides which
//! passthrough/fader variant exists.

use std::sync::Arc;

use mg_core::{MgError, MgResult, PluginId, PortRegistry, Processor};
use mg_plugin::{
    DeviceGroupType, Plugin, PluginGroup, PluginGroupState, PluginRegistry, ProcessingTypeHint,
    Stage,
};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelSend, EngineConfig, Fader, FaderState, Passthrough, PassthroughState, SendState,
    SignalType,
};

/// Plugin slot of a channel, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginSlotType {
    MidiFx,
    Instrument,
    Insert,
}

impl PluginSlotType {
    pub const ALL: [PluginSlotType; 3] = [
        PluginSlotType::MidiFx,
        PluginSlotType::Instrument,
        PluginSlotType::Insert,
    ];
}

/// Serialized channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub signal_type: SignalType,
    pub midi_fx: PluginGroupState,
    pub instruments: PluginGroupState,
    pub inserts: PluginGroupState,
    pub fader: FaderState,
    pub prefader: PassthroughState,
    pub postfader: PassthroughState,
    pub prefader_sends: Vec<SendState>,
    pub postfader_sends: Vec<SendState>,
}

pub struct Channel {
    signal_type: SignalType,
    midi_fx: PluginGroup,
    instruments: PluginGroup,
    inserts: PluginGroup,
    fader: Arc<Fader>,
    prefader: Arc<Passthrough>,
    postfader: Arc<Passthrough>,
    prefader_sends: Vec<Arc<ChannelSend>>,
    postfader_sends: Vec<Arc<ChannelSend>>,
}

impl Channel {
    /// Channel with the send counts from `config`; all ports are registered
    pub fn new(signal_type: SignalType, config: &EngineConfig, ports: &mut PortRegistry) -> Self {
        let insert_type = match signal_type {
            SignalType::Audio => DeviceGroupType::Audio,
            SignalType::Midi => DeviceGroupType::Midi,
        };

        let channel = Self {
            signal_type,
            midi_fx: PluginGroup::serial("MIDI FX", DeviceGroupType::Midi),
            instruments: PluginGroup::serial("Instrument", DeviceGroupType::Instrument),
            inserts: PluginGroup::new("Inserts", insert_type, ProcessingTypeHint::Serial),
            fader: Arc::new(Fader::new(signal_type)),
            prefader: Arc::new(Passthrough::new("Pre-Fader", signal_type)),
            postfader: Arc::new(Passthrough::new("Post-Fader", signal_type)),
            prefader_sends: (0..config.prefader_sends)
                .map(|i| Arc::new(ChannelSend::new(signal_type, i, true)))
                .collect(),
            postfader_sends: (0..config.postfader_sends)
                .map(|i| Arc::new(ChannelSend::new(signal_type, i, false)))
                .collect(),
        };
        channel.register_ports(ports);
        channel
    }

    fn register_ports(&self, ports: &mut PortRegistry) {
        for processor in self.processors() {
            for port in processor.input_ports().iter().chain(processor.output_ports()) {
                ports.register(Arc::clone(port));
            }
        }
    }

    /// Fader, passthroughs and sends (plugins excluded)
    pub fn processors(&self) -> Vec<Arc<dyn Processor>> {
        let mut out: Vec<Arc<dyn Processor>> = vec![
            Arc::clone(&self.prefader) as Arc<dyn Processor>,
            Arc::clone(&self.fader) as Arc<dyn Processor>,
            Arc::clone(&self.postfader) as Arc<dyn Processor>,
        ];
        out.extend(self.sends().map(|s| Arc::clone(s) as Arc<dyn Processor>));
        out
    }

    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    pub fn is_audio(&self) -> bool {
        self.signal_type == SignalType::Audio
    }

    pub fn is_midi(&self) -> bool {
        self.signal_type == SignalType::Midi
    }

    pub fn fader(&self) -> &Arc<Fader> {
        &self.fader
    }

    /// Active pre-fader passthrough
    pub fn pre_fader(&self) -> &Arc<Passthrough> {
        &self.prefader
    }

    /// Active post-fader passthrough
    pub fn post_fader(&self) -> &Arc<Passthrough> {
        &self.postfader
    }

    pub fn audio_pre_fader(&self) -> Option<&Arc<Passthrough>> {
        self.is_audio().then_some(&self.prefader)
    }

    pub fn audio_post_fader(&self) -> Option<&Arc<Passthrough>> {
        self.is_audio().then_some(&self.postfader)
    }

    pub fn midi_pre_fader(&self) -> Option<&Arc<Passthrough>> {
        self.is_midi().then_some(&self.prefader)
    }

    pub fn midi_post_fader(&self) -> Option<&Arc<Passthrough>> {
        self.is_midi().then_some(&self.postfader)
    }

    pub fn prefader_sends(&self) -> &[Arc<ChannelSend>] {
        &self.prefader_sends
    }

    pub fn postfader_sends(&self) -> &[Arc<ChannelSend>] {
        &self.postfader_sends
    }

    /// Pre-fader sends, then post-fader sends
    pub fn sends(&self) -> impl Iterator<Item = &Arc<ChannelSend>> {
        self.prefader_sends.iter().chain(self.postfader_sends.iter())
    }

    pub fn midi_fx(&self) -> &PluginGroup {
        &self.midi_fx
    }

    pub fn midi_fx_mut(&mut self) -> &mut PluginGroup {
        &mut self.midi_fx
    }

    pub fn instruments(&self) -> &PluginGroup {
        &self.instruments
    }

    pub fn instruments_mut(&mut self) -> &mut PluginGroup {
        &mut self.instruments
    }

    pub fn inserts(&self) -> &PluginGroup {
        &self.inserts
    }

    pub fn inserts_mut(&mut self) -> &mut PluginGroup {
        &mut self.inserts
    }

    pub fn group(&self, slot: PluginSlotType) -> &PluginGroup {
        match slot {
            PluginSlotType::MidiFx => &self.midi_fx,
            PluginSlotType::Instrument => &self.instruments,
            PluginSlotType::Insert => &self.inserts,
        }
    }

    pub fn group_mut(&mut self, slot: PluginSlotType) -> &mut PluginGroup {
        match slot {
            PluginSlotType::MidiFx => &mut self.midi_fx,
            PluginSlotType::Instrument => &mut self.instruments,
            PluginSlotType::Insert => &mut self.inserts,
        }
    }

    /// Append all plugins: MIDI FX, then instruments, then inserts
    pub fn get_plugins(&self, out: &mut Vec<Arc<dyn Plugin>>) {
        for slot in PluginSlotType::ALL {
            self.group(slot).get_plugins(out);
        }
    }

    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut out = Vec::new();
        self.get_plugins(&mut out);
        out
    }

    /// Processing stages of all slots in chain order
    pub fn plugin_stages(&self) -> Vec<Stage> {
        PluginSlotType::ALL
            .iter()
            .flat_map(|&slot| self.group(slot).stages())
            .collect()
    }

    /// Slot holding the plugin, if any
    pub fn slot_of(&self, id: PluginId) -> Option<PluginSlotType> {
        PluginSlotType::ALL
            .into_iter()
            .find(|&slot| self.group(slot).contains(id))
    }

    /// Remove a plugin from whichever slot holds it.
    ///
    /// # Panics
    ///
    /// Panics if no slot contains `id`; callers check membership first.
    pub fn remove_plugin(&mut self, id: PluginId) -> Arc<dyn Plugin> {
        match self.try_remove_plugin(id) {
            Some(plugin) => plugin,
            None => panic!("plugin {} is not in any slot of this channel", id),
        }
    }

    /// Remove a plugin from the first slot (MIDI FX, instrument, inserts) holding it
    pub fn try_remove_plugin(&mut self, id: PluginId) -> Option<Arc<dyn Plugin>> {
        let slot = self.slot_of(id)?;
        self.group_mut(slot).remove_plugin(id).ok()
    }

    pub fn state(&self) -> ChannelState {
        ChannelState {
            signal_type: self.signal_type,
            midi_fx: self.midi_fx.state(),
            instruments: self.instruments.state(),
            inserts: self.inserts.state(),
            fader: self.fader.state(),
            prefader: self.prefader.state(),
            postfader: self.postfader.state(),
            prefader_sends: self.prefader_sends.iter().map(|s| s.state()).collect(),
            postfader_sends: self.postfader_sends.iter().map(|s| s.state()).collect(),
        }
    }

    /// Rebuild a channel, keeping every processor and port identity.
    /// Plugins are resolved through `plugins`; ports are re-registered.
    pub fn from_state(
        state: &ChannelState,
        plugins: &PluginRegistry,
        ports: &mut PortRegistry,
    ) -> MgResult<Self> {
        let restore_sends = |states: &[SendState], prefader: bool| -> MgResult<Vec<Arc<ChannelSend>>> {
            states
                .iter()
                .map(|s| {
                    if s.is_prefader != prefader || s.signal_type != state.signal_type {
                        return Err(MgError::Serialization(format!(
                            "send '{}' does not belong in this list",
                            s.processor.name
                        )));
                    }
                    ChannelSend::from_state(s).map(Arc::new)
                })
                .collect()
        };

        let fader = Fader::from_state(&state.fader)?;
        let prefader = Passthrough::from_state(&state.prefader)?;
        let postfader = Passthrough::from_state(&state.postfader)?;
        for signal in [fader.signal_type(), prefader.signal_type(), postfader.signal_type()] {
            if signal != state.signal_type {
                return Err(MgError::Serialization(
                    "fader/passthrough signal type differs from channel".into(),
                ));
            }
        }

        let channel = Self {
            signal_type: state.signal_type,
            midi_fx: PluginGroup::from_state(&state.midi_fx, plugins)?,
            instruments: PluginGroup::from_state(&state.instruments, plugins)?,
            inserts: PluginGroup::from_state(&state.inserts, plugins)?,
            fader: Arc::new(fader),
            prefader: Arc::new(prefader),
            postfader: Arc::new(postfader),
            prefader_sends: restore_sends(&state.prefader_sends, true)?,
            postfader_sends: restore_sends(&state.postfader_sends, false)?,
        };
        channel.register_ports(ports);
        Ok(channel)
    }

    pub fn to_json(&self) -> MgResult<String> {
        Ok(serde_json::to_string_pretty(&self.state())?)
    }

    pub fn from_json(
        json: &str,
        plugins: &PluginRegistry,
        ports: &mut PortRegistry,
    ) -> MgResult<Self> {
        let state: ChannelState = serde_json::from_str(json)?;
        Self::from_state(&state, plugins, ports)
    }
}
