//! Channel fader
//!
//! Gain, balance, mute and solo for one channel. Parameters are stored
//! lock-free so the control thread can move the fader while the audio
//! thread processes.
//!
//! Audio is processed in this order: gain and balance, mono fold-down,
//! phase swap, then silence if the channel is effectively muted. A channel
//! is effectively muted when it is muted itself or when the implied-mute
//! callback reports that another channel's solo should silence it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mg_core::{
    AudioLayout, Decibels, EngineProcessTimeInfo, MgResult, Port, PortBuffer, PortFlow, Processor,
    ProcessorBase, ProcessorId, ProcessorSnapshot, Sample,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{SignalType, check_single_io};

/// Lowest gain; treated as silence
pub const MIN_GAIN_DB: f64 = -144.0;
/// Highest gain
pub const MAX_GAIN_DB: f64 = 6.0;
/// Balance of an untouched fader
pub const CENTER_BALANCE: f64 = 0.5;

/// Decides whether other channels' solo state silences this one.
///
/// Called with this fader's own solo flag.
pub type ImpliedMute = Box<dyn Fn(bool) -> bool + Send + Sync>;

fn center_balance() -> f64 {
    CENTER_BALANCE
}

/// Serialized fader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaderState {
    pub processor: ProcessorSnapshot,
    pub signal_type: SignalType,
    pub gain_db: f64,
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    #[serde(default)]
    pub listened: bool,
    #[serde(default = "center_balance")]
    pub balance: f64,
    #[serde(default)]
    pub mono_compat: bool,
    #[serde(default)]
    pub swap_phase: bool,
}

/// Left/right gains for a balance position, linear law.
///
/// 0 is hard left, 0.5 center, 1 hard right. The louder side stays at unity.
pub fn balance_gains(balance: f64) -> (Sample, Sample) {
    let left = if balance < 0.5 { 1.0 } else { 1.0 - (balance - 0.5) / 0.5 };
    let right = if balance > 0.5 { 1.0 } else { balance / 0.5 };
    (left, right)
}

pub struct Fader {
    base: ProcessorBase,
    signal_type: SignalType,
    gain_db: AtomicU64,
    balance: AtomicU64,
    muted: AtomicBool,
    soloed: AtomicBool,
    listened: AtomicBool,
    mono_compat: AtomicBool,
    swap_phase: AtomicBool,
    implied_mute: RwLock<Option<ImpliedMute>>,
}

impl fmt::Debug for Fader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fader")
            .field("id", &self.base.id())
            .field("signal_type", &self.signal_type)
            .field("gain_db", &self.gain_db())
            .field("muted", &self.is_muted())
            .field("soloed", &self.is_soloed())
            .finish()
    }
}

impl Fader {
    pub fn new(signal_type: SignalType) -> Self {
        let mut base = ProcessorBase::new("Fader");
        match signal_type {
            SignalType::Audio => {
                base.add_input_port(Port::audio("Fader In", PortFlow::Input, AudioLayout::Stereo));
                base.add_output_port(Port::audio("Fader Out", PortFlow::Output, AudioLayout::Stereo));
            }
            SignalType::Midi => {
                base.add_input_port(Port::midi("Fader MIDI In", PortFlow::Input));
                base.add_output_port(Port::midi("Fader MIDI Out", PortFlow::Output));
            }
        }
        Self::from_base(base, signal_type)
    }

    /// Restore a fader. The implied-mute callback is not part of the state
    /// and has to be installed again.
    pub fn from_state(state: &FaderState) -> MgResult<Self> {
        let base = ProcessorBase::from_snapshot(&state.processor);
        check_single_io(&base, state.signal_type)?;
        let fader = Self::from_base(base, state.signal_type);
        fader.set_gain_db(state.gain_db);
        fader.set_balance(state.balance);
        fader.set_muted(state.muted);
        fader.set_soloed(state.soloed);
        fader.set_listened(state.listened);
        fader.set_mono_compat(state.mono_compat);
        fader.set_swap_phase(state.swap_phase);
        Ok(fader)
    }

    fn from_base(base: ProcessorBase, signal_type: SignalType) -> Self {
        Self {
            base,
            signal_type,
            gain_db: AtomicU64::new(0.0_f64.to_bits()),
            balance: AtomicU64::new(CENTER_BALANCE.to_bits()),
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
            listened: AtomicBool::new(false),
            mono_compat: AtomicBool::new(false),
            swap_phase: AtomicBool::new(false),
            implied_mute: RwLock::new(None),
        }
    }

    pub fn state(&self) -> FaderState {
        FaderState {
            processor: self.base.snapshot(),
            signal_type: self.signal_type,
            gain_db: self.gain_db(),
            muted: self.is_muted(),
            soloed: self.is_soloed(),
            listened: self.is_listened(),
            balance: self.balance(),
            mono_compat: self.mono_compat(),
            swap_phase: self.swap_phase(),
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

    pub fn gain_db(&self) -> f64 {
        f64::from_bits(self.gain_db.load(Ordering::Relaxed))
    }

    /// Set gain in dB, clamped to `MIN_GAIN_DB..=MAX_GAIN_DB`
    pub fn set_gain_db(&self, db: f64) {
        let db = if db.is_nan() { 0.0 } else { db.clamp(MIN_GAIN_DB, MAX_GAIN_DB) };
        self.gain_db.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn balance(&self) -> f64 {
        f64::from_bits(self.balance.load(Ordering::Relaxed))
    }

    /// Set balance, clamped to `0..=1`; NaN recenters
    pub fn set_balance(&self, balance: f64) {
        let balance = if balance.is_nan() { CENTER_BALANCE } else { balance.clamp(0.0, 1.0) };
        self.balance.store(balance.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn toggle_mute(&self) {
        self.muted.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.soloed.store(soloed, Ordering::Relaxed);
    }

    /// Monitoring flag. The fader stores it; routing the listened signal
    /// is up to the host.
    pub fn is_listened(&self) -> bool {
        self.listened.load(Ordering::Relaxed)
    }

    pub fn set_listened(&self, listened: bool) {
        self.listened.store(listened, Ordering::Relaxed);
    }

    pub fn mono_compat(&self) -> bool {
        self.mono_compat.load(Ordering::Relaxed)
    }

    /// Fold left and right to their average
    pub fn set_mono_compat(&self, enabled: bool) {
        self.mono_compat.store(enabled, Ordering::Relaxed);
    }

    pub fn swap_phase(&self) -> bool {
        self.swap_phase.load(Ordering::Relaxed)
    }

    /// Invert the polarity of every channel
    pub fn set_swap_phase(&self, enabled: bool) {
        self.swap_phase.store(enabled, Ordering::Relaxed);
    }

    /// Install the solo rule shared with the other channels
    pub fn set_implied_mute<F>(&self, callback: F)
    where
        F: Fn(bool) -> bool + Send + Sync + 'static,
    {
        *self.implied_mute.write() = Some(Box::new(callback));
    }

    pub fn clear_implied_mute(&self) {
        *self.implied_mute.write() = None;
    }

    /// Muted, or silenced by another channel's solo
    pub fn is_effectively_muted(&self) -> bool {
        if self.is_muted() {
            return true;
        }
        let soloed = self.is_soloed();
        self.implied_mute
            .read()
            .as_ref()
            .is_some_and(|implied| implied(soloed))
    }

    /// Effective linear gain (0 when effectively muted), before balance
    pub fn linear_gain(&self) -> f64 {
        if self.is_effectively_muted() {
            0.0
        } else {
            Decibels(self.gain_db()).to_gain()
        }
    }

    /// Balance, mono fold-down and phase swap over `range` of the output
    fn apply_stereo_controls(&self, start: usize, end: usize) {
        let (left_gain, right_gain) = balance_gains(self.balance());
        let mono = self.mono_compat();
        let polarity = if self.swap_phase() { -1.0 } else { 1.0 };

        let mut buffer = self.output_port().buffer();
        let PortBuffer::Audio(channels) = &mut *buffer else { return };
        let [left, right] = channels.as_mut_slice() else { return };
        let end = end.min(left.len()).min(right.len());
        for i in start.min(end)..end {
            let (mut l, mut r) = (left[i] * left_gain, right[i] * right_gain);
            if mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }
            left[i] = l * polarity;
            right[i] = r * polarity;
        }
    }
}

impl Processor for Fader {
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
        match self.signal_type {
            SignalType::Audio => {
                let gain = self.linear_gain();
                self.output_port()
                    .copy_from(self.input_port(), gain, range.clone());
                if gain != 0.0 {
                    self.apply_stereo_controls(range.start, range.end);
                }
            }
            SignalType::Midi => {
                let gain = if self.is_effectively_muted() { 0.0 } else { 1.0 };
                self.output_port().copy_from(self.input_port(), gain, range);
            }
        }
    }

    fn release_resources(&self) {
        self.base.release_ports();
    }
}
