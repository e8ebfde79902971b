//! mg-engine: Channel routing and graph execution for mixgraph
//!
//! Features:
//! - Processing graph of ports and processors with cycle prevention
//! - Channel strips: plugin slots, fader, pre/post-fader taps and sends
//! - Subgraph builder wiring a channel into the project graph
//! - Compiled execution order with atomic live-graph swap
//! - Undoable plugin add/remove commands

mod channel;
mod commands;
mod executor;
mod fader;
mod graph;
mod passthrough;
mod send;
mod subgraph;

pub use channel::*;
pub use commands::*;
pub use executor::*;
pub use fader::*;
pub use graph::*;
pub use passthrough::*;
pub use send::*;
pub use subgraph::*;

use mg_core::{MgError, MgResult, PortType, ProcessorBase, SampleRate};
use serde::{Deserialize, Serialize};

/// Signal type a channel carries after its plugin chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Audio,
    Midi,
}

impl SignalType {
    pub fn port_type(self) -> PortType {
        match self {
            SignalType::Audio => PortType::Audio,
            SignalType::Midi => PortType::Midi,
        }
    }
}

/// Restored processors must keep exactly one input and one output of the channel type
pub(crate) fn check_single_io(base: &ProcessorBase, signal_type: SignalType) -> MgResult<()> {
    let expected = signal_type.port_type();
    let ok = base.input_ports().len() == 1
        && base.output_ports().len() == 1
        && base.input_ports()[0].port_type() == expected
        && base.output_ports()[0].port_type() == expected;
    if ok {
        Ok(())
    } else {
        Err(MgError::Serialization(format!(
            "'{}' must have one {} input and one {} output",
            base.name(),
            expected,
            expected
        )))
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    pub block_size: usize,
    /// Pre-fader sends created per channel
    pub prefader_sends: usize,
    /// Post-fader sends created per channel
    pub postfader_sends: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            block_size: 256,
            prefader_sends: 1,
            postfader_sends: 1,
        }
    }
}

impl EngineConfig {
    /// Create config for minimum latency
    pub fn low_latency() -> Self {
        Self {
            block_size: 64,
            ..Self::default()
        }
    }

    /// Create config for maximum quality
    pub fn high_quality() -> Self {
        Self {
            sample_rate: SampleRate::Hz96000,
            block_size: 512,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> MgResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.block_size == 0 {
            return Err(MgError::InvalidArgument("block_size must be non-zero".into()));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> MgResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        let default = EngineConfig::default();
        assert_eq!(default.prefader_sends, 1);
        assert_eq!(default.postfader_sends, 1);
        assert!(EngineConfig::low_latency().block_size < default.block_size);
        assert_eq!(EngineConfig::high_quality().sample_rate, SampleRate::Hz96000);
    }

    #[test]
    fn test_config_json() {
        let config = EngineConfig {
            prefader_sends: 2,
            ..EngineConfig::low_latency()
        };
        let restored = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);

        let bad = r#"{"sample_rate":"Hz48000","block_size":0,"prefader_sends":1,"postfader_sends":1}"#;
        assert!(EngineConfig::from_json(bad).is_err());
        assert!(matches!(
            EngineConfig::from_json("{"),
            Err(MgError::Serialization(_))
        ));
    }
}
