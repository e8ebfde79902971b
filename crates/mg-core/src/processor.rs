//! Processor abstraction
//!
//! Anything that consumes input ports and produces output ports once per
//! block: plugins, faders, passthroughs. Processors are shared between the
//! channel that owns them and the graph that schedules them, so every
//! method takes `&self` and mutable state lives behind atomics or locks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineProcessTimeInfo, Port, PortRegistry, PortSnapshot, PortType};

/// Stable processor identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessorId(pub Uuid);

impl ProcessorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plugins are identified by their processor identity
pub type PluginId = ProcessorId;

/// Block processor with typed ports
pub trait Processor: Send + Sync {
    fn id(&self) -> ProcessorId;

    fn name(&self) -> &str;

    fn input_ports(&self) -> &[Arc<Port>];

    fn output_ports(&self) -> &[Arc<Port>];

    /// Allocate buffers for the given block size
    fn prepare_for_processing(&self, sample_rate: f64, max_block_size: usize);

    /// Read inputs, write outputs for one block
    fn process_block(&self, time: &EngineProcessTimeInfo);

    fn release_resources(&self) {}

    fn input_ports_of_type(&self, port_type: PortType) -> Vec<Arc<Port>> {
        self.input_ports()
            .iter()
            .filter(|p| p.port_type() == port_type)
            .cloned()
            .collect()
    }

    fn output_ports_of_type(&self, port_type: PortType) -> Vec<Arc<Port>> {
        self.output_ports()
            .iter()
            .filter(|p| p.port_type() == port_type)
            .cloned()
            .collect()
    }
}

impl fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("inputs", &self.input_ports().len())
            .field("outputs", &self.output_ports().len())
            .finish()
    }
}

/// Serializable processor identity plus its ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    pub id: ProcessorId,
    pub name: String,
    pub inputs: Vec<PortSnapshot>,
    pub outputs: Vec<PortSnapshot>,
}

/// Port bookkeeping shared by every processor implementation
#[derive(Debug)]
pub struct ProcessorBase {
    id: ProcessorId,
    name: String,
    inputs: Vec<Arc<Port>>,
    outputs: Vec<Arc<Port>>,
}

impl ProcessorBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(ProcessorId::new(), name)
    }

    pub fn with_id(id: ProcessorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Rebuild a processor base, keeping processor and port identities
    pub fn from_snapshot(snapshot: &ProcessorSnapshot) -> Self {
        let mut base = Self::with_id(snapshot.id, snapshot.name.clone());
        for port in &snapshot.inputs {
            base.add_input_port(Port::from_snapshot(port));
        }
        for port in &snapshot.outputs {
            base.add_output_port(Port::from_snapshot(port));
        }
        base
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            id: self.id,
            name: self.name.clone(),
            inputs: self.inputs.iter().map(|p| p.snapshot()).collect(),
            outputs: self.outputs.iter().map(|p| p.snapshot()).collect(),
        }
    }

    #[inline]
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach an input port and claim ownership of it
    pub fn add_input_port(&mut self, port: Port) -> Arc<Port> {
        port.set_owner(self.id);
        let port = Arc::new(port);
        self.inputs.push(Arc::clone(&port));
        port
    }

    /// Attach an output port and claim ownership of it
    pub fn add_output_port(&mut self, port: Port) -> Arc<Port> {
        port.set_owner(self.id);
        let port = Arc::new(port);
        self.outputs.push(Arc::clone(&port));
        port
    }

    pub fn input_ports(&self) -> &[Arc<Port>] {
        &self.inputs
    }

    pub fn output_ports(&self) -> &[Arc<Port>] {
        &self.outputs
    }

    pub fn input_ports_of_type(&self, port_type: PortType) -> impl Iterator<Item = &Arc<Port>> {
        self.inputs.iter().filter(move |p| p.port_type() == port_type)
    }

    pub fn output_ports_of_type(&self, port_type: PortType) -> impl Iterator<Item = &Arc<Port>> {
        self.outputs.iter().filter(move |p| p.port_type() == port_type)
    }

    /// Register every port with the registry so it can be resolved by id
    pub fn register_ports(&self, registry: &mut PortRegistry) {
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            registry.register(Arc::clone(port));
        }
    }

    pub fn prepare_ports(&self, max_block_size: usize) {
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            port.prepare(max_block_size);
        }
    }

    pub fn clear_outputs(&self) {
        for port in &self.outputs {
            port.clear();
        }
    }

    pub fn release_ports(&self) {
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            port.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioLayout, PortFlow};

    fn stereo_base() -> ProcessorBase {
        let mut base = ProcessorBase::new("Strip");
        base.add_input_port(Port::audio("In", PortFlow::Input, AudioLayout::Stereo));
        base.add_input_port(Port::midi("MIDI In", PortFlow::Input));
        base.add_output_port(Port::audio("Out", PortFlow::Output, AudioLayout::Stereo));
        base
    }

    #[test]
    fn test_ports_are_owned() {
        let base = stereo_base();
        for port in base.input_ports().iter().chain(base.output_ports()) {
            assert_eq!(port.owner(), Some(base.id()));
        }
    }

    #[test]
    fn test_ports_of_type() {
        let base = stereo_base();
        assert_eq!(base.input_ports_of_type(PortType::Audio).count(), 1);
        assert_eq!(base.input_ports_of_type(PortType::Midi).count(), 1);
        assert_eq!(base.output_ports_of_type(PortType::Midi).count(), 0);
    }

    #[test]
    fn test_snapshot_restores_identities() {
        let base = stereo_base();
        let restored = ProcessorBase::from_snapshot(&base.snapshot());

        assert_eq!(restored.id(), base.id());
        assert_eq!(restored.name(), "Strip");
        let ids = |b: &ProcessorBase| -> Vec<_> {
            b.input_ports()
                .iter()
                .chain(b.output_ports())
                .map(|p| p.id())
                .collect()
        };
        assert_eq!(ids(&restored), ids(&base));
        assert_eq!(restored.output_ports()[0].owner(), Some(base.id()));
    }

    #[test]
    fn test_register_ports() {
        let base = stereo_base();
        let mut registry = PortRegistry::new();
        base.register_ports(&mut registry);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(base.output_ports()[0].id()));
    }
}
