//! UUID-keyed port registry
//!
//! Connections and sends refer to ports by `PortId`; the registry resolves
//! those ids back to live ports.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{AudioLayout, MgError, MgResult, Port, PortFlow, PortId};

#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: HashMap<PortId, Arc<Port>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_audio_port(
        &mut self,
        name: impl Into<String>,
        flow: PortFlow,
        layout: AudioLayout,
    ) -> Arc<Port> {
        self.register(Arc::new(Port::audio(name, flow, layout)))
    }

    pub fn create_midi_port(&mut self, name: impl Into<String>, flow: PortFlow) -> Arc<Port> {
        self.register(Arc::new(Port::midi(name, flow)))
    }

    pub fn create_cv_port(&mut self, name: impl Into<String>, flow: PortFlow) -> Arc<Port> {
        self.register(Arc::new(Port::cv(name, flow)))
    }

    /// Register an existing port. Re-registering an id replaces the entry.
    pub fn register(&mut self, port: Arc<Port>) -> Arc<Port> {
        if let Some(old) = self.ports.insert(port.id(), Arc::clone(&port)) {
            if !Arc::ptr_eq(&old, &port) {
                log::debug!("Port {} re-registered", port.id());
            }
        }
        port
    }

    pub fn find_by_id(&self, id: PortId) -> Option<Arc<Port>> {
        self.ports.get(&id).cloned()
    }

    pub fn find_by_id_or_err(&self, id: PortId) -> MgResult<Arc<Port>> {
        self.find_by_id(id).ok_or(MgError::PortNotFound(id))
    }

    pub fn remove(&mut self, id: PortId) -> Option<Arc<Port>> {
        self.ports.remove(&id)
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
