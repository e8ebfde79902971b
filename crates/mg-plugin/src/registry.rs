//! Plugin factory and identity registry

use std::collections::HashMap;
use std::sync::Arc;

use mg_core::{MgError, MgResult, PluginId, PortRegistry, ProcessorId};

use crate::{InternalPlugin, Plugin, PluginDescriptor, Protocol};

/// Owns every live plugin by id so groups and commands can hold references
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<PluginId, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate a plugin from its descriptor and register it and its ports
    pub fn create_plugin(
        &mut self,
        descriptor: PluginDescriptor,
        ports: &mut PortRegistry,
    ) -> MgResult<Arc<dyn Plugin>> {
        self.create_plugin_with_id(ProcessorId::new(), descriptor, ports)
    }

    /// Same as `create_plugin` but keeps a known identity (project restore)
    pub fn create_plugin_with_id(
        &mut self,
        id: PluginId,
        descriptor: PluginDescriptor,
        ports: &mut PortRegistry,
    ) -> MgResult<Arc<dyn Plugin>> {
        if descriptor.protocol != Protocol::Internal {
            return Err(MgError::InvalidArgument(format!(
                "No host available for {:?} plugin '{}'",
                descriptor.protocol, descriptor.name
            )));
        }

        let plugin = Arc::new(InternalPlugin::with_id(id, descriptor));
        plugin.base().register_ports(ports);
        log::debug!("Created plugin '{}' ({})", plugin.base().name(), id);
        Ok(self.register(plugin))
    }

    /// Track an externally constructed plugin
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Arc<dyn Plugin> {
        self.plugins.insert(plugin.id(), Arc::clone(&plugin));
        plugin
    }

    pub fn find_by_id(&self, id: PluginId) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(&id).cloned()
    }

    pub fn find_by_id_or_err(&self, id: PluginId) -> MgResult<Arc<dyn Plugin>> {
        self.find_by_id(id).ok_or(MgError::PluginNotFound(id))
    }

    pub fn remove(&mut self, id: PluginId) -> Option<Arc<dyn Plugin>> {
        self.plugins.remove(&id)
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.plugins.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginCategory;

    #[test]
    fn test_create_registers_plugin_and_ports() {
        let mut plugins = PluginRegistry::new();
        let mut ports = PortRegistry::new();
        let plugin = plugins
            .create_plugin(PluginDescriptor::internal("EQ", PluginCategory::Effect), &mut ports)
            .unwrap();

        assert!(plugins.contains(plugin.id()));
        assert_eq!(ports.len(), 4);
        for port in plugin.input_ports() {
            assert!(ports.contains(port.id()));
        }
    }

    #[test]
    fn test_native_protocol_rejected() {
        let mut plugins = PluginRegistry::new();
        let mut ports = PortRegistry::new();
        let result = plugins.create_plugin(PluginDescriptor::new("Ext", Protocol::Vst3), &mut ports);
        assert!(matches!(result, Err(MgError::InvalidArgument(_))));
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_find_missing() {
        let plugins = PluginRegistry::new();
        let id = ProcessorId::new();
        assert!(matches!(
            plugins.find_by_id_or_err(id),
            Err(MgError::PluginNotFound(missing)) if missing == id
        ));
    }
}
