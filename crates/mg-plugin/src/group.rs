//! Plugin groups
//!
//! An ordered, typed container of plugins and nested groups. Insertion
//! order is processing order for serial groups; parallel groups run every
//! member on the same input and sum their outputs.
//!
//! Observers subscribe to row events instead of polling:
//! every successful insert/remove emits exactly one event.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use mg_core::{Decibels, MgError, MgResult, PluginId};
use serde::{Deserialize, Serialize};

use crate::{DeviceGroupType, Plugin, PluginRegistry};

/// How the members of a group are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingTypeHint {
    /// Output of each member feeds the next
    #[default]
    Serial,
    /// Every member receives the group input; outputs are summed
    Parallel,
    /// Host-defined routing; processed like `Serial`
    Custom,
}

/// Row change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginGroupEvent {
    RowsInserted { first: usize, count: usize },
    RowsRemoved { first: usize, count: usize },
}

/// Serialized group level/mute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupFaderState {
    pub gain: Decibels,
    pub muted: bool,
}

impl Default for GroupFaderState {
    fn default() -> Self {
        Self {
            gain: Decibels::ZERO,
            muted: false,
        }
    }
}

/// Group level/mute, applied where the group's output leaves its last stage.
///
/// Shared with the compiled graph, so changes are heard without a rebuild.
#[derive(Debug)]
pub struct GroupFader {
    gain_db: AtomicU64,
    muted: AtomicBool,
}

impl Default for GroupFader {
    fn default() -> Self {
        Self::from_state(&GroupFaderState::default())
    }
}

impl GroupFader {
    pub fn from_state(state: &GroupFaderState) -> Self {
        let fader = Self {
            gain_db: AtomicU64::new(0.0_f64.to_bits()),
            muted: AtomicBool::new(state.muted),
        };
        fader.set_gain(state.gain);
        fader
    }

    pub fn state(&self) -> GroupFaderState {
        GroupFaderState {
            gain: self.gain(),
            muted: self.is_muted(),
        }
    }

    pub fn gain(&self) -> Decibels {
        Decibels(f64::from_bits(self.gain_db.load(Ordering::Relaxed)))
    }

    /// NaN is stored as 0 dB
    pub fn set_gain(&self, gain: Decibels) {
        let db = if gain.0.is_nan() { 0.0 } else { gain.0 };
        self.gain_db.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Linear gain including mute
    pub fn linear_gain(&self) -> f64 {
        if self.is_muted() { 0.0 } else { self.gain().to_gain() }
    }
}

/// One plugin of a processing stage.
///
/// `faders` belong to the groups this plugin's output leaves together with
/// the stage, innermost first.
#[derive(Clone)]
pub struct StageMember {
    pub plugin: Arc<dyn Plugin>,
    pub faders: Vec<Arc<GroupFader>>,
}

impl StageMember {
    fn new(plugin: &Arc<dyn Plugin>) -> Self {
        Self {
            plugin: Arc::clone(plugin),
            faders: Vec::new(),
        }
    }

    /// Product of the attached group gains
    pub fn gain(&self) -> f64 {
        self.faders.iter().map(|f| f.linear_gain()).product()
    }
}

impl fmt::Debug for StageMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageMember")
            .field("plugin", &self.plugin.name())
            .field("faders", &self.faders.len())
            .finish()
    }
}

/// Plugins that receive the same input
pub type Stage = Vec<StageMember>;

/// Member of a group
pub enum GroupElement {
    Plugin(Arc<dyn Plugin>),
    Group(PluginGroup),
}

impl GroupElement {
    pub fn as_plugin(&self) -> Option<&Arc<dyn Plugin>> {
        match self {
            GroupElement::Plugin(p) => Some(p),
            GroupElement::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&PluginGroup> {
        match self {
            GroupElement::Plugin(_) => None,
            GroupElement::Group(g) => Some(g),
        }
    }

    fn collect_plugins(&self, out: &mut Vec<Arc<dyn Plugin>>) {
        match self {
            GroupElement::Plugin(p) => out.push(Arc::clone(p)),
            GroupElement::Group(g) => g.get_plugins(out),
        }
    }

    fn contains(&self, id: PluginId) -> bool {
        match self {
            GroupElement::Plugin(p) => p.id() == id,
            GroupElement::Group(g) => g.contains(id),
        }
    }
}

impl fmt::Debug for GroupElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupElement::Plugin(p) => write!(f, "Plugin({} {})", p.name(), p.id()),
            GroupElement::Group(g) => write!(f, "Group({:?})", g.name()),
        }
    }
}

/// Serialized member: plugins by id, groups inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupElementState {
    Plugin(PluginId),
    Group(PluginGroupState),
}

/// Serialized group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginGroupState {
    pub name: String,
    pub device_group_type: DeviceGroupType,
    pub processing_type: ProcessingTypeHint,
    pub fader: GroupFaderState,
    pub elements: Vec<GroupElementState>,
}

pub struct PluginGroup {
    name: String,
    device_group_type: DeviceGroupType,
    processing_type: ProcessingTypeHint,
    fader: Arc<GroupFader>,
    elements: Vec<GroupElement>,
    subscribers: Vec<Sender<PluginGroupEvent>>,
}

impl fmt::Debug for PluginGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginGroup")
            .field("name", &self.name)
            .field("device_group_type", &self.device_group_type)
            .field("processing_type", &self.processing_type)
            .field("elements", &self.elements)
            .finish()
    }
}

impl PluginGroup {
    pub fn new(
        name: impl Into<String>,
        device_group_type: DeviceGroupType,
        processing_type: ProcessingTypeHint,
    ) -> Self {
        Self {
            name: name.into(),
            device_group_type,
            processing_type,
            fader: Arc::new(GroupFader::default()),
            elements: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn serial(name: impl Into<String>, device_group_type: DeviceGroupType) -> Self {
        Self::new(name, device_group_type, ProcessingTypeHint::Serial)
    }

    pub fn parallel(name: impl Into<String>, device_group_type: DeviceGroupType) -> Self {
        Self::new(name, device_group_type, ProcessingTypeHint::Parallel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_group_type(&self) -> DeviceGroupType {
        self.device_group_type
    }

    pub fn processing_type(&self) -> ProcessingTypeHint {
        self.processing_type
    }

    pub fn fader(&self) -> &Arc<GroupFader> {
        &self.fader
    }

    /// Observe row changes. Dropped receivers are pruned on the next event.
    pub fn subscribe(&mut self) -> Receiver<PluginGroupEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: PluginGroupEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn clamp_index(&self, index: Option<usize>) -> usize {
        match index {
            Some(i) if i <= self.elements.len() => i,
            _ => self.elements.len(),
        }
    }

    fn insert_element(&mut self, element: GroupElement, index: Option<usize>) -> usize {
        let index = self.clamp_index(index);
        self.elements.insert(index, element);
        self.notify(PluginGroupEvent::RowsInserted {
            first: index,
            count: 1,
        });
        index
    }

    /// Insert a plugin at `index`, appending when `index` is `None` or past the end.
    ///
    /// Returns the row the plugin landed on. Fails if the plugin's primary
    /// signal does not match the group type or if it is already a member.
    pub fn insert_plugin(
        &mut self,
        plugin: Arc<dyn Plugin>,
        index: Option<usize>,
    ) -> MgResult<usize> {
        if !self.device_group_type.accepts(plugin.group_signal()) {
            return Err(MgError::IncompatiblePlugin {
                plugin: plugin.name().to_string(),
                group: self.device_group_type.as_str().to_string(),
            });
        }
        if self.contains(plugin.id()) {
            return Err(MgError::InvalidArgument(format!(
                "Plugin {} is already in group '{}'",
                plugin.id(),
                self.name
            )));
        }
        let row = self.insert_element(GroupElement::Plugin(plugin), index);
        log::debug!("Inserted plugin into '{}' at row {}", self.name, row);
        Ok(row)
    }

    pub fn append_plugin(&mut self, plugin: Arc<dyn Plugin>) -> MgResult<usize> {
        self.insert_plugin(plugin, None)
    }

    /// Nest a group. It must carry the same device type.
    pub fn insert_group(&mut self, group: PluginGroup, index: Option<usize>) -> MgResult<usize> {
        if group.device_group_type != self.device_group_type {
            return Err(MgError::IncompatiblePlugin {
                plugin: group.name.clone(),
                group: self.device_group_type.as_str().to_string(),
            });
        }
        Ok(self.insert_element(GroupElement::Group(group), index))
    }

    pub fn append_group(&mut self, group: PluginGroup) -> MgResult<usize> {
        self.insert_group(group, None)
    }

    /// Remove a plugin by id, searching nested groups too.
    ///
    /// Returns the plugin so the caller can re-insert it (undo).
    pub fn remove_plugin(&mut self, id: PluginId) -> MgResult<Arc<dyn Plugin>> {
        if let Some(row) = self.index_of(id) {
            let removed = self.elements.remove(row);
            self.notify(PluginGroupEvent::RowsRemoved {
                first: row,
                count: 1,
            });
            log::debug!("Removed plugin {} from '{}' row {}", id, self.name, row);
            return match removed {
                GroupElement::Plugin(p) => Ok(p),
                // index_of only matches direct plugin rows
                GroupElement::Group(_) => Err(MgError::PluginNotFound(id)),
            };
        }

        for element in &mut self.elements {
            if let GroupElement::Group(group) = element {
                if group.contains(id) {
                    return group.remove_plugin(id);
                }
            }
        }

        Err(MgError::InvalidArgument(format!(
            "Plugin {} not found in group '{}'",
            id, self.name
        )))
    }

    /// Append every plugin, depth first, in processing order
    pub fn get_plugins(&self, out: &mut Vec<Arc<dyn Plugin>>) {
        for element in &self.elements {
            element.collect_plugins(out);
        }
    }

    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut out = Vec::new();
        self.get_plugins(&mut out);
        out
    }

    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.plugins().iter().map(|p| p.id()).collect()
    }

    pub fn element_at_idx(&self, idx: usize) -> Option<&GroupElement> {
        self.elements.get(idx)
    }

    pub fn row_count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.elements.iter().any(|e| e.contains(id))
    }

    /// Row of a direct plugin member
    pub fn index_of(&self, id: PluginId) -> Option<usize> {
        self.elements
            .iter()
            .position(|e| e.as_plugin().is_some_and(|p| p.id() == id))
    }

    /// Processing stages in order.
    ///
    /// Every plugin of a stage receives the previous stage's output; a
    /// stage's outputs are summed into the next stage. The group fader is
    /// attached to the members of the last stage.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = match self.processing_type {
            ProcessingTypeHint::Parallel => {
                let members = self.parallel_members();
                if members.is_empty() {
                    Vec::new()
                } else {
                    vec![members]
                }
            }
            ProcessingTypeHint::Serial | ProcessingTypeHint::Custom => {
                let mut stages = Vec::new();
                for element in &self.elements {
                    match element {
                        GroupElement::Plugin(p) => stages.push(vec![StageMember::new(p)]),
                        GroupElement::Group(g) => stages.extend(g.stages()),
                    }
                }
                stages
            }
        };
        if let Some(last) = stages.last_mut() {
            for member in last.iter_mut() {
                member.faders.push(Arc::clone(&self.fader));
            }
        }
        stages
    }

    /// Every plugin as one stage; nested groups keep their own faders
    fn parallel_members(&self) -> Stage {
        let mut members = Vec::new();
        for element in &self.elements {
            match element {
                GroupElement::Plugin(p) => members.push(StageMember::new(p)),
                GroupElement::Group(g) => {
                    // a flattened member leaves through the nested fader whatever its stage
                    for mut member in g.stages().into_iter().flatten() {
                        if !member.faders.iter().any(|f| Arc::ptr_eq(f, &g.fader)) {
                            member.faders.push(Arc::clone(&g.fader));
                        }
                        members.push(member);
                    }
                }
            }
        }
        members
    }

    pub fn state(&self) -> PluginGroupState {
        PluginGroupState {
            name: self.name.clone(),
            device_group_type: self.device_group_type,
            processing_type: self.processing_type,
            fader: self.fader.state(),
            elements: self
                .elements
                .iter()
                .map(|e| match e {
                    GroupElement::Plugin(p) => GroupElementState::Plugin(p.id()),
                    GroupElement::Group(g) => GroupElementState::Group(g.state()),
                })
                .collect(),
        }
    }

    /// Rebuild a group, resolving plugin ids through the registry
    pub fn from_state(state: &PluginGroupState, plugins: &PluginRegistry) -> MgResult<Self> {
        let mut group = Self::new(
            state.name.clone(),
            state.device_group_type,
            state.processing_type,
        );
        group.fader = Arc::new(GroupFader::from_state(&state.fader));
        for element in &state.elements {
            match element {
                GroupElementState::Plugin(id) => {
                    group.append_plugin(plugins.find_by_id_or_err(*id)?)?;
                }
                GroupElementState::Group(nested) => {
                    group.append_group(Self::from_state(nested, plugins)?)?;
                }
            }
        }
        Ok(group)
    }

    pub fn to_json(&self) -> MgResult<String> {
        Ok(serde_json::to_string_pretty(&self.state())?)
    }

    pub fn from_json(json: &str, plugins: &PluginRegistry) -> MgResult<Self> {
        let state: PluginGroupState = serde_json::from_str(json)?;
        Self::from_state(&state, plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PluginCategory, PluginDescriptor};
    use approx::assert_relative_eq;
    use mg_core::PortRegistry;

    struct Fixture {
        plugins: PluginRegistry,
        ports: PortRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                plugins: PluginRegistry::new(),
                ports: PortRegistry::new(),
            }
        }

        fn effect(&mut self, name: &str) -> Arc<dyn Plugin> {
            self.plugins
                .create_plugin(PluginDescriptor::internal(name, PluginCategory::Effect), &mut self.ports)
                .unwrap()
        }

        fn instrument(&mut self, name: &str) -> Arc<dyn Plugin> {
            self.plugins
                .create_plugin(
                    PluginDescriptor::internal(name, PluginCategory::Instrument),
                    &mut self.ports,
                )
                .unwrap()
        }
    }

    fn names(group: &PluginGroup) -> Vec<String> {
        group.plugins().iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn test_insert_order() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        group.append_plugin(fx.effect("A")).unwrap();
        group.append_plugin(fx.effect("B")).unwrap();
        assert_eq!(group.insert_plugin(fx.effect("C"), Some(1)).unwrap(), 1);

        assert_eq!(names(&group), vec!["A", "C", "B"]);
        assert_eq!(group.row_count(), 3);
        let second = group.element_at_idx(1).and_then(GroupElement::as_plugin).unwrap();
        assert_eq!(second.name(), "C");
    }

    #[test]
    fn test_out_of_range_insert_appends() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        group.append_plugin(fx.effect("A")).unwrap();
        assert_eq!(group.insert_plugin(fx.effect("B"), Some(42)).unwrap(), 1);
        assert_eq!(names(&group), vec!["A", "B"]);
    }

    #[test]
    fn test_remove_absent_is_error() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        let a = fx.effect("A");
        group.append_plugin(Arc::clone(&a)).unwrap();

        let removed = group.remove_plugin(a.id()).unwrap();
        assert!(Arc::ptr_eq(&removed, &a));
        assert!(matches!(
            group.remove_plugin(a.id()),
            Err(MgError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_one_event_per_mutation() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        let events = group.subscribe();
        let a = fx.effect("A");

        group.append_plugin(Arc::clone(&a)).unwrap();
        group.insert_plugin(fx.effect("B"), Some(0)).unwrap();
        group.remove_plugin(a.id()).unwrap();
        let _ = group.remove_plugin(a.id());

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                PluginGroupEvent::RowsInserted { first: 0, count: 1 },
                PluginGroupEvent::RowsInserted { first: 0, count: 1 },
                PluginGroupEvent::RowsRemoved { first: 1, count: 1 },
            ]
        );
    }

    #[test]
    fn test_incompatible_plugin_rejected() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        let result = group.append_plugin(fx.instrument("Synth"));
        assert!(matches!(result, Err(MgError::IncompatiblePlugin { .. })));
        assert!(group.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        let a = fx.effect("A");
        group.append_plugin(Arc::clone(&a)).unwrap();
        assert!(group.append_plugin(a).is_err());
        assert_eq!(group.row_count(), 1);
    }

    #[test]
    fn test_nested_groups_flatten_in_order() {
        let mut fx = Fixture::new();
        let mut nested = PluginGroup::parallel("Bus", DeviceGroupType::Audio);
        nested.append_plugin(fx.effect("P1")).unwrap();
        nested.append_plugin(fx.effect("P2")).unwrap();

        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        group.append_plugin(fx.effect("A")).unwrap();
        group.append_group(nested).unwrap();
        group.append_plugin(fx.effect("B")).unwrap();

        assert_eq!(names(&group), vec!["A", "P1", "P2", "B"]);
        let stage_sizes: Vec<usize> = group.stages().iter().map(Vec::len).collect();
        assert_eq!(stage_sizes, vec![1, 2, 1]);

        let p2 = group.plugins()[2].id();
        assert!(group.contains(p2));
        assert_eq!(group.index_of(p2), None);
        group.remove_plugin(p2).unwrap();
        assert_eq!(names(&group), vec!["A", "P1", "B"]);
    }

    #[test]
    fn test_json_round_trip() {
        for n in [0usize, 1, 3] {
            let mut fx = Fixture::new();
            let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
            for i in 0..n {
                group.append_plugin(fx.effect(&format!("FX {}", i))).unwrap();
            }
            group.fader().set_muted(true);
            group.fader().set_gain(Decibels(-3.0));

            let json = group.to_json().unwrap();
            let restored = PluginGroup::from_json(&json, &fx.plugins).unwrap();

            assert_eq!(restored.plugin_ids(), group.plugin_ids());
            assert_eq!(restored.state(), group.state());
            assert_eq!(restored.to_json().unwrap(), json);
        }
    }

    #[test]
    fn test_stage_gain_follows_group_faders() {
        let mut fx = Fixture::new();
        let mut nested = PluginGroup::parallel("Bus", DeviceGroupType::Audio);
        nested.append_plugin(fx.effect("P1")).unwrap();
        nested.append_plugin(fx.effect("P2")).unwrap();
        nested.fader().set_gain(Decibels(-6.0));

        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        group.append_plugin(fx.effect("A")).unwrap();
        group.append_group(nested).unwrap();

        let stages = group.stages();
        assert_eq!(stages[0][0].gain(), 1.0);
        // nested fader, then the outer one
        assert_eq!(stages[1][0].faders.len(), 2);
        assert_relative_eq!(stages[1][1].gain(), 0.501187, epsilon = 1e-6);

        group.fader().set_muted(true);
        assert_eq!(stages[1][0].gain(), 0.0);
        assert_eq!(stages[0][0].gain(), 1.0);
    }

    #[test]
    fn test_from_json_unknown_plugin() {
        let mut fx = Fixture::new();
        let mut group = PluginGroup::serial("Inserts", DeviceGroupType::Audio);
        let a = fx.effect("A");
        group.append_plugin(Arc::clone(&a)).unwrap();
        let json = group.to_json().unwrap();

        fx.plugins.remove(a.id());
        assert!(matches!(
            PluginGroup::from_json(&json, &fx.plugins),
            Err(MgError::PluginNotFound(_))
        ));
    }
}
