//! Undoable plugin edits
//!
//! Commands mutate a shared channel and record enough to reverse
//! themselves. Redo/undo may run any number of times without drifting
//! plugin order.

use std::collections::VecDeque;
use std::sync::Arc;

use mg_core::{MgError, MgResult, PluginId};
use mg_plugin::Plugin;
use parking_lot::RwLock;

use crate::{Channel, PluginSlotType};

/// Undoable command
pub trait Command: Send + Sync {
    fn execute(&mut self) -> MgResult<()>;

    fn undo(&mut self) -> MgResult<()>;

    /// Display name
    fn name(&self) -> &str;
}

/// Undo/redo stacks with bounded history
pub struct UndoManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    max_history: usize,
    group_depth: usize,
    group_commands: Vec<Box<dyn Command>>,
}

impl UndoManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history),
            redo_stack: Vec::new(),
            max_history: max_history.max(1),
            group_depth: 0,
            group_commands: Vec::new(),
        }
    }

    /// Run a command and record it. A failed command is not recorded.
    pub fn execute(&mut self, mut command: Box<dyn Command>) -> MgResult<()> {
        command.execute()?;

        if self.group_depth > 0 {
            self.group_commands.push(command);
        } else {
            self.push_command(command);
        }
        self.redo_stack.clear();
        Ok(())
    }

    fn push_command(&mut self, command: Box<dyn Command>) {
        while self.undo_stack.len() >= self.max_history {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(command);
    }

    /// Undo the last command. Returns false if there was nothing to undo.
    pub fn undo(&mut self) -> MgResult<bool> {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        if let Err(e) = command.undo() {
            self.undo_stack.push_back(command);
            return Err(e);
        }
        self.redo_stack.push(command);
        Ok(true)
    }

    /// Redo the last undone command. Returns false if there was nothing to redo.
    pub fn redo(&mut self) -> MgResult<bool> {
        let Some(mut command) = self.redo_stack.pop() else {
            return Ok(false);
        };
        if let Err(e) = command.execute() {
            self.redo_stack.push(command);
            return Err(e);
        }
        self.undo_stack.push_back(command);
        Ok(true)
    }

    /// Start a group; grouped commands undo and redo together
    pub fn begin_group(&mut self) {
        self.group_depth += 1;
    }

    pub fn end_group(&mut self, name: &str) {
        if self.group_depth == 0 {
            return;
        }
        self.group_depth -= 1;
        if self.group_depth == 0 && !self.group_commands.is_empty() {
            let commands = std::mem::take(&mut self.group_commands);
            self.push_command(Box::new(GroupCommand {
                name: name.to_string(),
                commands,
            }));
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_name(&self) -> Option<&str> {
        self.undo_stack.back().map(|c| c.name())
    }

    pub fn redo_name(&self) -> Option<&str> {
        self.redo_stack.last().map(|c| c.name())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.group_commands.clear();
        self.group_depth = 0;
    }
}

/// Commands applied as one step. A member failure rolls back the members
/// already applied, so the group is all-or-nothing.
struct GroupCommand {
    name: String,
    commands: Vec<Box<dyn Command>>,
}

impl Command for GroupCommand {
    fn execute(&mut self) -> MgResult<()> {
        for i in 0..self.commands.len() {
            if let Err(e) = self.commands[i].execute() {
                for applied in self.commands[..i].iter_mut().rev() {
                    if let Err(rollback) = applied.undo() {
                        log::error!(
                            "'{}': rollback of '{}' failed: {}",
                            self.name,
                            applied.name(),
                            rollback
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn undo(&mut self) -> MgResult<()> {
        for i in (0..self.commands.len()).rev() {
            if let Err(e) = self.commands[i].undo() {
                for undone in self.commands[i + 1..].iter_mut() {
                    if let Err(rollback) = undone.execute() {
                        log::error!(
                            "'{}': reapply of '{}' failed: {}",
                            self.name,
                            undone.name(),
                            rollback
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Insert a plugin into a channel slot
pub struct AddPluginCommand {
    channel: Arc<RwLock<Channel>>,
    slot: PluginSlotType,
    plugin: Arc<dyn Plugin>,
    /// Requested row; `None` appends
    index: Option<usize>,
    name: String,
}

impl AddPluginCommand {
    pub fn new(
        channel: Arc<RwLock<Channel>>,
        slot: PluginSlotType,
        plugin: Arc<dyn Plugin>,
        index: Option<usize>,
    ) -> Self {
        let name = format!("Add {}", plugin.name());
        Self {
            channel,
            slot,
            plugin,
            index,
            name,
        }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin.id()
    }
}

impl Command for AddPluginCommand {
    fn execute(&mut self) -> MgResult<()> {
        self.channel
            .write()
            .group_mut(self.slot)
            .insert_plugin(Arc::clone(&self.plugin), self.index)?;
        Ok(())
    }

    fn undo(&mut self) -> MgResult<()> {
        self.channel
            .write()
            .group_mut(self.slot)
            .remove_plugin(self.plugin.id())?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Remove a plugin from whichever slot holds it
pub struct RemovePluginCommand {
    channel: Arc<RwLock<Channel>>,
    plugin_id: PluginId,
    /// Slot, row and plugin captured by the last execute
    removed: Option<(PluginSlotType, Option<usize>, Arc<dyn Plugin>)>,
    name: String,
}

impl RemovePluginCommand {
    pub fn new(channel: Arc<RwLock<Channel>>, plugin_id: PluginId) -> Self {
        Self {
            channel,
            plugin_id,
            removed: None,
            name: String::from("Remove Plugin"),
        }
    }
}

impl Command for RemovePluginCommand {
    fn execute(&mut self) -> MgResult<()> {
        let mut channel = self.channel.write();
        let slot = channel
            .slot_of(self.plugin_id)
            .ok_or(MgError::PluginNotFound(self.plugin_id))?;
        let group = channel.group_mut(slot);
        let row = group.index_of(self.plugin_id);
        let plugin = group.remove_plugin(self.plugin_id)?;
        self.name = format!("Remove {}", plugin.name());
        self.removed = Some((slot, row, plugin));
        Ok(())
    }

    fn undo(&mut self) -> MgResult<()> {
        let Some((slot, row, plugin)) = self.removed.take() else {
            return Err(MgError::InvalidArgument(
                "remove command undone before it ran".into(),
            ));
        };
        self.channel
            .write()
            .group_mut(slot)
            .insert_plugin(plugin, row)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
