//! mg-plugin: Plugin hosting surface for mixgraph
//!
//! - `PluginDescriptor`: protocol, category and port shape of a plugin
//! - `Plugin` trait and the built-in `InternalPlugin`
//! - `PluginRegistry`: factory plus id lookup
//! - `PluginGroup`: ordered serial/parallel containers backing channel slots

mod descriptor;
mod group;
mod plugin;
mod registry;

pub use descriptor::*;
pub use group::*;
pub use plugin::*;
pub use registry::*;
