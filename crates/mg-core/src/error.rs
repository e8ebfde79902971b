//! Error types for mixgraph

use thiserror::Error;

use crate::{PortId, ProcessorId};

/// Core error type
#[derive(Error, Debug)]
pub enum MgError {
    /// A caller broke an API contract (e.g. wiring a channel before its
    /// upstream node exists in the graph)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    #[error("Processor not found: {0}")]
    ProcessorNotFound(ProcessorId),

    #[error("Plugin not found: {0}")]
    PluginNotFound(ProcessorId),

    #[error("Plugin {plugin} is not compatible with {group} group")]
    IncompatiblePlugin { plugin: String, group: String },

    #[error("Connection {from} -> {to} would create a cycle")]
    WouldCreateCycle { from: String, to: String },

    #[error("Graph contains a cycle")]
    CycleDetected,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MgError {
    fn from(e: serde_json::Error) -> Self {
        MgError::Serialization(e.to_string())
    }
}

/// Result type alias
pub type MgResult<T> = Result<T, MgError>;
