//! Dynamic endpoint management and per-endpoint metadata
//!
//! A component's declarative description fixes its static endpoints; on top of
//! that, workflow authors may add, rename, and remove dynamic endpoints at
//! design time. [`DynamicEndpointManager`] encapsulates that bookkeeping for
//! one direction (inputs or outputs), preventing collisions with the static
//! entries. One manager instance per direction avoids duplicating the logic
//! between inputs and outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelType;

/// Metadata key carrying an input's usage policy
pub const METADATA_KEY_INPUT_USAGE: &str = "usage";

/// The direction of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointNature {
    Input,
    Output,
}

/// Errors raised by endpoint mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The requested name is empty or collides with an existing endpoint
    #[error("endpoint name '{0}' is empty or already in use")]
    InvalidName(String),

    /// The requested type name does not denote a channel type
    #[error("'{0}' is not a valid endpoint type")]
    InvalidType(String),

    /// No endpoint with the given name exists
    #[error("no endpoint named '{0}' exists")]
    UnknownEndpoint(String),
}

/// How an input gates component execution
///
/// Parsed from the endpoint metadata key [`METADATA_KEY_INPUT_USAGE`]; absent
/// or unknown metadata means [`InputUsage::Required`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputUsage {
    /// Must have a value queued at decision time; consumed on every run
    #[default]
    Required,
    /// Must receive a value at least once; afterwards the last value is
    /// re-injected on every decision so the component always sees it
    Init,
    /// May never receive a value; absence does not block running
    Optional,
}

impl InputUsage {
    /// Stable metadata value of this usage policy
    pub fn as_str(&self) -> &'static str {
        match self {
            InputUsage::Required => "required",
            InputUsage::Init => "init",
            InputUsage::Optional => "optional",
        }
    }

    /// Read the usage policy out of an endpoint metadata map
    pub fn from_meta_data(meta_data: &BTreeMap<String, serde_json::Value>) -> InputUsage {
        match meta_data.get(METADATA_KEY_INPUT_USAGE).and_then(|v| v.as_str()) {
            Some("init") => InputUsage::Init,
            Some("optional") => InputUsage::Optional,
            _ => InputUsage::Required,
        }
    }
}

/// Kind of an [`EndpointChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointChangeKind {
    Added,
    Removed,
    Changed,
}

/// Typed event describing one endpoint mutation
///
/// Delivered synchronously to registered observers; a rename carries both the
/// former and the new name so listeners can re-point existing connections.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointChange {
    pub kind: EndpointChangeKind,
    pub nature: EndpointNature,
    /// Name after the change (for removals, the removed name)
    pub name: String,
    /// Type after the change (for removals, the prior type)
    pub channel_type: ChannelType,
    /// Name before the change; `None` for additions
    pub former_name: Option<String>,
    /// Type before the change; `None` for additions
    pub former_type: Option<ChannelType>,
}

/// Management of dynamic additions to one direction of a component's endpoints
///
/// Besides preventing collisions with the static ("declarative") entries,
/// this also defines which names and types are valid for dynamic endpoints.
#[derive(Debug, Clone, Default)]
pub struct DynamicEndpointManager {
    /// The static entries; used to prevent collisions
    declarative_entries: BTreeMap<String, ChannelType>,
    /// Dynamic entries added or removed at workflow-design time
    dynamic_entries: BTreeMap<String, ChannelType>,
}

impl DynamicEndpointManager {
    pub fn new(declarative_entries: BTreeMap<String, ChannelType>) -> Self {
        Self {
            declarative_entries,
            dynamic_entries: BTreeMap::new(),
        }
    }

    /// Check whether the given name could be used for a new dynamic endpoint
    pub fn validate_new_name(&self, name: &str) -> bool {
        !name.is_empty()
            && !self.dynamic_entries.contains_key(name)
            && !self.declarative_entries.contains_key(name)
    }

    /// Check whether a given type name is valid as a dynamic endpoint type
    pub fn validate_type_name(&self, type_name: &str) -> bool {
        ChannelType::parse(type_name).is_some()
    }

    /// Add a new dynamic endpoint
    pub fn add_endpoint(&mut self, name: &str, channel_type: ChannelType) -> Result<(), EndpointError> {
        if !self.validate_new_name(name) {
            return Err(EndpointError::InvalidName(name.to_string()));
        }
        self.dynamic_entries.insert(name.to_string(), channel_type);
        Ok(())
    }

    /// Remove a dynamic endpoint
    pub fn remove_endpoint(&mut self, name: &str) -> Result<ChannelType, EndpointError> {
        self.dynamic_entries
            .remove(name)
            .ok_or_else(|| EndpointError::UnknownEndpoint(name.to_string()))
    }

    /// Remove all dynamic endpoints
    pub fn remove_all_endpoints(&mut self) {
        self.dynamic_entries.clear();
    }

    /// Change the definition of an existing dynamic endpoint
    pub fn change_endpoint(
        &mut self,
        name: &str,
        new_name: &str,
        new_type: ChannelType,
    ) -> Result<ChannelType, EndpointError> {
        if name != new_name && !self.validate_new_name(new_name) {
            return Err(EndpointError::InvalidName(new_name.to_string()));
        }
        let former_type = self
            .dynamic_entries
            .remove(name)
            .ok_or_else(|| EndpointError::UnknownEndpoint(name.to_string()))?;
        self.dynamic_entries.insert(new_name.to_string(), new_type);
        Ok(former_type)
    }

    /// The type of the given dynamic endpoint, falling back to static entries
    pub fn endpoint_type(&self, name: &str) -> Option<ChannelType> {
        self.dynamic_entries
            .get(name)
            .or_else(|| self.declarative_entries.get(name))
            .copied()
    }

    /// All dynamic endpoint names, sorted
    pub fn endpoint_names(&self) -> Vec<&str> {
        self.dynamic_entries.keys().map(String::as_str).collect()
    }

    /// All registered dynamic entries
    pub fn endpoint_definitions(&self) -> &BTreeMap<String, ChannelType> {
        &self.dynamic_entries
    }
}

/// Per-endpoint metadata maps, seeded from the declarative defaults
#[derive(Debug, Clone, Default)]
pub struct EndpointMetaDataManager {
    meta_data: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl EndpointMetaDataManager {
    pub fn new(defaults: BTreeMap<String, BTreeMap<String, serde_json::Value>>) -> Self {
        Self { meta_data: defaults }
    }

    /// Metadata of the given endpoint; empty if none was ever set
    pub fn endpoint_meta_data(&self, name: &str) -> BTreeMap<String, serde_json::Value> {
        self.meta_data.get(name).cloned().unwrap_or_default()
    }

    /// Set a single metadata value of the given endpoint
    pub fn set_endpoint_meta_data(&mut self, name: &str, key: &str, value: serde_json::Value) {
        self.meta_data
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// All endpoints that carry metadata
    pub fn all_meta_data(&self) -> &BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        &self.meta_data
    }
}
