//! Component descriptions: immutable templates plus per-node mutable state
//!
//! A [`DeclarativeComponentDescription`] is the installed component's
//! template: identifier, static endpoints, configuration schema, defaults.
//! A [`ComponentDescription`] wraps one template and adds everything a single
//! workflow node owns on top: target platform, dynamic endpoints, endpoint
//! metadata, named configuration maps, and launch-time placeholder values.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::endpoint::{
    DynamicEndpointManager, EndpointChange, EndpointChangeKind, EndpointError,
    EndpointMetaDataManager, EndpointNature,
};
use crate::types::ChannelType;

/// Key of the configuration map every description starts with
pub const DEFAULT_CONFIG_ID: &str = "default";

/// Identifier prefix of stand-in descriptions for missing components
pub const PLACEHOLDER_COMPONENT_ID_PREFIX: &str = "calyx.placeholder.";

/// Group used for components whose real group is unknown
pub const COMPONENT_GROUP_UNKNOWN: &str = "Other";

/// Version used for components whose real version is unknown
pub const COMPONENT_VERSION_UNKNOWN: &str = "x.y";

/// A named configuration map
pub type ConfigurationMap = BTreeMap<String, serde_json::Value>;

/// Identifier of a distributed execution platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformIdentifier(String);

impl PlatformIdentifier {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self(node_id.into())
    }

    pub fn node_id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlatformIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised by configuration-map operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("configuration map '{0}' does not exist")]
    UnknownConfiguration(String),
}

/// Immutable template of an installed component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeComponentDescription {
    identifier: String,
    name: String,
    group: String,
    version: String,
    input_definitions: BTreeMap<String, ChannelType>,
    output_definitions: BTreeMap<String, ChannelType>,
    input_meta_defs: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    output_meta_defs: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    configuration_definitions: BTreeMap<String, ChannelType>,
    default_configuration: ConfigurationMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon16: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon32: Option<Vec<u8>>,
}

impl DeclarativeComponentDescription {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            group: group.into(),
            version: version.into(),
            input_definitions: BTreeMap::new(),
            output_definitions: BTreeMap::new(),
            input_meta_defs: BTreeMap::new(),
            output_meta_defs: BTreeMap::new(),
            configuration_definitions: BTreeMap::new(),
            default_configuration: BTreeMap::new(),
            icon16: None,
            icon32: None,
        }
    }

    /// Declare a static input
    pub fn with_input(mut self, name: impl Into<String>, channel_type: ChannelType) -> Self {
        self.input_definitions.insert(name.into(), channel_type);
        self
    }

    /// Attach default metadata to a static input
    pub fn with_input_meta(
        mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.input_meta_defs
            .entry(name.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Declare a static output
    pub fn with_output(mut self, name: impl Into<String>, channel_type: ChannelType) -> Self {
        self.output_definitions.insert(name.into(), channel_type);
        self
    }

    /// Attach default metadata to a static output
    pub fn with_output_meta(
        mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.output_meta_defs
            .entry(name.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Declare a configuration key and its expected type
    pub fn with_configuration(mut self, key: impl Into<String>, channel_type: ChannelType) -> Self {
        self.configuration_definitions.insert(key.into(), channel_type);
        self
    }

    /// Set a default configuration value
    pub fn with_default_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_configuration.insert(key.into(), value);
        self
    }

    /// Attach icon bytes
    pub fn with_icons(mut self, icon16: Option<Vec<u8>>, icon32: Option<Vec<u8>>) -> Self {
        self.icon16 = icon16;
        self.icon32 = icon32;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn input_definitions(&self) -> &BTreeMap<String, ChannelType> {
        &self.input_definitions
    }

    pub fn output_definitions(&self) -> &BTreeMap<String, ChannelType> {
        &self.output_definitions
    }

    pub fn input_meta_defs(&self) -> &BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        &self.input_meta_defs
    }

    pub fn output_meta_defs(&self) -> &BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        &self.output_meta_defs
    }

    pub fn configuration_definitions(&self) -> &BTreeMap<String, ChannelType> {
        &self.configuration_definitions
    }

    pub fn default_configuration(&self) -> &ConfigurationMap {
        &self.default_configuration
    }

    pub fn icon16(&self) -> Option<&[u8]> {
        self.icon16.as_deref()
    }

    pub fn icon32(&self) -> Option<&[u8]> {
        self.icon32.as_deref()
    }
}

type EndpointObserver = Box<dyn Fn(&EndpointChange) + Send + Sync>;

/// Per-node description of a component: template plus mutable instance state
///
/// Mutations of the dynamic endpoints fire [`EndpointChange`] events to
/// registered observers, synchronously and even when a change is a no-op in
/// value terms.
pub struct ComponentDescription {
    declarative: Arc<DeclarativeComponentDescription>,
    platform: Option<PlatformIdentifier>,
    input_manager: DynamicEndpointManager,
    output_manager: DynamicEndpointManager,
    input_meta_data: EndpointMetaDataManager,
    output_meta_data: EndpointMetaDataManager,
    configuration: BTreeMap<String, ConfigurationMap>,
    current_config_id: String,
    placeholder_values: ConfigurationMap,
    observers: Vec<EndpointObserver>,
}

impl ComponentDescription {
    pub fn new(declarative: Arc<DeclarativeComponentDescription>) -> Self {
        let mut configuration = BTreeMap::new();
        configuration.insert(
            DEFAULT_CONFIG_ID.to_string(),
            declarative.default_configuration().clone(),
        );
        Self {
            input_manager: DynamicEndpointManager::new(declarative.input_definitions().clone()),
            output_manager: DynamicEndpointManager::new(declarative.output_definitions().clone()),
            input_meta_data: EndpointMetaDataManager::new(declarative.input_meta_defs().clone()),
            output_meta_data: EndpointMetaDataManager::new(declarative.output_meta_defs().clone()),
            configuration,
            current_config_id: DEFAULT_CONFIG_ID.to_string(),
            placeholder_values: BTreeMap::new(),
            observers: Vec::new(),
            platform: None,
            declarative,
        }
    }

    /// Stand-in description used when the component of a persisted workflow
    /// node is no longer installed; preserves the node's name so the graph
    /// remains editable and inspectable
    pub fn placeholder(name: &str) -> Self {
        let declarative = DeclarativeComponentDescription::new(
            format!("{}{}", PLACEHOLDER_COMPONENT_ID_PREFIX, name),
            name,
            COMPONENT_GROUP_UNKNOWN,
            COMPONENT_VERSION_UNKNOWN,
        );
        Self::new(Arc::new(declarative))
    }

    pub fn declarative(&self) -> &Arc<DeclarativeComponentDescription> {
        &self.declarative
    }

    pub fn identifier(&self) -> &str {
        self.declarative.identifier()
    }

    pub fn name(&self) -> &str {
        self.declarative.name()
    }

    pub fn group(&self) -> &str {
        self.declarative.group()
    }

    pub fn version(&self) -> &str {
        self.declarative.version()
    }

    pub fn platform(&self) -> Option<&PlatformIdentifier> {
        self.platform.as_ref()
    }

    pub fn set_platform(&mut self, platform: Option<PlatformIdentifier>) {
        self.platform = platform;
    }

    /// Register an observer for endpoint changes; observers are not carried
    /// over by [`ComponentDescription::deep_copy`]
    pub fn add_endpoint_observer(&mut self, observer: EndpointObserver) {
        self.observers.push(observer);
    }

    fn fire(&self, change: EndpointChange) {
        for observer in &self.observers {
            observer(&change);
        }
    }

    // --- inputs ---

    /// All inputs, static and dynamic
    pub fn input_definitions(&self) -> BTreeMap<String, ChannelType> {
        let mut result = self.declarative.input_definitions().clone();
        result.extend(self.input_manager.endpoint_definitions().clone());
        result
    }

    /// All registered dynamic inputs
    pub fn dynamic_input_definitions(&self) -> &BTreeMap<String, ChannelType> {
        self.input_manager.endpoint_definitions()
    }

    /// Type of the given input
    pub fn input_type(&self, name: &str) -> Option<ChannelType> {
        self.input_manager.endpoint_type(name)
    }

    /// Check whether the given name could be used for a new dynamic input
    pub fn validate_input_name(&self, name: &str) -> bool {
        if self.declarative.input_definitions().contains_key(name) {
            return false;
        }
        self.input_manager.validate_new_name(name)
    }

    /// Check whether a given type name is valid as a dynamic input type
    pub fn validate_input_type(&self, type_name: &str) -> bool {
        self.input_manager.validate_type_name(type_name)
    }

    /// Add a new dynamic input; fires an `Added` event
    pub fn add_input(&mut self, name: &str, channel_type: ChannelType) -> Result<(), EndpointError> {
        self.input_manager.add_endpoint(name, channel_type)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Added,
            nature: EndpointNature::Input,
            name: name.to_string(),
            channel_type,
            former_name: None,
            former_type: None,
        });
        Ok(())
    }

    /// Remove a dynamic input; fires a `Removed` event carrying the prior type
    pub fn remove_input(&mut self, name: &str) -> Result<(), EndpointError> {
        let former_type = self.input_manager.remove_endpoint(name)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Removed,
            nature: EndpointNature::Input,
            name: name.to_string(),
            channel_type: former_type,
            former_name: Some(name.to_string()),
            former_type: Some(former_type),
        });
        Ok(())
    }

    /// Rename or retype an existing dynamic input; fires a `Changed` event
    /// carrying both old and new name and type
    pub fn change_input(
        &mut self,
        name: &str,
        new_name: &str,
        new_type: ChannelType,
    ) -> Result<(), EndpointError> {
        let former_type = self.input_manager.change_endpoint(name, new_name, new_type)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Changed,
            nature: EndpointNature::Input,
            name: new_name.to_string(),
            channel_type: new_type,
            former_name: Some(name.to_string()),
            former_type: Some(former_type),
        });
        Ok(())
    }

    /// Remove all dynamic inputs
    pub fn remove_all_inputs(&mut self) {
        self.input_manager.remove_all_endpoints();
    }

    /// Metadata of the given input
    pub fn input_meta_data(&self, name: &str) -> BTreeMap<String, serde_json::Value> {
        self.input_meta_data.endpoint_meta_data(name)
    }

    /// Set one metadata value of the given input
    pub fn set_input_meta_data(&mut self, name: &str, key: &str, value: serde_json::Value) {
        self.input_meta_data.set_endpoint_meta_data(name, key, value);
    }

    // --- outputs ---

    /// All outputs, static and dynamic
    pub fn output_definitions(&self) -> BTreeMap<String, ChannelType> {
        let mut result = self.declarative.output_definitions().clone();
        result.extend(self.output_manager.endpoint_definitions().clone());
        result
    }

    /// All registered dynamic outputs
    pub fn dynamic_output_definitions(&self) -> &BTreeMap<String, ChannelType> {
        self.output_manager.endpoint_definitions()
    }

    /// Type of the given output
    pub fn output_type(&self, name: &str) -> Option<ChannelType> {
        self.output_manager.endpoint_type(name)
    }

    /// Check whether the given name could be used for a new dynamic output
    pub fn validate_output_name(&self, name: &str) -> bool {
        if self.declarative.output_definitions().contains_key(name) {
            return false;
        }
        self.output_manager.validate_new_name(name)
    }

    /// Check whether a given type name is valid as a dynamic output type
    pub fn validate_output_type(&self, type_name: &str) -> bool {
        self.output_manager.validate_type_name(type_name)
    }

    /// Add a new dynamic output; fires an `Added` event
    pub fn add_output(&mut self, name: &str, channel_type: ChannelType) -> Result<(), EndpointError> {
        self.output_manager.add_endpoint(name, channel_type)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Added,
            nature: EndpointNature::Output,
            name: name.to_string(),
            channel_type,
            former_name: None,
            former_type: None,
        });
        Ok(())
    }

    /// Remove a dynamic output; fires a `Removed` event carrying the prior type
    pub fn remove_output(&mut self, name: &str) -> Result<(), EndpointError> {
        let former_type = self.output_manager.remove_endpoint(name)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Removed,
            nature: EndpointNature::Output,
            name: name.to_string(),
            channel_type: former_type,
            former_name: Some(name.to_string()),
            former_type: Some(former_type),
        });
        Ok(())
    }

    /// Rename or retype an existing dynamic output; fires a `Changed` event
    pub fn change_output(
        &mut self,
        name: &str,
        new_name: &str,
        new_type: ChannelType,
    ) -> Result<(), EndpointError> {
        let former_type = self.output_manager.change_endpoint(name, new_name, new_type)?;
        self.fire(EndpointChange {
            kind: EndpointChangeKind::Changed,
            nature: EndpointNature::Output,
            name: new_name.to_string(),
            channel_type: new_type,
            former_name: Some(name.to_string()),
            former_type: Some(former_type),
        });
        Ok(())
    }

    /// Metadata of the given output
    pub fn output_meta_data(&self, name: &str) -> BTreeMap<String, serde_json::Value> {
        self.output_meta_data.endpoint_meta_data(name)
    }

    /// Set one metadata value of the given output
    pub fn set_output_meta_data(&mut self, name: &str, key: &str, value: serde_json::Value) {
        self.output_meta_data.set_endpoint_meta_data(name, key, value);
    }

    // --- configuration ---

    pub fn configuration_definitions(&self) -> &BTreeMap<String, ChannelType> {
        self.declarative.configuration_definitions()
    }

    pub fn default_configuration(&self) -> &ConfigurationMap {
        self.declarative.default_configuration()
    }

    /// All existing configuration map ids
    pub fn configuration_ids(&self) -> Vec<&str> {
        self.configuration.keys().map(String::as_str).collect()
    }

    /// Id of the configuration map [`ComponentDescription::configuration`]
    /// currently returns
    pub fn configuration_id(&self) -> &str {
        &self.current_config_id
    }

    /// Switch the current configuration map
    pub fn set_configuration_id(&mut self, config_map_id: &str) -> Result<(), ConfigurationError> {
        if !self.configuration.contains_key(config_map_id) {
            return Err(ConfigurationError::UnknownConfiguration(config_map_id.to_string()));
        }
        self.current_config_id = config_map_id.to_string();
        Ok(())
    }

    /// Add a new configuration map, cloning the values of an existing map or,
    /// if `clone_config_map_id` is `None`, the declarative defaults
    pub fn add_configuration(
        &mut self,
        new_config_map_id: &str,
        clone_config_map_id: Option<&str>,
    ) -> Result<(), ConfigurationError> {
        let values = match clone_config_map_id {
            Some(source_id) => self
                .configuration
                .get(source_id)
                .cloned()
                .ok_or_else(|| ConfigurationError::UnknownConfiguration(source_id.to_string()))?,
            None => self.declarative.default_configuration().clone(),
        };
        self.configuration.insert(new_config_map_id.to_string(), values);
        Ok(())
    }

    /// Add a new configuration map with explicit initial values, or the
    /// declarative defaults if `values` is `None`
    pub fn add_configuration_values(&mut self, new_config_map_id: &str, values: Option<ConfigurationMap>) {
        let values = values.unwrap_or_else(|| self.declarative.default_configuration().clone());
        self.configuration.insert(new_config_map_id.to_string(), values);
    }

    /// Remove a configuration map; if it was current, the default map becomes
    /// current again
    pub fn remove_configuration(&mut self, config_map_id: &str) {
        self.configuration.remove(config_map_id);
        if config_map_id == self.current_config_id {
            self.current_config_id = DEFAULT_CONFIG_ID.to_string();
        }
    }

    /// The current configuration map
    pub fn configuration(&self) -> &ConfigurationMap {
        static EMPTY: ConfigurationMap = ConfigurationMap::new();
        self.configuration
            .get(&self.current_config_id)
            .or_else(|| self.configuration.get(DEFAULT_CONFIG_ID))
            .unwrap_or(&EMPTY)
    }

    /// Mutable access to the current configuration map
    pub fn configuration_mut(&mut self) -> &mut ConfigurationMap {
        self.configuration
            .entry(self.current_config_id.clone())
            .or_default()
    }

    /// The configuration map with the given id
    pub fn configuration_map(&self, config_map_id: &str) -> Option<&ConfigurationMap> {
        self.configuration.get(config_map_id)
    }

    // --- placeholders ---

    /// Launch-time placeholder values applied to this description
    pub fn placeholder_values(&self) -> &ConfigurationMap {
        &self.placeholder_values
    }

    /// Merge resolved placeholder values into this description
    pub fn add_placeholder_values(&mut self, values: ConfigurationMap) {
        self.placeholder_values.extend(values);
    }

    /// Value of a single resolved placeholder
    pub fn placeholder_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.placeholder_values.get(name)
    }

    /// Explicit deep copy; shares the immutable template, duplicates all
    /// mutable state, and deliberately drops registered observers
    pub fn deep_copy(&self) -> ComponentDescription {
        ComponentDescription {
            declarative: Arc::clone(&self.declarative),
            platform: self.platform.clone(),
            input_manager: self.input_manager.clone(),
            output_manager: self.output_manager.clone(),
            input_meta_data: self.input_meta_data.clone(),
            output_meta_data: self.output_meta_data.clone(),
            configuration: self.configuration.clone(),
            current_config_id: self.current_config_id.clone(),
            placeholder_values: self.placeholder_values.clone(),
            observers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ComponentDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescription")
            .field("identifier", &self.identifier())
            .field("platform", &self.platform)
            .field("current_config_id", &self.current_config_id)
            .finish_non_exhaustive()
    }
}
