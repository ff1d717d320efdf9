//! Read and write of the versioned workflow file format
//!
//! The persisted form is a JSON document: a header (identifier, string-encoded
//! format version, name, platform), the nodes (identity, canvas location,
//! component reference, configuration maps, dynamic endpoints, endpoint
//! metadata), and the connections. Reading resolves every node's component
//! against the injected distributed registry; a component that is no longer
//! installed is replaced by a placeholder description preserving the node's
//! name, position, and properties, so the graph stays editable. Parse errors
//! yield no partial result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use calyx_component_model::{
    ChannelType, ComponentDescription, ConfigurationMap, PlatformIdentifier, DEFAULT_CONFIG_ID,
};

use crate::error::{EngineError, Result};
use crate::graph::{Connection, WorkflowDescription, WorkflowNode};
use crate::migration::INITIAL_WORKFLOW_VERSION;
use crate::registry::{DistributedComponentRegistry, PlatformService};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkflowFile {
    pub identifier: String,
    pub workflow_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_information: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodeEntry {
    pub identifier: String,
    pub name: String,
    /// Canvas position, encoded as "x:y"
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub component: ComponentReference,
    /// The default configuration map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigurationMap>,
    /// All non-default configuration maps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<NamedConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_configuration_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_input: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_output: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_meta_data: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_meta_data: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ComponentReference {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NamedConfiguration {
    pub identifier: String,
    pub map: ConfigurationMap,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectionEntry {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
}

/// Version-only view of a workflow file, for the cheap header peek
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHeader {
    #[serde(default)]
    workflow_version: Option<String>,
}

/// Writes and reads [`WorkflowDescription`]s to and from their persisted form
pub struct WorkflowDescriptionPersistenceHandler;

impl WorkflowDescriptionPersistenceHandler {
    pub fn new() -> Self {
        Self
    }

    /// Serialize the given description
    pub fn write_workflow_description(&self, description: &WorkflowDescription) -> Result<Vec<u8>> {
        let mut nodes = Vec::new();
        for node in description.workflow_nodes() {
            nodes.push(self.write_node(node));
        }

        let connections = description
            .connections()
            .iter()
            .map(|connection| ConnectionEntry {
                source: connection.source().to_string(),
                output: connection.output().to_string(),
                target: connection.target().to_string(),
                input: connection.input().to_string(),
            })
            .collect();

        let file = WorkflowFile {
            identifier: description.identifier().to_string(),
            workflow_version: description.workflow_version().to_string(),
            name: description.name().map(str::to_string),
            platform: description.target_platform().map(|p| p.node_id().to_string()),
            additional_information: description.additional_information().map(str::to_string),
            nodes,
            connections,
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    fn write_node(&self, node: &WorkflowNode) -> NodeEntry {
        let component_description = node.component_description();

        let default_configuration = component_description
            .configuration_map(DEFAULT_CONFIG_ID)
            .filter(|map| !map.is_empty())
            .cloned();

        let mut configurations = Vec::new();
        for map_id in component_description.configuration_ids() {
            if map_id != DEFAULT_CONFIG_ID {
                if let Some(map) = component_description.configuration_map(map_id) {
                    configurations.push(NamedConfiguration {
                        identifier: map_id.to_string(),
                        map: map.clone(),
                    });
                }
            }
        }

        let current_configuration_identifier = (component_description.configuration_id()
            != DEFAULT_CONFIG_ID)
            .then(|| component_description.configuration_id().to_string());

        let add_input = component_description
            .dynamic_input_definitions()
            .iter()
            .map(|(name, channel_type)| (name.clone(), channel_type.as_str().to_string()))
            .collect();
        let add_output = component_description
            .dynamic_output_definitions()
            .iter()
            .map(|(name, channel_type)| (name.clone(), channel_type.as_str().to_string()))
            .collect();

        let mut input_meta_data = BTreeMap::new();
        for name in component_description.input_definitions().keys() {
            let meta_data = component_description.input_meta_data(name);
            if !meta_data.is_empty() {
                input_meta_data.insert(name.clone(), meta_data);
            }
        }
        let mut output_meta_data = BTreeMap::new();
        for name in component_description.output_definitions().keys() {
            let meta_data = component_description.output_meta_data(name);
            if !meta_data.is_empty() {
                output_meta_data.insert(name.clone(), meta_data);
            }
        }

        NodeEntry {
            identifier: node.identifier().to_string(),
            name: node.name().to_string(),
            location: format!("{}:{}", node.x(), node.y()),
            platform: component_description.platform().map(|p| p.node_id().to_string()),
            component: ComponentReference {
                identifier: component_description.identifier().to_string(),
                version: Some(component_description.version().to_string()),
            },
            configuration: default_configuration,
            configurations,
            current_configuration_identifier,
            add_input,
            add_output,
            input_meta_data,
            output_meta_data,
        }
    }

    /// Read the format version out of a persisted workflow without resolving
    /// the graph; a file without a version field is version 0
    pub fn read_workflow_version_number(&self, bytes: &[u8]) -> Result<i32> {
        let header: VersionHeader =
            serde_json::from_slice(bytes).map_err(|error| EngineError::Parse(error.to_string()))?;
        match header.workflow_version {
            Some(version) => version
                .parse::<i32>()
                .map_err(|error| EngineError::Parse(format!("invalid workflow version: {}", error))),
            None => Ok(INITIAL_WORKFLOW_VERSION),
        }
    }

    /// Deserialize a workflow, resolving each node's component against the
    /// given registry
    pub async fn read_workflow_description(
        &self,
        bytes: &[u8],
        component_registry: &dyn DistributedComponentRegistry,
        platform_service: &dyn PlatformService,
    ) -> Result<WorkflowDescription> {
        let file: WorkflowFile =
            serde_json::from_slice(bytes).map_err(|error| EngineError::Parse(error.to_string()))?;

        let known_descriptions = component_registry.all_component_descriptions(false).await?;
        let local_platform = platform_service.platform_identifier();

        let mut description = WorkflowDescription::new(file.identifier);
        description.set_workflow_version(
            file.workflow_version
                .parse::<i32>()
                .map_err(|error| EngineError::Parse(format!("invalid workflow version: {}", error)))?,
        );
        if let Some(name) = file.name {
            description.set_name(name);
        }
        if let Some(info) = file.additional_information {
            description.set_additional_information(info);
        }
        if let Some(platform) = file.platform {
            description.set_target_platform(Some(PlatformIdentifier::new(platform)));
        }

        for entry in file.nodes {
            let node = self.read_node(entry, &known_descriptions, &local_platform)?;
            description.add_workflow_node(node);
        }

        for entry in file.connections {
            description.add_connection(Connection::new(
                entry.source,
                entry.output,
                entry.target,
                entry.input,
            ));
        }

        Ok(description)
    }

    fn read_node(
        &self,
        entry: NodeEntry,
        known_descriptions: &[ComponentDescription],
        local_platform: &PlatformIdentifier,
    ) -> Result<WorkflowNode> {
        let declared_platform = entry.platform.map(PlatformIdentifier::new);
        let mut component_description = self.resolve_component(
            &entry.component.identifier,
            declared_platform.as_ref(),
            known_descriptions,
            local_platform,
        );
        component_description.set_platform(declared_platform);

        for (name, type_name) in &entry.add_input {
            let channel_type = parse_channel_type(type_name)?;
            component_description
                .add_input(name, channel_type)
                .map_err(|error| EngineError::Parse(error.to_string()))?;
        }
        for (name, type_name) in &entry.add_output {
            let channel_type = parse_channel_type(type_name)?;
            component_description
                .add_output(name, channel_type)
                .map_err(|error| EngineError::Parse(error.to_string()))?;
        }
        for (endpoint, meta_data) in entry.input_meta_data {
            for (key, value) in meta_data {
                component_description.set_input_meta_data(&endpoint, &key, value);
            }
        }
        for (endpoint, meta_data) in entry.output_meta_data {
            for (key, value) in meta_data {
                component_description.set_output_meta_data(&endpoint, &key, value);
            }
        }

        if let Some(configuration) = entry.configuration {
            let map = component_description.configuration_mut();
            for (key, value) in configuration {
                map.insert(key, value);
            }
        }
        for named in entry.configurations {
            component_description.add_configuration_values(&named.identifier, Some(named.map));
        }
        if let Some(current) = entry.current_configuration_identifier {
            component_description
                .set_configuration_id(&current)
                .map_err(|error| EngineError::Parse(error.to_string()))?;
        }

        let mut node = WorkflowNode::with_identifier(entry.identifier, component_description);
        node.set_name(entry.name);
        let (x, y) = parse_location(&entry.location)?;
        node.set_location(x, y);
        Ok(node)
    }

    /// Pick the installed description matching the identifier: prefer the
    /// declared platform, then the local platform, then any match; fall back
    /// to a placeholder stand-in when the component is not installed at all
    fn resolve_component(
        &self,
        identifier: &str,
        declared_platform: Option<&PlatformIdentifier>,
        known_descriptions: &[ComponentDescription],
        local_platform: &PlatformIdentifier,
    ) -> ComponentDescription {
        let matching: Vec<&ComponentDescription> = known_descriptions
            .iter()
            .filter(|description| description.identifier() == identifier)
            .collect();

        if matching.is_empty() {
            log::warn!("component {} is not installed, using a placeholder", identifier);
            return ComponentDescription::placeholder(identifier);
        }

        if let Some(platform) = declared_platform {
            if let Some(found) = matching
                .iter()
                .find(|description| description.platform() == Some(platform))
            {
                return found.deep_copy();
            }
        }
        if let Some(found) = matching
            .iter()
            .find(|description| description.platform() == Some(local_platform))
        {
            return found.deep_copy();
        }
        matching[0].deep_copy()
    }
}

impl Default for WorkflowDescriptionPersistenceHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_channel_type(type_name: &str) -> Result<ChannelType> {
    ChannelType::parse(type_name)
        .ok_or_else(|| EngineError::Parse(format!("'{}' is not a valid endpoint type", type_name)))
}

fn parse_location(location: &str) -> Result<(i64, i64)> {
    let (x, y) = location
        .split_once(':')
        .ok_or_else(|| EngineError::Parse(format!("invalid location definition '{}'", location)))?;
    let x = x
        .parse::<i64>()
        .map_err(|_| EngineError::Parse(format!("invalid location definition '{}'", location)))?;
    let y = y
        .parse::<i64>()
        .map_err(|_| EngineError::Parse(format!("invalid location definition '{}'", location)))?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::{
        ComponentRegistry, LocalDistributedComponentRegistry, LocalPlatformService,
    };
    use calyx_component_model::{
        Component, DeclarativeComponentDescription, METADATA_KEY_INPUT_USAGE,
    };

    #[derive(Default)]
    struct NoopComponent;

    impl Component for NoopComponent {}

    fn component_registry() -> Arc<ComponentRegistry> {
        let mut registry = ComponentRegistry::new();
        registry.register(
            DeclarativeComponentDescription::new("test.producer", "Producer", "Test", "1.0")
                .with_output("out1", ChannelType::Real)
                .with_output("out2", ChannelType::Real),
            || Box::new(NoopComponent),
        );
        registry.register(
            DeclarativeComponentDescription::new("test.consumer", "Consumer", "Test", "1.0")
                .with_input("in1", ChannelType::Real)
                .with_input("in2", ChannelType::Real),
            || Box::new(NoopComponent),
        );
        Arc::new(registry)
    }

    fn distributed() -> (LocalDistributedComponentRegistry, LocalPlatformService) {
        (
            LocalDistributedComponentRegistry::new(
                component_registry(),
                Arc::new(LocalPlatformService::new("local-node")),
            ),
            LocalPlatformService::new("local-node"),
        )
    }

    /// Two nodes, two connections, mixed configuration maps, one dynamic
    /// endpoint with metadata
    fn fixture() -> WorkflowDescription {
        let registry = component_registry();
        let mut wd = WorkflowDescription::new("wf-fixture");
        wd.set_name("Fixture");
        wd.set_workflow_version(1);
        wd.set_additional_information("created by tests");

        let mut producer = WorkflowNode::with_identifier(
            "n1",
            calyx_component_model::ComponentDescription::new(Arc::new(
                registry.description("test.producer").unwrap().clone(),
            )),
        );
        producer.set_name("Producer 1");
        producer.set_location(10, 20);
        producer.set_property("emitRate", Some(serde_json::json!(5)));

        let mut consumer = WorkflowNode::with_identifier(
            "n2",
            calyx_component_model::ComponentDescription::new(Arc::new(
                registry.description("test.consumer").unwrap().clone(),
            )),
        );
        consumer.set_name("Consumer 1");
        consumer.set_location(200, 20);
        consumer
            .component_description_mut()
            .add_input("extra", ChannelType::Real)
            .unwrap();
        consumer.component_description_mut().set_input_meta_data(
            "extra",
            METADATA_KEY_INPUT_USAGE,
            serde_json::json!("optional"),
        );
        consumer.add_property_map("variant", Some(DEFAULT_CONFIG_ID)).unwrap();
        consumer.set_property_map_id("variant").unwrap();
        consumer.set_property("threshold", Some(serde_json::json!(0.25)));

        wd.add_workflow_node(producer);
        wd.add_workflow_node(consumer);
        wd.add_connection(Connection::new("n1", "out1", "n2", "in1"));
        wd.add_connection(Connection::new("n1", "out2", "n2", "in2"));
        wd
    }

    #[tokio::test]
    async fn test_round_trip_preserves_structure() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let original = fixture();
        let bytes = handler.write_workflow_description(&original).unwrap();

        let (registry, platform) = distributed();
        let read = handler
            .read_workflow_description(&bytes, &registry, &platform)
            .await
            .unwrap();

        assert_eq!(read.identifier(), original.identifier());
        assert_eq!(read.workflow_version(), original.workflow_version());
        assert_eq!(read.name(), original.name());
        assert_eq!(read.workflow_nodes().len(), original.workflow_nodes().len());
        assert_eq!(read.connections().len(), original.connections().len());
        assert_eq!(read.connections(), original.connections());

        let producer = read.workflow_node("n1").unwrap();
        assert_eq!(producer.name(), "Producer 1");
        assert_eq!((producer.x(), producer.y()), (10, 20));
        assert_eq!(producer.property("emitRate"), Some(&serde_json::json!(5)));

        let consumer = read.workflow_node("n2").unwrap();
        assert_eq!(consumer.property_map_id(), "variant");
        assert_eq!(consumer.property("threshold"), Some(&serde_json::json!(0.25)));
        assert_eq!(consumer.property_map_ids().len(), 2);
        assert_eq!(
            consumer.component_description().input_type("extra"),
            Some(ChannelType::Real)
        );
        assert_eq!(
            consumer
                .component_description()
                .input_meta_data("extra")
                .get(METADATA_KEY_INPUT_USAGE),
            Some(&serde_json::json!("optional"))
        );
    }

    #[tokio::test]
    async fn test_write_read_write_is_stable() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let original = fixture();
        let bytes = handler.write_workflow_description(&original).unwrap();

        let (registry, platform) = distributed();
        let read = handler
            .read_workflow_description(&bytes, &registry, &platform)
            .await
            .unwrap();
        let second_bytes = handler.write_workflow_description(&read).unwrap();

        assert_eq!(
            handler.read_workflow_version_number(&bytes).unwrap(),
            handler.read_workflow_version_number(&second_bytes).unwrap()
        );
        assert_eq!(bytes, second_bytes);
    }

    #[tokio::test]
    async fn test_version_peek() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let bytes = handler.write_workflow_description(&fixture()).unwrap();
        assert_eq!(handler.read_workflow_version_number(&bytes).unwrap(), 1);

        // a file without a version field is version 0
        let versionless = br#"{"identifier": "wf-old"}"#;
        assert_eq!(handler.read_workflow_version_number(versionless).unwrap(), 0);

        // garbage is a parse failure, not a default
        assert!(handler.read_workflow_version_number(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_component_becomes_placeholder() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let json = serde_json::json!({
            "identifier": "wf-ghost",
            "workflowVersion": "1",
            "nodes": [{
                "identifier": "n1",
                "name": "Ghost",
                "location": "1:2",
                "component": {"identifier": "test.gone"},
                "configuration": {"keep": "me"}
            }]
        });
        let bytes = serde_json::to_vec(&json).unwrap();

        let (registry, platform) = distributed();
        let read = handler
            .read_workflow_description(&bytes, &registry, &platform)
            .await
            .unwrap();

        let node = read.workflow_node("n1").unwrap();
        assert!(node
            .component_description()
            .identifier()
            .starts_with(calyx_component_model::PLACEHOLDER_COMPONENT_ID_PREFIX));
        // name, position, and properties survive
        assert_eq!(node.name(), "Ghost");
        assert_eq!((node.x(), node.y()), (1, 2));
        assert_eq!(node.property("keep"), Some(&serde_json::json!("me")));
    }

    #[tokio::test]
    async fn test_parse_error_has_no_partial_result() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let (registry, platform) = distributed();
        let result = handler
            .read_workflow_description(b"{\"name\": \"missing identifier\"}", &registry, &platform)
            .await;
        assert!(matches!(result, Err(EngineError::Parse(_))));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let handler = WorkflowDescriptionPersistenceHandler::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.wf");
        std::fs::write(&path, handler.write_workflow_description(&fixture()).unwrap()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(handler.read_workflow_version_number(&bytes).unwrap(), 1);

        let (registry, platform) = distributed();
        let read = handler
            .read_workflow_description(&bytes, &registry, &platform)
            .await
            .unwrap();
        assert_eq!(read.identifier(), "wf-fixture");
        assert_eq!(read.workflow_nodes().len(), 2);
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("10:-20").unwrap(), (10, -20));
        assert!(parse_location("10").is_err());
        assert!(parse_location("a:b").is_err());
    }
}
