//! The design-time workflow graph: nodes, connections, change notification
//!
//! A [`WorkflowDescription`] is the mutable graph of [`WorkflowNode`]s and
//! directed, typed [`Connection`]s. Structural mutations fire typed events to
//! registered observers, synchronously and even when a mutation does not
//! change a value. Structural edits are expected to be serialized by the
//! editing context; the graph provides no locking of its own.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use calyx_component_model::{
    ChannelType, ComponentDescription, ConfigurationError, EndpointChange, EndpointChangeKind,
    EndpointNature, PlaceholderIndex, PlatformIdentifier,
};

use crate::error::{EngineError, Result};
use crate::migration::CURRENT_WORKFLOW_VERSION;

/// Typed change events fired by a [`WorkflowNode`]
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    LocationChanged { x: i64, y: i64 },
    NameChanged { name: String },
    ConfigurationChanged,
}

/// Typed change events fired by a [`WorkflowDescription`]
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodesChanged,
    ConnectionsChanged,
    EndpointChanged,
}

type NodeObserver = Box<dyn Fn(&NodeEvent) + Send + Sync>;
type GraphObserver = Arc<dyn Fn(&GraphEvent) + Send + Sync>;

/// A directed edge from one node's output to another node's input
///
/// Immutable once constructed; two connections are equal only if all four
/// fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    source: String,
    output: String,
    target: String,
    input: String,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        output: impl Into<String>,
        target: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            target: target.into(),
            input: input.into(),
        }
    }

    /// Identifier of the producing node
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the producing output endpoint
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Identifier of the consuming node
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Name of the consuming input endpoint
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// A vertex of the workflow graph
///
/// Owns exactly one [`ComponentDescription`] plus canvas position and display
/// name. Equality and hashing are by identifier only. Node-level properties
/// are backed by the description's configuration maps, partitioned by
/// property map id.
pub struct WorkflowNode {
    identifier: String,
    name: String,
    x: i64,
    y: i64,
    description: ComponentDescription,
    observers: Vec<NodeObserver>,
}

impl WorkflowNode {
    /// Create a node with a fresh random identifier
    pub fn new(description: ComponentDescription) -> Self {
        Self {
            identifier: uuid::Uuid::new_v4().to_string(),
            name: description.name().to_string(),
            x: 0,
            y: 0,
            description,
            observers: Vec::new(),
        }
    }

    /// Create a node with the identifier given by a persisted file
    pub fn with_identifier(identifier: impl Into<String>, description: ComponentDescription) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::new(description)
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn x(&self) -> i64 {
        self.x
    }

    pub fn y(&self) -> i64 {
        self.y
    }

    pub fn component_description(&self) -> &ComponentDescription {
        &self.description
    }

    pub fn component_description_mut(&mut self) -> &mut ComponentDescription {
        &mut self.description
    }

    /// Register an observer for node events; not carried over by
    /// [`WorkflowNode::deep_copy`]
    pub fn observe(&mut self, observer: NodeObserver) {
        self.observers.push(observer);
    }

    fn fire(&self, event: NodeEvent) {
        for observer in &self.observers {
            observer(&event);
        }
    }

    /// Move the node on the canvas; fires even when the location is unchanged
    pub fn set_location(&mut self, x: i64, y: i64) {
        self.x = x;
        self.y = y;
        self.fire(NodeEvent::LocationChanged { x, y });
    }

    /// Rename the node; fires even when the name is unchanged
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.fire(NodeEvent::NameChanged { name: self.name.clone() });
    }

    /// All property map ids of this node
    pub fn property_map_ids(&self) -> Vec<&str> {
        self.description.configuration_ids()
    }

    /// Id of the currently active property map
    pub fn property_map_id(&self) -> &str {
        self.description.configuration_id()
    }

    /// Switch the active property map
    pub fn set_property_map_id(&mut self, property_map_id: &str) -> std::result::Result<(), ConfigurationError> {
        self.description.set_configuration_id(property_map_id)?;
        self.fire(NodeEvent::ConfigurationChanged);
        Ok(())
    }

    /// Add a property map, cloned from an existing one or from the defaults
    pub fn add_property_map(
        &mut self,
        new_property_map_id: &str,
        clone_property_map_id: Option<&str>,
    ) -> std::result::Result<(), ConfigurationError> {
        self.description
            .add_configuration(new_property_map_id, clone_property_map_id)?;
        self.fire(NodeEvent::ConfigurationChanged);
        Ok(())
    }

    /// Remove a property map; the default map becomes active if the removed
    /// one was
    pub fn remove_property_map(&mut self, property_map_id: &str) {
        self.description.remove_configuration(property_map_id);
        self.fire(NodeEvent::ConfigurationChanged);
    }

    /// Value of a property in the active map
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.description.configuration().get(key)
    }

    /// Whether a property exists in the active map
    pub fn property_exists(&self, key: &str) -> bool {
        self.description.configuration().contains_key(key)
    }

    /// Set a property in the active map; `None` removes the key. A write of
    /// an unchanged value is skipped without notification.
    pub fn set_property(&mut self, key: &str, value: Option<serde_json::Value>) {
        let current = self.description.configuration().get(key);
        if current == value.as_ref() {
            return;
        }
        match value {
            Some(value) => {
                self.description.configuration_mut().insert(key.to_string(), value);
            }
            None => {
                self.description.configuration_mut().remove(key);
            }
        }
        self.fire(NodeEvent::ConfigurationChanged);
    }

    /// Identifier-preserving deep copy without observers
    pub fn deep_copy(&self) -> WorkflowNode {
        WorkflowNode {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            description: self.description.deep_copy(),
            observers: Vec::new(),
        }
    }
}

impl PartialEq for WorkflowNode {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for WorkflowNode {}

impl std::hash::Hash for WorkflowNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl std::fmt::Debug for WorkflowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowNode")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .field("component", &self.description.identifier())
            .finish_non_exhaustive()
    }
}

/// The design-time workflow graph
pub struct WorkflowDescription {
    identifier: String,
    workflow_version: i32,
    name: Option<String>,
    additional_information: Option<String>,
    target_platform: Option<PlatformIdentifier>,
    nodes: Vec<WorkflowNode>,
    connections: Arc<Mutex<Vec<Connection>>>,
    observers: Arc<Mutex<Vec<GraphObserver>>>,
}

impl WorkflowDescription {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            workflow_version: CURRENT_WORKFLOW_VERSION,
            name: None,
            additional_information: None,
            target_platform: None,
            nodes: Vec::new(),
            connections: Arc::new(Mutex::new(Vec::new())),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn workflow_version(&self) -> i32 {
        self.workflow_version
    }

    pub fn set_workflow_version(&mut self, workflow_version: i32) {
        self.workflow_version = workflow_version;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn additional_information(&self) -> Option<&str> {
        self.additional_information.as_deref()
    }

    pub fn set_additional_information(&mut self, info: impl Into<String>) {
        self.additional_information = Some(info.into());
    }

    pub fn target_platform(&self) -> Option<&PlatformIdentifier> {
        self.target_platform.as_ref()
    }

    pub fn set_target_platform(&mut self, platform: Option<PlatformIdentifier>) {
        self.target_platform = platform;
    }

    /// Register an observer for graph events; not carried over by
    /// [`WorkflowDescription::deep_copy`]
    pub fn observe(&mut self, observer: impl Fn(&GraphEvent) + Send + Sync + 'static) {
        self.observers.lock().unwrap().push(Arc::new(observer));
    }

    fn fire(observers: &Arc<Mutex<Vec<GraphObserver>>>, event: &GraphEvent) {
        // snapshot under the lock, notify outside of it
        let snapshot: Vec<GraphObserver> = observers.lock().unwrap().clone();
        for observer in snapshot {
            observer(event);
        }
    }

    /// All nodes, in insertion order
    pub fn workflow_nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    /// The node with the given identifier
    ///
    /// A missing node is a hard failure, unlike the soft `None` returns of
    /// the workflow registry lookups; both contracts are kept per API.
    pub fn workflow_node(&self, identifier: &str) -> Result<&WorkflowNode> {
        self.nodes
            .iter()
            .find(|node| node.identifier() == identifier)
            .ok_or_else(|| EngineError::UnknownNode(identifier.to_string()))
    }

    /// Mutable access to the node with the given identifier
    pub fn workflow_node_mut(&mut self, identifier: &str) -> Result<&mut WorkflowNode> {
        self.nodes
            .iter_mut()
            .find(|node| node.identifier() == identifier)
            .ok_or_else(|| EngineError::UnknownNode(identifier.to_string()))
    }

    /// Add a node and wire the endpoint-change listener that keeps incident
    /// connections consistent with endpoint removals and renames
    pub fn add_workflow_node(&mut self, mut node: WorkflowNode) {
        let connections = Arc::clone(&self.connections);
        let observers = Arc::clone(&self.observers);
        let node_id = node.identifier().to_string();
        node.component_description_mut()
            .add_endpoint_observer(Box::new(move |change| {
                Self::handle_endpoint_change(&connections, &observers, &node_id, change);
            }));
        self.nodes.push(node);
        Self::fire(&self.observers, &GraphEvent::NodesChanged);
    }

    /// Remove a node
    ///
    /// Incident connections are deliberately NOT removed along with the node;
    /// connection cleanup stays the caller's responsibility (only endpoint
    /// removal cascades, see the endpoint-change listener).
    pub fn remove_workflow_node(&mut self, identifier: &str) {
        self.nodes.retain(|node| node.identifier() != identifier);
        Self::fire(&self.observers, &GraphEvent::NodesChanged);
    }

    /// All connections
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().unwrap().clone()
    }

    /// Add a connection
    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.lock().unwrap().push(connection);
        Self::fire(&self.observers, &GraphEvent::ConnectionsChanged);
    }

    /// Remove a connection
    pub fn remove_connection(&mut self, connection: &Connection) {
        self.connections.lock().unwrap().retain(|existing| existing != connection);
        Self::fire(&self.observers, &GraphEvent::ConnectionsChanged);
    }

    /// Reaction to endpoint changes of a node's component description: a
    /// removed endpoint drops its incident connections, a renamed endpoint
    /// re-points them to the new name
    fn handle_endpoint_change(
        connections: &Arc<Mutex<Vec<Connection>>>,
        observers: &Arc<Mutex<Vec<GraphObserver>>>,
        node_id: &str,
        change: &EndpointChange,
    ) {
        Self::fire(observers, &GraphEvent::EndpointChanged);
        match change.kind {
            EndpointChangeKind::Added => {}
            EndpointChangeKind::Removed => {
                let removed_any = {
                    let mut connections = connections.lock().unwrap();
                    let before = connections.len();
                    connections.retain(|connection| {
                        let source_removed = change.nature == EndpointNature::Output
                            && connection.source() == node_id
                            && connection.output() == change.name;
                        let target_removed = change.nature == EndpointNature::Input
                            && connection.target() == node_id
                            && connection.input() == change.name;
                        !(source_removed || target_removed)
                    });
                    connections.len() != before
                };
                if removed_any {
                    Self::fire(observers, &GraphEvent::ConnectionsChanged);
                }
            }
            EndpointChangeKind::Changed => {
                let Some(former_name) = change.former_name.as_deref() else {
                    return;
                };
                let changed_any = {
                    let mut connections = connections.lock().unwrap();
                    let mut changed = false;
                    for connection in connections.iter_mut() {
                        if change.nature == EndpointNature::Output
                            && connection.source() == node_id
                            && connection.output() == former_name
                        {
                            connection.output = change.name.clone();
                            changed = true;
                        }
                        if change.nature == EndpointNature::Input
                            && connection.target() == node_id
                            && connection.input() == former_name
                        {
                            connection.input = change.name.clone();
                            changed = true;
                        }
                    }
                    changed
                };
                if changed_any {
                    Self::fire(observers, &GraphEvent::ConnectionsChanged);
                }
            }
        }
    }

    /// Add a dynamic input to a node through the graph, so the endpoint
    /// listener sees the change
    pub fn add_node_input(&mut self, node_id: &str, name: &str, channel_type: ChannelType) -> Result<()> {
        self.workflow_node_mut(node_id)?
            .component_description_mut()
            .add_input(name, channel_type)
            .map_err(EngineError::from)
    }

    /// Add a dynamic output to a node through the graph
    pub fn add_node_output(&mut self, node_id: &str, name: &str, channel_type: ChannelType) -> Result<()> {
        self.workflow_node_mut(node_id)?
            .component_description_mut()
            .add_output(name, channel_type)
            .map_err(EngineError::from)
    }

    /// Collect all placeholders occurring in node configurations into a
    /// launch-time index
    pub fn placeholder_index(&self) -> PlaceholderIndex {
        let mut index = PlaceholderIndex::new();
        for node in &self.nodes {
            let description = node.component_description();
            for value in description.configuration().values() {
                if let Some(text) = value.as_str() {
                    if calyx_component_model::placeholder::is_placeholder(text) {
                        index.add_placeholder(text, description.identifier(), node.identifier());
                    }
                }
            }
        }
        index
    }

    /// Identifier-preserving deep copy
    ///
    /// All nodes and connections are new instances without shared mutable
    /// state, so observers on the copy are independent of observers on the
    /// original.
    pub fn deep_copy(&self) -> WorkflowDescription {
        let mut copy = WorkflowDescription::new(self.identifier.clone());
        copy.workflow_version = self.workflow_version;
        copy.name = self.name.clone();
        copy.additional_information = self.additional_information.clone();
        copy.target_platform = self.target_platform.clone();
        for node in &self.nodes {
            copy.add_workflow_node(node.deep_copy());
        }
        *copy.connections.lock().unwrap() = self.connections.lock().unwrap().clone();
        copy
    }
}

impl std::fmt::Debug for WorkflowDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDescription")
            .field("identifier", &self.identifier)
            .field("workflow_version", &self.workflow_version)
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}
