//! Structural validation of workflow graphs
//!
//! Checks connection references, endpoint existence, channel type
//! compatibility, and (given a registry) component availability. All errors
//! found are collected, not just the first.

use std::collections::BTreeMap;

use calyx_component_model::ChannelType;

use crate::graph::WorkflowDescription;
use crate::registry::ComponentRegistry;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A connection references a node that does not exist
    UnknownNode { node_id: String },
    /// A connection references an endpoint its node does not declare
    UnknownEndpoint { node_id: String, endpoint: String },
    /// A connection joins endpoints of incompatible channel types
    IncompatibleChannelTypes {
        source_id: String,
        output: String,
        target_id: String,
        input: String,
    },
    /// A node references a component that is not installed
    UnknownComponent { node_id: String, component_id: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode { node_id } => {
                write!(f, "Connection references unknown node '{}'", node_id)
            }
            Self::UnknownEndpoint { node_id, endpoint } => {
                write!(f, "Node '{}' has no endpoint named '{}'", node_id, endpoint)
            }
            Self::IncompatibleChannelTypes {
                source_id,
                output,
                target_id,
                input,
            } => {
                write!(
                    f,
                    "Connection {}:{} -> {}:{} joins incompatible channel types",
                    source_id, output, target_id, input
                )
            }
            Self::UnknownComponent { node_id, component_id } => {
                write!(
                    f,
                    "Node '{}' references unknown component '{}'",
                    node_id, component_id
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a workflow description
///
/// Returns all validation errors found. Pass a registry to also validate
/// component availability.
pub fn validate_workflow(
    description: &WorkflowDescription,
    registry: Option<&ComponentRegistry>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut outputs_by_node: BTreeMap<&str, BTreeMap<String, ChannelType>> = BTreeMap::new();
    let mut inputs_by_node: BTreeMap<&str, BTreeMap<String, ChannelType>> = BTreeMap::new();
    for node in description.workflow_nodes() {
        outputs_by_node.insert(node.identifier(), node.component_description().output_definitions());
        inputs_by_node.insert(node.identifier(), node.component_description().input_definitions());
    }

    for connection in description.connections() {
        let source_outputs = outputs_by_node.get(connection.source());
        let target_inputs = inputs_by_node.get(connection.target());

        if source_outputs.is_none() {
            errors.push(ValidationError::UnknownNode {
                node_id: connection.source().to_string(),
            });
        }
        if target_inputs.is_none() {
            errors.push(ValidationError::UnknownNode {
                node_id: connection.target().to_string(),
            });
        }
        let (Some(source_outputs), Some(target_inputs)) = (source_outputs, target_inputs) else {
            continue;
        };

        let output_type = source_outputs.get(connection.output());
        let input_type = target_inputs.get(connection.input());

        if output_type.is_none() {
            errors.push(ValidationError::UnknownEndpoint {
                node_id: connection.source().to_string(),
                endpoint: connection.output().to_string(),
            });
        }
        if input_type.is_none() {
            errors.push(ValidationError::UnknownEndpoint {
                node_id: connection.target().to_string(),
                endpoint: connection.input().to_string(),
            });
        }
        if let (Some(output_type), Some(input_type)) = (output_type, input_type) {
            if !output_type.is_compatible_with(input_type) {
                errors.push(ValidationError::IncompatibleChannelTypes {
                    source_id: connection.source().to_string(),
                    output: connection.output().to_string(),
                    target_id: connection.target().to_string(),
                    input: connection.input().to_string(),
                });
            }
        }
    }

    if let Some(registry) = registry {
        for node in description.workflow_nodes() {
            let component_id = node.component_description().identifier();
            if !registry.has_component(component_id) {
                errors.push(ValidationError::UnknownComponent {
                    node_id: node.identifier().to_string(),
                    component_id: component_id.to_string(),
                });
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{Connection, WorkflowNode};
    use calyx_component_model::{
        Component, ComponentDescription, DeclarativeComponentDescription,
    };

    #[derive(Default)]
    struct NoopComponent;

    impl Component for NoopComponent {}

    fn node(identifier: &str, component_id: &str) -> WorkflowNode {
        let declarative = DeclarativeComponentDescription::new(component_id, "Test", "Testing", "1.0")
            .with_input("real_in", ChannelType::Real)
            .with_input("text_in", ChannelType::Text)
            .with_output("real_out", ChannelType::Real);
        WorkflowNode::with_identifier(identifier, ComponentDescription::new(Arc::new(declarative)))
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(
            DeclarativeComponentDescription::new("test.known", "Known", "Test", "1.0"),
            || Box::new(NoopComponent),
        );
        registry
    }

    #[test]
    fn test_valid_workflow() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.known"));
        wd.add_workflow_node(node("n2", "test.known"));
        wd.add_connection(Connection::new("n1", "real_out", "n2", "real_in"));

        let errors = validate_workflow(&wd, Some(&registry()));
        assert!(errors.is_empty(), "expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_connection_to_unknown_node() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.known"));
        wd.add_connection(Connection::new("n1", "real_out", "missing", "real_in"));

        let errors = validate_workflow(&wd, None);
        assert!(errors
            .iter()
            .any(|error| matches!(error, ValidationError::UnknownNode { node_id } if node_id == "missing")));
    }

    #[test]
    fn test_connection_to_unknown_endpoint() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.known"));
        wd.add_workflow_node(node("n2", "test.known"));
        wd.add_connection(Connection::new("n1", "no_such_out", "n2", "real_in"));

        let errors = validate_workflow(&wd, None);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownEndpoint {
                node_id: "n1".to_string(),
                endpoint: "no_such_out".to_string(),
            }]
        );
    }

    #[test]
    fn test_incompatible_channel_types() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.known"));
        wd.add_workflow_node(node("n2", "test.known"));
        wd.add_connection(Connection::new("n1", "real_out", "n2", "text_in"));

        let errors = validate_workflow(&wd, None);
        assert!(errors
            .iter()
            .any(|error| matches!(error, ValidationError::IncompatibleChannelTypes { .. })));
    }

    #[test]
    fn test_unknown_component_with_registry() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.unknown"));

        let errors = validate_workflow(&wd, Some(&registry()));
        assert!(errors
            .iter()
            .any(|error| matches!(error, ValidationError::UnknownComponent { .. })));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut wd = WorkflowDescription::new("wf");
        wd.add_workflow_node(node("n1", "test.unknown"));
        wd.add_connection(Connection::new("n1", "real_out", "missing", "real_in"));
        wd.add_connection(Connection::new("n1", "bogus", "n1", "real_in"));

        let errors = validate_workflow(&wd, Some(&registry()));
        assert!(errors.len() >= 3, "expected at least 3 errors, got: {:?}", errors);
    }
}
