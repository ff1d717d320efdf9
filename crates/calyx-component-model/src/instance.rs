//! Runtime view of an instantiated component
//!
//! [`ComponentInstanceInformation`] is the immutable snapshot handed to a
//! running component implementation: resolved configuration (placeholders
//! already substituted), endpoint definitions and metadata, and the set of
//! [`Output`]s it may write to. [`ComponentInstanceDescriptor`] is the
//! serializable subset exposed to remote and UI callers.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::description::{ComponentDescription, PlatformIdentifier};
use crate::placeholder;
use crate::types::{ChannelType, ChannelValue, Input, InputPayload};

/// Producer-side handle of a controller's shared input queue
///
/// All of an instance's input channels feed this one queue; the controller
/// demultiplexes by input name. While the owning controller pauses, delivered
/// inputs are buffered aside and replayed on resume, preserving arrival
/// order.
#[derive(Clone)]
pub struct InputFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    sender: mpsc::UnboundedSender<Input>,
    paused: AtomicBool,
    buffered_while_paused: Mutex<VecDeque<Input>>,
}

impl InputFeed {
    /// Create a feed and the receiving end the controller's driving loop
    /// polls
    pub fn new() -> (InputFeed, mpsc::UnboundedReceiver<Input>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            InputFeed {
                inner: Arc::new(FeedInner {
                    sender,
                    paused: AtomicBool::new(false),
                    buffered_while_paused: Mutex::new(VecDeque::new()),
                }),
            },
            receiver,
        )
    }

    /// Deliver one input token
    pub fn deliver(&self, input: Input) {
        if self.inner.paused.load(Ordering::SeqCst) {
            self.inner
                .buffered_while_paused
                .lock()
                .expect("input feed buffer lock poisoned")
                .push_back(input);
        } else if self.inner.sender.send(input).is_err() {
            log::warn!("input delivered to a dropped component input queue");
        }
    }

    /// Start buffering deliveries instead of forwarding them
    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::SeqCst);
    }

    /// Replay all inputs buffered while paused and resume direct delivery
    pub fn replay_buffered(&self) {
        let buffered: Vec<Input> = {
            let mut buffer = self
                .inner
                .buffered_while_paused
                .lock()
                .expect("input feed buffer lock poisoned");
            buffer.drain(..).collect()
        };
        self.inner.paused.store(false, Ordering::SeqCst);
        for input in buffered {
            self.deliver(input);
        }
    }

    /// Number of inputs currently buffered while paused
    pub fn buffered_len(&self) -> usize {
        self.inner
            .buffered_while_paused
            .lock()
            .expect("input feed buffer lock poisoned")
            .len()
    }
}

/// A named, typed output a component writes results to
///
/// Each write is fanned out to every subscribed downstream input queue as a
/// sequence-numbered [`Input`], with the token renamed to the subscriber's
/// input endpoint.
#[derive(Clone)]
pub struct Output {
    name: String,
    channel_type: ChannelType,
    source_component: String,
    workflow_id: String,
    inner: Arc<OutputInner>,
}

struct OutputInner {
    subscribers: Mutex<Vec<(String, InputFeed)>>,
    counter: AtomicU64,
}

impl Output {
    pub fn new(
        name: impl Into<String>,
        channel_type: ChannelType,
        source_component: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            channel_type,
            source_component: source_component.into(),
            workflow_id: workflow_id.into(),
            inner: Arc::new(OutputInner {
                subscribers: Mutex::new(Vec::new()),
                counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Subscribe a downstream input queue; every future write is delivered to
    /// it under the given input name
    pub fn subscribe(&self, input_name: impl Into<String>, feed: InputFeed) {
        self.inner
            .subscribers
            .lock()
            .expect("output subscriber lock poisoned")
            .push((input_name.into(), feed));
    }

    fn deliver(&self, payload: InputPayload) {
        let number = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("output subscriber lock poisoned");
        for (input_name, feed) in subscribers.iter() {
            feed.deliver(Input {
                name: input_name.clone(),
                payload: payload.clone(),
                number,
                source_component: self.source_component.clone(),
                workflow_id: self.workflow_id.clone(),
            });
        }
    }

    /// Write one value to all subscribers
    pub fn write(&self, value: ChannelValue) {
        self.deliver(InputPayload::Value(value));
    }

    /// Signal end-of-stream to all subscribers
    pub fn write_finished(&self) {
        self.deliver(InputPayload::Finished);
    }
}

/// Workflow-level context an instance runs within
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContextInformation {
    pub identifier: String,
    pub name: String,
    pub involved_platforms: Vec<PlatformIdentifier>,
}

/// Serializable snapshot of an instantiated component, exposed to remote and
/// UI callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInstanceDescriptor {
    pub identifier: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformIdentifier>,
    pub working_directory: PathBuf,
    pub component_identifier: String,
    pub workflow_context_name: String,
    pub involved_platforms: Vec<PlatformIdentifier>,
}

/// Immutable runtime view handed to the component implementation itself
///
/// Created once per instantiation; configuration reads resolve placeholder
/// values through the description's launch-time placeholder map.
pub struct ComponentInstanceInformation {
    identifier: String,
    name: String,
    working_directory: PathBuf,
    description: ComponentDescription,
    context: WorkflowContextInformation,
    inputs_connected: bool,
    outputs: BTreeMap<String, Output>,
}

impl ComponentInstanceInformation {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        description: ComponentDescription,
        context: WorkflowContextInformation,
        inputs_connected: bool,
        outputs: impl IntoIterator<Item = Output>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            working_directory: working_directory.into(),
            description,
            context,
            inputs_connected,
            outputs: outputs
                .into_iter()
                .map(|output| (output.name().to_string(), output))
                .collect(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn component_identifier(&self) -> &str {
        self.description.identifier()
    }

    pub fn component_name(&self) -> &str {
        self.description.name()
    }

    pub fn platform(&self) -> Option<&PlatformIdentifier> {
        self.description.platform()
    }

    pub fn workflow_identifier(&self) -> &str {
        &self.context.identifier
    }

    pub fn workflow_name(&self) -> &str {
        &self.context.name
    }

    pub fn involved_platforms(&self) -> &[PlatformIdentifier] {
        &self.context.involved_platforms
    }

    /// Whether any upstream output is connected to this instance's inputs
    pub fn inputs_connected(&self) -> bool {
        self.inputs_connected
    }

    pub fn input_definitions(&self) -> BTreeMap<String, ChannelType> {
        self.description.input_definitions()
    }

    pub fn input_meta_data(&self, input_name: &str) -> BTreeMap<String, serde_json::Value> {
        self.description.input_meta_data(input_name)
    }

    pub fn output_definitions(&self) -> BTreeMap<String, ChannelType> {
        self.description.output_definitions()
    }

    pub fn output_meta_data(&self, output_name: &str) -> BTreeMap<String, serde_json::Value> {
        self.description.output_meta_data(output_name)
    }

    pub fn configuration_definitions(&self) -> &BTreeMap<String, ChannelType> {
        self.description.configuration_definitions()
    }

    /// The configuration value associated with the given key
    ///
    /// A value matching the placeholder grammar is not returned literally; it
    /// is substituted from the launch-time placeholder map, yielding `None`
    /// if no value was supplied.
    pub fn configuration_value(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.description.configuration().get(key)?;
        if let Some(text) = raw.as_str() {
            if placeholder::is_placeholder(text) {
                let name = placeholder::parse_placeholder(text)?.name;
                return self.description.placeholder_value(&name).cloned();
            }
        }
        Some(raw.clone())
    }

    /// Typed convenience accessor with a fallback default
    pub fn configuration_value_as<T: serde::de::DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.configuration_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(default)
    }

    /// Whether this instance declares any inputs at all
    pub fn has_inputs(&self) -> bool {
        !self.input_definitions().is_empty()
    }

    /// Names of all inputs of the given channel type
    pub fn inputs_of_type(&self, channel_type: ChannelType) -> Vec<String> {
        self.input_definitions()
            .into_iter()
            .filter(|(_, t)| *t == channel_type)
            .map(|(name, _)| name)
            .collect()
    }

    /// Names of all outputs of the given channel type
    pub fn outputs_of_type(&self, channel_type: ChannelType) -> Vec<String> {
        self.output_definitions()
            .into_iter()
            .filter(|(_, t)| *t == channel_type)
            .map(|(name, _)| name)
            .collect()
    }

    /// The output with the given name
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    /// All outputs of this instance
    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Build the remote-facing descriptor of this instance
    pub fn descriptor(&self) -> ComponentInstanceDescriptor {
        ComponentInstanceDescriptor {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            platform: self.description.platform().cloned(),
            working_directory: self.working_directory.clone(),
            component_identifier: self.description.identifier().to_string(),
            workflow_context_name: self.context.name.clone(),
            involved_platforms: self.context.involved_platforms.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::description::DeclarativeComponentDescription;

    fn info_with_config(value: serde_json::Value) -> ComponentInstanceInformation {
        let declarative = DeclarativeComponentDescription::new("calyx.test", "Test", "Testing", "1.0")
            .with_configuration("path", ChannelType::Text)
            .with_default_value("path", value);
        let mut description = ComponentDescription::new(Arc::new(declarative));
        description.add_placeholder_values(
            [("pathPlaceholder".to_string(), serde_json::json!("/opt/python"))]
                .into_iter()
                .collect(),
        );
        ComponentInstanceInformation::new(
            "instance-1",
            "Test",
            "/tmp/component-1",
            description,
            WorkflowContextInformation {
                identifier: "wf-1".to_string(),
                name: "Workflow".to_string(),
                involved_platforms: vec![],
            },
            false,
            [],
        )
    }

    #[test]
    fn test_literal_configuration_value() {
        let info = info_with_config(serde_json::json!("/usr/bin/python"));
        assert_eq!(
            info.configuration_value("path"),
            Some(serde_json::json!("/usr/bin/python"))
        );
    }

    #[test]
    fn test_placeholder_configuration_value_is_substituted() {
        let info = info_with_config(serde_json::json!("${pathPlaceholder}"));
        assert_eq!(info.configuration_value("path"), Some(serde_json::json!("/opt/python")));
    }

    #[test]
    fn test_unresolved_placeholder_yields_none() {
        let info = info_with_config(serde_json::json!("${otherPlaceholder}"));
        assert_eq!(info.configuration_value("path"), None);
    }

    #[test]
    fn test_typed_configuration_access() {
        let info = info_with_config(serde_json::json!("/usr/bin/python"));
        assert_eq!(
            info.configuration_value_as::<String>("path", "fallback".to_string()),
            "/usr/bin/python"
        );
        assert_eq!(info.configuration_value_as::<i64>("missing", 3), 3);
    }

    #[test]
    fn test_output_fan_out_and_numbering() {
        let output = Output::new("result", ChannelType::Integer, "instance-1", "wf-1");
        let (feed_a, mut rx_a) = InputFeed::new();
        let (feed_b, mut rx_b) = InputFeed::new();
        output.subscribe("in_a", feed_a);
        output.subscribe("in_b", feed_b);

        output.write(ChannelValue::Integer(7));
        output.write(ChannelValue::Integer(8));
        output.write_finished();

        let first = rx_a.try_recv().unwrap();
        assert_eq!(first.name, "in_a");
        assert_eq!(first.number, 1);
        assert_eq!(first.value(), Some(&ChannelValue::Integer(7)));

        let second = rx_a.try_recv().unwrap();
        assert_eq!(second.number, 2);

        let marker = rx_b.try_recv().and_then(|_| rx_b.try_recv()).and_then(|_| rx_b.try_recv());
        assert!(marker.unwrap().is_finished_marker());
    }

    #[test]
    fn test_feed_buffers_while_paused() {
        let (feed, mut rx) = InputFeed::new();
        feed.set_paused(true);
        feed.deliver(Input {
            name: "a".to_string(),
            payload: InputPayload::Value(ChannelValue::Integer(1)),
            number: 1,
            source_component: "s".to_string(),
            workflow_id: "wf".to_string(),
        });
        assert_eq!(feed.buffered_len(), 1);
        assert!(rx.try_recv().is_err());

        feed.replay_buffered();
        assert_eq!(feed.buffered_len(), 0);
        assert_eq!(rx.try_recv().unwrap().name, "a");
    }
}
