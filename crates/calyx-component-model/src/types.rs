//! Channel types and values flowing between component endpoints
//!
//! Every endpoint declares a [`ChannelType`]; every value travelling along a
//! connection is a [`ChannelValue`] wrapped into an [`Input`] token addressed
//! at the receiving endpoint. Unconsumed tokens accumulate per endpoint in
//! [`PendingInputs`] until the component's input gate releases a run.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// The data type an endpoint can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Boolean value
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point number
    Real,
    /// Text string
    Text,
    /// Arbitrary JSON document
    Json,
    /// Reference into the data catalog (opaque key)
    FileReference,
}

impl ChannelType {
    /// Stable wire name of this type, as used in persisted workflow files
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Boolean => "boolean",
            ChannelType::Integer => "integer",
            ChannelType::Real => "real",
            ChannelType::Text => "text",
            ChannelType::Json => "json",
            ChannelType::FileReference => "file_reference",
        }
    }

    /// Parse a wire name back into a channel type
    pub fn parse(name: &str) -> Option<ChannelType> {
        match name {
            "boolean" => Some(ChannelType::Boolean),
            "integer" => Some(ChannelType::Integer),
            "real" => Some(ChannelType::Real),
            "text" => Some(ChannelType::Text),
            "json" => Some(ChannelType::Json),
            "file_reference" => Some(ChannelType::FileReference),
            _ => None,
        }
    }

    /// Check if a value of this type may flow into an endpoint of `other` type
    pub fn is_compatible_with(&self, other: &ChannelType) -> bool {
        // Json endpoints accept every serializable value
        if matches!(self, ChannelType::Json) || matches!(other, ChannelType::Json) {
            return true;
        }
        self == other
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value travelling along a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChannelValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Json(serde_json::Value),
    FileReference(String),
}

impl ChannelValue {
    /// The channel type this value belongs to
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelValue::Boolean(_) => ChannelType::Boolean,
            ChannelValue::Integer(_) => ChannelType::Integer,
            ChannelValue::Real(_) => ChannelType::Real,
            ChannelValue::Text(_) => ChannelType::Text,
            ChannelValue::Json(_) => ChannelType::Json,
            ChannelValue::FileReference(_) => ChannelType::FileReference,
        }
    }
}

/// Payload of an [`Input`] token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputPayload {
    /// A regular value
    Value(ChannelValue),
    /// End-of-stream marker: the upstream component finished and will never
    /// write to this endpoint again
    Finished,
}

/// A named, typed token flowing into a component's per-input queue
///
/// Once enqueued, an input is logically owned by the queue until a `run_step`
/// consumes it. `name` is the name of the receiving input endpoint, already
/// demultiplexed by the delivering output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    /// Name of the input endpoint this token is addressed at
    pub name: String,
    /// Value or end-of-stream marker
    pub payload: InputPayload,
    /// Per-output sequence number, starting at 1
    pub number: u64,
    /// Instance identifier of the producing component
    pub source_component: String,
    /// Identifier of the workflow instance this token belongs to
    pub workflow_id: String,
}

impl Input {
    /// The carried value, or `None` for an end-of-stream marker
    pub fn value(&self) -> Option<&ChannelValue> {
        match &self.payload {
            InputPayload::Value(value) => Some(value),
            InputPayload::Finished => None,
        }
    }

    /// Whether this token is an end-of-stream marker
    pub fn is_finished_marker(&self) -> bool {
        matches!(self.payload, InputPayload::Finished)
    }
}

/// Per-endpoint FIFO queues of unconsumed inputs
///
/// Tokens within one named queue preserve arrival order; there is no ordering
/// guarantee across different names. The init-value re-injection performed by
/// the input gate is the only place a queue's history is replaced wholesale,
/// everywhere else consumption is strictly "dequeue oldest".
#[derive(Debug, Clone, Default)]
pub struct PendingInputs {
    queues: BTreeMap<String, VecDeque<Input>>,
}

impl PendingInputs {
    /// Create an empty queue set
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an (empty) queue exists for the given endpoint name
    pub fn register(&mut self, name: &str) {
        self.queues.entry(name.to_string()).or_default();
    }

    /// Append an input to the queue of its endpoint
    pub fn enqueue(&mut self, input: Input) {
        self.queues.entry(input.name.clone()).or_default().push_back(input);
    }

    /// Dequeue the oldest input of the given endpoint
    pub fn take_next(&mut self, name: &str) -> Option<Input> {
        self.queues.get_mut(name).and_then(|queue| queue.pop_front())
    }

    /// Peek at the oldest input of the given endpoint without consuming it
    pub fn front(&self, name: &str) -> Option<&Input> {
        self.queues.get(name).and_then(|queue| queue.front())
    }

    /// Number of queued inputs for the given endpoint
    pub fn queue_len(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, VecDeque::len)
    }

    /// Total number of queued inputs across all endpoints
    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Replace the queue of the given endpoint with a single fresh input
    ///
    /// Used by the input gate to re-inject the cached value of an init-usage
    /// input so the component always sees exactly one current value.
    pub fn replace_queue(&mut self, name: &str, input: Input) {
        let mut queue = VecDeque::with_capacity(1);
        queue.push_back(input);
        self.queues.insert(name.to_string(), queue);
    }

    /// Names of all endpoints a queue exists for
    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }
}
