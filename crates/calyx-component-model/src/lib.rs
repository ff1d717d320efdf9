//! Calyx Component Model
//!
//! Canonical model of a workflow component: its typed input/output endpoints,
//! its configuration maps, the contract a component implementation has to
//! fulfil, and the input-aggregation gate that decides when a component may
//! run.
//!
//! # Modules
//!
//! - **types**: channel types and values, the [`Input`] token, pending-input queues
//! - **endpoint**: dynamic endpoint management, per-endpoint metadata, usage policies
//! - **description**: declarative component templates plus per-node mutable state
//! - **placeholder**: the `${...}` deferred-configuration grammar and launch-time index
//! - **component**: the [`Component`] trait and its error taxonomy
//! - **gate**: the required/init/optional input-aggregation algorithm
//! - **instance**: the immutable runtime view handed to a running component

pub mod component;
pub mod description;
pub mod endpoint;
pub mod gate;
pub mod instance;
pub mod placeholder;
pub mod types;

pub use component::{Component, ComponentError};
pub use description::{
    ComponentDescription, ConfigurationError, ConfigurationMap, DeclarativeComponentDescription,
    PlatformIdentifier, COMPONENT_GROUP_UNKNOWN, COMPONENT_VERSION_UNKNOWN, DEFAULT_CONFIG_ID,
    PLACEHOLDER_COMPONENT_ID_PREFIX,
};
pub use endpoint::{
    DynamicEndpointManager, EndpointChange, EndpointChangeKind, EndpointError,
    EndpointMetaDataManager, EndpointNature, InputUsage, METADATA_KEY_INPUT_USAGE,
};
pub use gate::InputGate;
pub use instance::{
    ComponentInstanceDescriptor, ComponentInstanceInformation, InputFeed, Output,
    WorkflowContextInformation,
};
pub use placeholder::{Placeholder, PlaceholderIndex, ENCRYPTED_ATTRIBUTE, GLOBAL_ATTRIBUTE};
pub use types::{ChannelType, ChannelValue, Input, InputPayload, PendingInputs};
