//! Calyx Workflow Engine
//!
//! The execution core of the Calyx platform: the design-time workflow graph
//! model, the component lifecycle state machine driving each node, the
//! registries resolving components and workflow instances across platforms,
//! and the versioned persistence format with its forward migrations.
//!
//! # Modules
//!
//! - **graph**: [`WorkflowDescription`], [`WorkflowNode`], [`Connection`]
//! - **state**: the component and workflow state enums
//! - **controller**: the per-instance lifecycle state machine and input loop
//! - **registry**: typed component registry plus distributed collaborator traits
//! - **workflow**: per-instance orchestration across all of a graph's controllers
//! - **workflow_registry**: the synchronous-feeling facade over distributed workflows
//! - **persistence**: read/write of the versioned workflow file format
//! - **migration**: one-way forward migrations between format versions
//! - **validation**: structural graph validation
//! - **events**: typed progress events published by controllers and workflows

pub mod controller;
pub mod error;
pub mod events;
pub mod graph;
pub mod migration;
pub mod persistence;
pub mod registry;
pub mod state;
pub mod validation;
pub mod workflow;
pub mod workflow_registry;

pub use controller::{ComponentController, InitializeRequest, InputSubscription};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventError, EventSink, NullEventSink, VecEventSink};
pub use graph::{Connection, GraphEvent, NodeEvent, WorkflowDescription, WorkflowNode};
pub use migration::{
    is_update_needed, update_workflow_description, CURRENT_WORKFLOW_VERSION,
    INITIAL_WORKFLOW_VERSION,
};
pub use persistence::WorkflowDescriptionPersistenceHandler;
pub use registry::{
    ComponentFactory, ComponentRegistration, ComponentRegistry, DistributedComponentRegistry,
    LocalDistributedComponentRegistry, LocalPlatformService, PlatformService,
    UnavailableDistributedComponentRegistry,
};
pub use state::{ComponentState, WorkflowState};
pub use validation::{validate_workflow, ValidationError};
pub use workflow::{Workflow, WorkflowInformation};
pub use workflow_registry::{
    DistributedWorkflowRegistry, LocalWorkflowRegistry, SimpleWorkflowRegistry,
    UnavailableDistributedWorkflowRegistry,
};
