//! Component and workflow state enums

use serde::{Deserialize, Serialize};

/// The states a component instance moves through
///
/// Initial state is `Instantiated`. Working transitions: Preparing→Prepared,
/// Starting→Ready, Checking→Running→{Ready | Finished | FinishedNoRunStep |
/// Failed}, Pausing→Paused→(resume)→Starting, Canceling→Canceled,
/// Disposing→Disposed. Once `Failed`, no further state change is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Instantiated,
    Preparing,
    Prepared,
    Starting,
    Ready,
    Checking,
    Running,
    Finished,
    FinishedNoRunStep,
    Failed,
    Pausing,
    Paused,
    Canceling,
    Canceled,
    Disposing,
    Disposed,
}

impl ComponentState {
    /// Stable display name, as used in lifecycle diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Instantiated => "INSTANTIATED",
            ComponentState::Preparing => "PREPARING",
            ComponentState::Prepared => "PREPARED",
            ComponentState::Starting => "STARTING",
            ComponentState::Ready => "READY",
            ComponentState::Checking => "CHECKING",
            ComponentState::Running => "RUNNING",
            ComponentState::Finished => "FINISHED",
            ComponentState::FinishedNoRunStep => "FINISHED_NO_RUN_STEP",
            ComponentState::Failed => "FAILED",
            ComponentState::Pausing => "PAUSING",
            ComponentState::Paused => "PAUSED",
            ComponentState::Canceling => "CANCELING",
            ComponentState::Canceled => "CANCELED",
            ComponentState::Disposing => "DISPOSING",
            ComponentState::Disposed => "DISPOSED",
        }
    }

    /// Whether this state ends the instance's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComponentState::Finished
                | ComponentState::FinishedNoRunStep
                | ComponentState::Failed
                | ComponentState::Canceled
                | ComponentState::Disposed
        )
    }

    /// Whether this state marks a regularly finished instance
    pub fn is_finished(&self) -> bool {
        matches!(self, ComponentState::Finished | ComponentState::FinishedNoRunStep)
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The states a workflow instance moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Init,
    Preparing,
    Ready,
    Running,
    Pausing,
    Paused,
    Resuming,
    Canceling,
    Canceled,
    Finished,
    Failed,
    Disposing,
    Disposed,
}

impl WorkflowState {
    /// The states in which a workflow is considered active
    pub const ACTIVE_STATES: [WorkflowState; 6] = [
        WorkflowState::Ready,
        WorkflowState::Preparing,
        WorkflowState::Running,
        WorkflowState::Pausing,
        WorkflowState::Paused,
        WorkflowState::Resuming,
    ];

    /// Stable display name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Init => "INIT",
            WorkflowState::Preparing => "PREPARING",
            WorkflowState::Ready => "READY",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Pausing => "PAUSING",
            WorkflowState::Paused => "PAUSED",
            WorkflowState::Resuming => "RESUMING",
            WorkflowState::Canceling => "CANCELING",
            WorkflowState::Canceled => "CANCELED",
            WorkflowState::Finished => "FINISHED",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Disposing => "DISPOSING",
            WorkflowState::Disposed => "DISPOSED",
        }
    }

    /// Whether a workflow in this state is still running or able to run
    pub fn is_active(&self) -> bool {
        Self::ACTIVE_STATES.contains(self)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
