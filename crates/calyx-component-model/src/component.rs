//! The contract every component implementation has to fulfil
//!
//! A component is a single computational unit in a workflow graph. The
//! controller drives it through prepare/run/teardown callbacks; the decision
//! callbacks (`can_run_after_new_input`, `can_run_after_run`) gate when a
//! computation step happens, operating over the per-input queues of
//! unconsumed values.
//!
//! Unless there is a specific reason not to, implementations should rely on
//! the default decision methods, which delegate to the controller-owned
//! [`InputGate`] and its required/init/optional aggregation policy.

use thiserror::Error;

use crate::gate::InputGate;
use crate::instance::ComponentInstanceInformation;
use crate::types::{Input, PendingInputs};

/// Result type alias for component callbacks
pub type Result<T> = std::result::Result<T, ComponentError>;

/// Errors raised by component lifecycle and decision callbacks
///
/// Every variant is fatal to the component instance: the controller moves the
/// instance to its failed state and never retries a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// A lifecycle callback failed at runtime
    #[error("component failed: {0}")]
    Fatal(String),

    /// A component implementation violated a harness invariant; indicates a
    /// broken implementation, not a runtime condition
    #[error("developer error: {0}")]
    DeveloperError(String),

    /// The component implementation could not be created
    #[error("can not instantiate component: {0}")]
    Instantiation(String),
}

impl ComponentError {
    /// Create a fatal error with a message
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

/// A computational unit participating in workflows
///
/// Lifecycle: `on_prepare` once, `run_initial` once after start, then
/// input-driven `can_run_after_new_input`/`run_step`/`can_run_after_run`
/// cycles until the component finishes, fails, or is canceled. At most one of
/// `on_cancel`/`on_finish` is called per instance, followed by `on_dispose`
/// exactly once.
pub trait Component: Send {
    /// Called once before the workflow starts. Things that usually would go
    /// into a constructor (like acquiring resources) go here. Errors are
    /// fatal and never retried.
    fn on_prepare(&mut self, info: &ComponentInstanceInformation) -> Result<()> {
        let _ = info;
        Ok(())
    }

    /// Called exactly once directly after the workflow started. Return
    /// `Ok(false)` to signal that this component is already finished (e.g. it
    /// produced one fixed output and has no inputs); `Ok(true)` to wait for
    /// input-driven runs.
    fn run_initial(&mut self, inputs_connected: bool) -> Result<bool> {
        let _ = inputs_connected;
        Ok(true)
    }

    /// Called when a new input arrived: decide whether `run_step` can be
    /// invoked now. The default records the new value into the gate's cached
    /// slots and applies the required/init/optional aggregation policy.
    ///
    /// Overrides must stay consistent with whatever aggregation policy they
    /// choose and must not consume from the queues.
    fn can_run_after_new_input(
        &mut self,
        new_input: &Input,
        gate: &mut InputGate,
        pending: &mut PendingInputs,
    ) -> Result<bool> {
        gate.record_new_input(new_input);
        Ok(gate.can_run(pending))
    }

    /// One computation step. `new_input` is the input that triggered this run,
    /// or `None` if the step was triggered by `can_run_after_run`. Must
    /// consume at least one queued input; the harness fails the instance
    /// otherwise, since a non-consuming step would be re-invoked forever.
    /// Return `Ok(false)` to finish, `Ok(true)` to continue.
    fn run_step(&mut self, new_input: Option<&Input>, pending: &mut PendingInputs) -> Result<bool> {
        let _ = (new_input, pending);
        Ok(false)
    }

    /// Called after `run_step` returned: decide whether another step can run
    /// without a new input arriving. The default first checks the consumption
    /// invariant, then re-applies the aggregation policy.
    fn can_run_after_run(
        &mut self,
        last_input: Option<&Input>,
        gate: &mut InputGate,
        pending: &mut PendingInputs,
    ) -> Result<bool> {
        let _ = last_input;
        gate.check_consumption(pending)?;
        Ok(gate.can_run(pending))
    }

    /// Called when the workflow is canceled; the component will never run
    /// again
    fn on_cancel(&mut self) {}

    /// Called when the workflow finished; the component will never run again
    fn on_finish(&mut self) {}

    /// Called when the workflow is disposed; all resources not yet released
    /// in `on_finish` or `on_cancel` must be released here
    fn on_dispose(&mut self) {}
}
