//! The input-aggregation gate: required / init / optional readiness
//!
//! Every input declares, via the `usage` metadata key, one of three policies:
//! `required` inputs must have a value queued at decision time, `init` inputs
//! must receive a value at least once and afterwards have their last value
//! re-injected on every decision, and `optional` inputs never block. The gate
//! holds the cached init/optional values and the pre-run queue count backing
//! the consumption invariant.
//!
//! Separating "is blocked by uninitialized init inputs" from "are required
//! inputs present" lets a component wait indefinitely for one-time setup
//! values while still gating every subsequent run on the presence of fresh
//! required data (configure once, iterate many times).

use std::collections::BTreeMap;

use crate::component::{ComponentError, Result};
use crate::endpoint::InputUsage;
use crate::instance::ComponentInstanceInformation;
use crate::types::{Input, PendingInputs};

/// Aggregation state deciding when a component may run
///
/// Owned by the controller and threaded through the component's decision
/// callbacks, so custom implementations can build on (or bypass) the default
/// policy without carrying hidden base-class state.
#[derive(Debug, Clone)]
pub struct InputGate {
    usages: BTreeMap<String, InputUsage>,
    /// Cached last values of init- and optional-usage inputs; `None` until
    /// the first value arrived
    cached_values: BTreeMap<String, Option<Input>>,
    before_run_step_count: usize,
}

impl InputGate {
    /// Build a gate over the given input-name to usage mapping
    pub fn new(usages: BTreeMap<String, InputUsage>) -> Self {
        let cached_values = usages
            .iter()
            .filter(|(_, usage)| matches!(usage, InputUsage::Init | InputUsage::Optional))
            .map(|(name, _)| (name.clone(), None))
            .collect();
        Self {
            usages,
            cached_values,
            before_run_step_count: 0,
        }
    }

    /// Build a gate from the input definitions and metadata of an instance
    pub fn for_instance(info: &ComponentInstanceInformation) -> Self {
        let usages = info
            .input_definitions()
            .keys()
            .map(|name| (name.clone(), InputUsage::from_meta_data(&info.input_meta_data(name))))
            .collect();
        Self::new(usages)
    }

    /// The usage policy of the given input
    pub fn usage(&self, name: &str) -> InputUsage {
        self.usages.get(name).copied().unwrap_or_default()
    }

    /// Cache the given input's value if its usage policy tracks one
    pub fn record_new_input(&mut self, input: &Input) {
        if let Some(slot) = self.cached_values.get_mut(&input.name) {
            *slot = Some(input.clone());
        }
    }

    /// True while any init-usage input has never received a value; the
    /// component may not run before
    pub fn has_unfilled_init(&self) -> bool {
        self.usages
            .iter()
            .filter(|(_, usage)| matches!(usage, InputUsage::Init))
            .any(|(name, _)| matches!(self.cached_values.get(name), Some(None)))
    }

    /// True if every required input (including inputs without any usage
    /// metadata) has a non-empty queue
    pub fn required_not_empty(&self, pending: &PendingInputs) -> bool {
        self.usages
            .keys()
            .filter(|name| !self.cached_values.contains_key(*name))
            .all(|name| pending.queue_len(name) > 0)
    }

    /// The aggregation decision
    ///
    /// When the required inputs are present, every filled init/optional slot
    /// has its queue replaced with a single fresh clone of the cached value,
    /// so the component always sees exactly one current value per run without
    /// it accumulating or running dry. The pre-run queue count is recorded on
    /// every call, including those returning `false`.
    pub fn can_run(&mut self, pending: &mut PendingInputs) -> bool {
        let mut result = !self.has_unfilled_init();

        if self.required_not_empty(pending) {
            for (name, slot) in &self.cached_values {
                if let Some(cached) = slot {
                    pending.replace_queue(name, cached.clone());
                }
            }
        } else {
            result = false;
        }

        self.before_run_step_count = pending.total_len();
        result
    }

    /// Verify that the last `run_step` consumed at least one queued input
    pub fn check_consumption(&self, pending: &PendingInputs) -> Result<()> {
        if pending.total_len() == self.before_run_step_count {
            return Err(ComponentError::DeveloperError(
                "run_step did not consume inputs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelValue, InputPayload};

    fn token(name: &str, value: i64) -> Input {
        Input {
            name: name.to_string(),
            payload: InputPayload::Value(ChannelValue::Integer(value)),
            number: value as u64,
            source_component: "source".to_string(),
            workflow_id: "wf".to_string(),
        }
    }

    fn gate(entries: &[(&str, InputUsage)]) -> InputGate {
        InputGate::new(
            entries
                .iter()
                .map(|(name, usage)| (name.to_string(), *usage))
                .collect(),
        )
    }

    #[test]
    fn test_required_only_blocks_until_all_present() {
        let mut gate = gate(&[("a", InputUsage::Required), ("b", InputUsage::Required)]);
        let mut pending = PendingInputs::new();

        assert!(!gate.can_run(&mut pending));

        pending.enqueue(token("a", 1));
        assert!(!gate.can_run(&mut pending));

        pending.enqueue(token("b", 1));
        assert!(gate.can_run(&mut pending));
    }

    #[test]
    fn test_init_blocks_until_first_value_even_when_required_present() {
        let mut gate = gate(&[("r", InputUsage::Required), ("i", InputUsage::Init)]);
        let mut pending = PendingInputs::new();

        pending.enqueue(token("r", 1));
        assert!(gate.has_unfilled_init());
        assert!(!gate.can_run(&mut pending));

        gate.record_new_input(&token("i", 42));
        assert!(!gate.has_unfilled_init());
        assert!(gate.can_run(&mut pending));
    }

    #[test]
    fn test_init_value_is_reinjected_per_decision() {
        let mut gate = gate(&[("r", InputUsage::Required), ("i", InputUsage::Init)]);
        let mut pending = PendingInputs::new();

        gate.record_new_input(&token("i", 42));
        pending.enqueue(token("r", 1));

        assert!(gate.can_run(&mut pending));
        assert_eq!(pending.queue_len("i"), 1);

        // the component consumes both; the next satisfied decision re-injects
        // exactly one fresh copy of the cached init value
        pending.take_next("r");
        pending.take_next("i");
        pending.enqueue(token("r", 2));
        assert!(gate.can_run(&mut pending));
        assert_eq!(pending.queue_len("i"), 1);
        assert_eq!(
            pending.front("i").unwrap().value(),
            Some(&ChannelValue::Integer(42))
        );
    }

    #[test]
    fn test_init_queue_never_accumulates() {
        let mut gate = gate(&[("r", InputUsage::Required), ("i", InputUsage::Init)]);
        let mut pending = PendingInputs::new();

        gate.record_new_input(&token("i", 1));
        pending.enqueue(token("i", 1));
        pending.enqueue(token("i", 2));
        gate.record_new_input(&token("i", 2));
        pending.enqueue(token("r", 1));

        assert!(gate.can_run(&mut pending));
        // stale queue content replaced by a single clone of the latest value
        assert_eq!(pending.queue_len("i"), 1);
        assert_eq!(
            pending.front("i").unwrap().value(),
            Some(&ChannelValue::Integer(2))
        );
    }

    #[test]
    fn test_optional_never_blocks() {
        let mut gate = gate(&[("r", InputUsage::Required), ("o", InputUsage::Optional)]);
        let mut pending = PendingInputs::new();

        pending.enqueue(token("r", 1));
        assert!(gate.can_run(&mut pending));

        // once a value arrived it is re-injected like an init value
        gate.record_new_input(&token("o", 7));
        pending.take_next("r");
        pending.enqueue(token("r", 2));
        assert!(gate.can_run(&mut pending));
        assert_eq!(pending.queue_len("o"), 1);
    }

    #[test]
    fn test_count_recorded_even_on_negative_decision() {
        let mut gate = gate(&[("a", InputUsage::Required), ("b", InputUsage::Required)]);
        let mut pending = PendingInputs::new();

        pending.enqueue(token("a", 1));
        assert!(!gate.can_run(&mut pending));
        // nothing was consumed since the (false) decision
        assert!(gate.check_consumption(&pending).is_err());
    }

    #[test]
    fn test_consumption_invariant() {
        let mut gate = gate(&[("a", InputUsage::Required)]);
        let mut pending = PendingInputs::new();

        pending.enqueue(token("a", 1));
        assert!(gate.can_run(&mut pending));

        // a run step that did not drain any queue is a developer error
        let err = gate.check_consumption(&pending).unwrap_err();
        assert_eq!(
            err,
            ComponentError::DeveloperError("run_step did not consume inputs".to_string())
        );

        pending.take_next("a");
        assert!(gate.check_consumption(&pending).is_ok());
    }

    #[test]
    fn test_record_ignores_untracked_inputs() {
        let mut gate = gate(&[("a", InputUsage::Required)]);
        gate.record_new_input(&token("a", 1));
        assert!(!gate.has_unfilled_init());
        assert!(gate.usage("a") == InputUsage::Required);
    }
}
