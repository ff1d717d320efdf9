//! Merger Component
//!
//! Forwards every arriving input to its single `merged` output, useful for
//! funneling parallel branches into one stream. Inputs are added dynamically
//! at design time; the merger runs on every arrival instead of waiting for
//! all inputs to hold a value.

use calyx_component_model::{
    component::Result, ChannelType, Component, ComponentInstanceInformation,
    DeclarativeComponentDescription, Input, InputGate, Output, PendingInputs,
};
use workflow_engine::ComponentRegistration;

/// Identifier of the merger component
pub const MERGER_COMPONENT_ID: &str = "calyx.components.merger";

#[derive(Default)]
pub struct MergerComponent {
    output: Option<Output>,
}

impl MergerComponent {
    pub fn describe() -> DeclarativeComponentDescription {
        DeclarativeComponentDescription::new(MERGER_COMPONENT_ID, "Merger", "Data Flow", "1.0")
            .with_output("merged", ChannelType::Json)
    }

    fn forward(&self, input: Input) {
        if let (Some(output), Some(value)) = (&self.output, input.value()) {
            output.write(value.clone());
        }
    }
}

impl Component for MergerComponent {
    fn on_prepare(&mut self, info: &ComponentInstanceInformation) -> Result<()> {
        self.output = info.output("merged").cloned();
        Ok(())
    }

    fn can_run_after_new_input(
        &mut self,
        new_input: &Input,
        gate: &mut InputGate,
        pending: &mut PendingInputs,
    ) -> Result<bool> {
        gate.record_new_input(new_input);
        // record the pre-run count, then run regardless of the other queues
        let _ = gate.can_run(pending);
        Ok(true)
    }

    fn run_step(&mut self, new_input: Option<&Input>, pending: &mut PendingInputs) -> Result<bool> {
        let next = match new_input {
            Some(input) => pending.take_next(&input.name),
            None => {
                let name = pending
                    .queue_names()
                    .find(|name| pending.queue_len(name) > 0)
                    .map(str::to_string);
                name.and_then(|name| pending.take_next(&name))
            }
        };
        if let Some(input) = next {
            self.forward(input);
        }
        Ok(true)
    }

    fn can_run_after_run(
        &mut self,
        _last_input: Option<&Input>,
        gate: &mut InputGate,
        pending: &mut PendingInputs,
    ) -> Result<bool> {
        gate.check_consumption(pending)?;
        let _ = gate.can_run(pending);
        Ok(pending.total_len() > 0)
    }
}

inventory::submit! {
    ComponentRegistration {
        describe: MergerComponent::describe,
        create: || Box::new(MergerComponent::default()),
    }
}
