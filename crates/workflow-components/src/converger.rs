//! Converger Component
//!
//! Iterative convergence check: compares each arriving `value` against the
//! previous one and finishes once the difference drops below the configured
//! epsilon. The epsilon arrives on an init-usage input, so it is supplied
//! once and re-seen on every run, while fresh values keep driving the
//! iteration (configure once, iterate many times).

use calyx_component_model::{
    component::Result, ChannelType, ChannelValue, Component, ComponentError,
    ComponentInstanceInformation, DeclarativeComponentDescription, Input, Output, PendingInputs,
    METADATA_KEY_INPUT_USAGE,
};
use workflow_engine::ComponentRegistration;

/// Identifier of the converger component
pub const CONVERGER_COMPONENT_ID: &str = "calyx.components.converger";

#[derive(Default)]
pub struct ConvergerComponent {
    previous: Option<f64>,
    value_output: Option<Output>,
    converged_output: Option<Output>,
}

impl ConvergerComponent {
    pub fn describe() -> DeclarativeComponentDescription {
        DeclarativeComponentDescription::new(CONVERGER_COMPONENT_ID, "Converger", "Data Flow", "1.0")
            .with_input("value", ChannelType::Real)
            .with_input("epsilon", ChannelType::Real)
            .with_input_meta("epsilon", METADATA_KEY_INPUT_USAGE, serde_json::json!("init"))
            .with_output("value", ChannelType::Real)
            .with_output("converged", ChannelType::Real)
    }
}

fn real_value(input: Option<Input>, name: &str) -> Result<f64> {
    match input.as_ref().and_then(Input::value) {
        Some(ChannelValue::Real(value)) => Ok(*value),
        Some(ChannelValue::Integer(value)) => Ok(*value as f64),
        _ => Err(ComponentError::fatal(format!(
            "input '{}' did not carry a real value",
            name
        ))),
    }
}

impl Component for ConvergerComponent {
    fn on_prepare(&mut self, info: &ComponentInstanceInformation) -> Result<()> {
        self.value_output = info.output("value").cloned();
        self.converged_output = info.output("converged").cloned();
        Ok(())
    }

    fn run_step(&mut self, _new_input: Option<&Input>, pending: &mut PendingInputs) -> Result<bool> {
        let value = real_value(pending.take_next("value"), "value")?;
        let epsilon = real_value(pending.take_next("epsilon"), "epsilon")?;

        let converged = self
            .previous
            .map(|previous| (value - previous).abs() <= epsilon)
            .unwrap_or(false);

        if converged {
            log::debug!("converged at {} (epsilon {})", value, epsilon);
            if let Some(output) = &self.converged_output {
                output.write(ChannelValue::Real(value));
            }
            return Ok(false);
        }

        self.previous = Some(value);
        if let Some(output) = &self.value_output {
            output.write(ChannelValue::Real(value));
        }
        Ok(true)
    }
}

inventory::submit! {
    ComponentRegistration {
        describe: ConvergerComponent::describe,
        create: || Box::new(ConvergerComponent::default()),
    }
}
