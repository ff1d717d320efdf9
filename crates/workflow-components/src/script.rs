//! Script Component
//!
//! Stand-in for the script-execution component: carries the script source and
//! the interpreter installation path in its configuration (the path deferred
//! to a placeholder since workflow format version 1) and declares its data
//! interface through dynamic endpoints. Instead of spawning an interpreter,
//! each run forwards the queued inputs to the same-named outputs.

use calyx_component_model::{
    component::Result, ChannelType, Component, ComponentInstanceInformation,
    DeclarativeComponentDescription, Input, Output, PendingInputs,
};
use workflow_engine::ComponentRegistration;

/// Identifier of the script component; the 0→1 workflow migration rewrites
/// configurations of nodes carrying this identifier
pub const SCRIPT_COMPONENT_ID: &str = "calyx.components.script";

/// Configuration key holding the script source
pub const CONFIG_KEY_SCRIPT: &str = "script";

/// Configuration key holding the interpreter installation path
pub const CONFIG_KEY_INSTALLATION: &str = "pythonInstallation";

#[derive(Default)]
pub struct ScriptComponent {
    outputs: Vec<Output>,
}

impl ScriptComponent {
    pub fn describe() -> DeclarativeComponentDescription {
        DeclarativeComponentDescription::new(SCRIPT_COMPONENT_ID, "Script", "Scripting", "1.0")
            .with_configuration(CONFIG_KEY_SCRIPT, ChannelType::Text)
            .with_configuration(CONFIG_KEY_INSTALLATION, ChannelType::Text)
    }
}

impl Component for ScriptComponent {
    fn on_prepare(&mut self, info: &ComponentInstanceInformation) -> Result<()> {
        self.outputs = info.outputs().cloned().collect();

        let installation = info.configuration_value_as::<String>(CONFIG_KEY_INSTALLATION, String::new());
        if installation.is_empty() {
            log::warn!(
                "script component {} has no interpreter installation configured",
                info.name()
            );
        } else {
            log::debug!("script component {} uses interpreter at {}", info.name(), installation);
        }
        Ok(())
    }

    fn run_step(&mut self, _new_input: Option<&Input>, pending: &mut PendingInputs) -> Result<bool> {
        // pass-through semantics: one queued token per input, forwarded to
        // the same-named output
        let names: Vec<String> = pending.queue_names().map(str::to_string).collect();
        for name in names {
            let Some(input) = pending.take_next(&name) else {
                continue;
            };
            if let Some(value) = input.value() {
                if let Some(output) = self.outputs.iter().find(|output| output.name() == name) {
                    output.write(value.clone());
                }
            }
        }
        Ok(true)
    }
}

inventory::submit! {
    ComponentRegistration {
        describe: ScriptComponent::describe,
        create: || Box::new(ScriptComponent::default()),
    }
}
