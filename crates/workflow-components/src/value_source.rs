//! Value Source Component
//!
//! Emits one configured value on its `value` output during the initial run
//! and finishes immediately. The canonical "no inputs" component: it never
//! enters the input-driven part of the lifecycle.

use calyx_component_model::{
    component::Result, ChannelType, ChannelValue, Component, ComponentInstanceInformation,
    DeclarativeComponentDescription, Output,
};
use workflow_engine::ComponentRegistration;

/// Identifier of the value source component
pub const VALUE_SOURCE_COMPONENT_ID: &str = "calyx.components.value-source";

/// Configuration key holding the emitted value
pub const CONFIG_KEY_VALUE: &str = "value";

#[derive(Default)]
pub struct ValueSourceComponent {
    value: Option<serde_json::Value>,
    output: Option<Output>,
}

impl ValueSourceComponent {
    pub fn describe() -> DeclarativeComponentDescription {
        DeclarativeComponentDescription::new(
            VALUE_SOURCE_COMPONENT_ID,
            "Value Source",
            "Data Sources",
            "1.0",
        )
        .with_output("value", ChannelType::Json)
        .with_configuration(CONFIG_KEY_VALUE, ChannelType::Json)
        .with_default_value(CONFIG_KEY_VALUE, serde_json::Value::Null)
    }
}

impl Component for ValueSourceComponent {
    fn on_prepare(&mut self, info: &ComponentInstanceInformation) -> Result<()> {
        self.value = info.configuration_value(CONFIG_KEY_VALUE);
        self.output = info.output("value").cloned();
        Ok(())
    }

    fn run_initial(&mut self, _inputs_connected: bool) -> Result<bool> {
        if let (Some(value), Some(output)) = (self.value.take(), &self.output) {
            output.write(ChannelValue::Json(value));
        } else {
            log::warn!("value source has no value configured, emitting nothing");
        }
        // one fixed emission, nothing input-driven follows
        Ok(false)
    }
}

inventory::submit! {
    ComponentRegistration {
        describe: ValueSourceComponent::describe,
        create: || Box::new(ValueSourceComponent::default()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use calyx_component_model::{
        ComponentDescription, InputFeed, WorkflowContextInformation,
    };

    fn info_with_value(value: serde_json::Value) -> (ComponentInstanceInformation, InputFeed) {
        let mut description = ComponentDescription::new(Arc::new(ValueSourceComponent::describe()));
        description
            .configuration_mut()
            .insert(CONFIG_KEY_VALUE.to_string(), value);
        let output = Output::new("value", ChannelType::Json, "vs-1", "wf-1");
        let (feed, rx) = InputFeed::new();
        output.subscribe("downstream", feed.clone());
        let info = ComponentInstanceInformation::new(
            "vs-1",
            "Value Source",
            "/tmp/vs-1",
            description,
            WorkflowContextInformation {
                identifier: "wf-1".to_string(),
                name: "Test".to_string(),
                involved_platforms: vec![],
            },
            false,
            [output],
        );
        drop(rx);
        (info, feed)
    }

    #[test]
    fn test_emits_configured_value_once_and_finishes() {
        let mut description = ComponentDescription::new(Arc::new(ValueSourceComponent::describe()));
        description
            .configuration_mut()
            .insert(CONFIG_KEY_VALUE.to_string(), serde_json::json!({"answer": 42}));
        let output = Output::new("value", ChannelType::Json, "vs-1", "wf-1");
        let (feed, mut rx) = InputFeed::new();
        output.subscribe("downstream", feed);
        let info = ComponentInstanceInformation::new(
            "vs-1",
            "Value Source",
            "/tmp/vs-1",
            description,
            WorkflowContextInformation {
                identifier: "wf-1".to_string(),
                name: "Test".to_string(),
                involved_platforms: vec![],
            },
            false,
            [output],
        );

        let mut component = ValueSourceComponent::default();
        component.on_prepare(&info).unwrap();
        assert!(!component.run_initial(false).unwrap());

        let emitted = rx.try_recv().unwrap();
        assert_eq!(
            emitted.value(),
            Some(&ChannelValue::Json(serde_json::json!({"answer": 42})))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_missing_value_emits_nothing() {
        let (info, _feed) = info_with_value(serde_json::Value::Null);
        let mut component = ValueSourceComponent::default();
        component.on_prepare(&info).unwrap();
        // null counts as a configured value; the component still finishes
        assert!(!component.run_initial(false).unwrap());
    }
}
