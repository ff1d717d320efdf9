//! Calyx Built-in Components
//!
//! Component implementations shipped with the platform. Each component lives
//! in its own module and announces itself through a link-time
//! [`workflow_engine::ComponentRegistration`], so
//! `ComponentRegistry::with_builtins()` picks all of them up.
//!
//! - **value_source**: emits one configured value and finishes
//! - **merger**: forwards every arriving input to a single output
//! - **converger**: iterates until consecutive values converge
//! - **script**: the script-execution stand-in (inputs pass through)

pub mod converger;
pub mod merger;
pub mod script;
pub mod value_source;

pub use converger::ConvergerComponent;
pub use merger::MergerComponent;
pub use script::ScriptComponent;
pub use value_source::ValueSourceComponent;

#[cfg(test)]
mod tests {
    use workflow_engine::ComponentRegistry;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = ComponentRegistry::with_builtins();
        assert_eq!(registry.descriptions().len(), 4, "Expected 4 built-in components");

        assert!(registry.has_component(crate::value_source::VALUE_SOURCE_COMPONENT_ID));
        assert!(registry.has_component(crate::merger::MERGER_COMPONENT_ID));
        assert!(registry.has_component(crate::converger::CONVERGER_COMPONENT_ID));
        assert!(registry.has_component(crate::script::SCRIPT_COMPONENT_ID));
    }

    #[test]
    fn test_script_id_matches_migration_target() {
        assert_eq!(
            crate::script::SCRIPT_COMPONENT_ID,
            workflow_engine::migration::SCRIPT_COMPONENT_ID
        );
    }
}
