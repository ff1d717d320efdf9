//! Component resolution: the typed local registry and its distributed face
//!
//! The local [`ComponentRegistry`] maps component identifiers to declarative
//! descriptions and constructor functions, replacing runtime class loading
//! with a capability table resolved at startup. Built-in components announce
//! themselves through link-time [`ComponentRegistration`] entries.
//!
//! The distributed collaborators are injected explicitly; the
//! `Unavailable*` null objects stand in where no service was wired and fail
//! fast on every call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use calyx_component_model::{
    Component, ComponentDescription, ComponentError, ComponentInstanceDescriptor,
    DeclarativeComponentDescription, PlatformIdentifier,
};

use crate::error::{EngineError, Result};

/// Constructor function of a component implementation
pub type ComponentFactory = fn() -> Box<dyn Component>;

/// Link-time registration of a built-in component
///
/// Collected via `inventory`; [`ComponentRegistry::with_builtins`] resolves
/// all collected entries into a typed registry at startup.
pub struct ComponentRegistration {
    pub describe: fn() -> DeclarativeComponentDescription,
    pub create: ComponentFactory,
}

inventory::collect!(ComponentRegistration);

struct RegistryEntry {
    description: Arc<DeclarativeComponentDescription>,
    factory: ComponentFactory,
}

/// Registry of installed components on this platform
///
/// Maps component identifiers to their declarative descriptions and
/// constructor functions.
pub struct ComponentRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding all link-time registered built-ins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ComponentRegistration> {
            registry.register((registration.describe)(), registration.create);
        }
        registry
    }

    /// Register a component
    pub fn register(&mut self, description: DeclarativeComponentDescription, factory: ComponentFactory) {
        self.entries.insert(
            description.identifier().to_string(),
            RegistryEntry {
                description: Arc::new(description),
                factory,
            },
        );
    }

    /// Whether a component with the given identifier is installed
    pub fn has_component(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// The declarative description of the given component
    pub fn description(&self, identifier: &str) -> Option<&DeclarativeComponentDescription> {
        self.entries.get(identifier).map(|entry| entry.description.as_ref())
    }

    /// Shared handle to the declarative description of the given component
    pub fn description_arc(&self, identifier: &str) -> Option<Arc<DeclarativeComponentDescription>> {
        self.entries.get(identifier).map(|entry| Arc::clone(&entry.description))
    }

    /// All installed declarative descriptions
    pub fn descriptions(&self) -> Vec<&DeclarativeComponentDescription> {
        self.entries.values().map(|entry| entry.description.as_ref()).collect()
    }

    /// Construct a fresh implementation instance of the given component
    pub fn create(&self, identifier: &str) -> Result<Box<dyn Component>> {
        let entry = self.entries.get(identifier).ok_or_else(|| {
            EngineError::Component(ComponentError::Instantiation(identifier.to_string()))
        })?;
        Ok((entry.factory)())
    }

    /// Merge another registry into this one; entries of `other` win on
    /// identifier collisions
    pub fn merge(&mut self, other: ComponentRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Identification of the platform this engine instance runs on
pub trait PlatformService: Send + Sync {
    fn platform_identifier(&self) -> PlatformIdentifier;
}

/// Platform service backed by a fixed local identifier
pub struct LocalPlatformService {
    identifier: PlatformIdentifier,
}

impl LocalPlatformService {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            identifier: PlatformIdentifier::new(node_id),
        }
    }
}

impl PlatformService for LocalPlatformService {
    fn platform_identifier(&self) -> PlatformIdentifier {
        self.identifier.clone()
    }
}

/// Component registry spanning all reachable platforms
///
/// Every call is potentially remote and potentially failing; failures
/// surface as [`EngineError`] values rather than panics.
#[async_trait]
pub trait DistributedComponentRegistry: Send + Sync {
    /// All component descriptions known across the distributed system;
    /// `force_refresh` bypasses any cache
    async fn all_component_descriptions(&self, force_refresh: bool) -> Result<Vec<ComponentDescription>>;

    /// Record a new component instance on the platform owning the component
    async fn create_component_instance(
        &self,
        description: &ComponentDescription,
        name: &str,
        workflow_id: &str,
        platform: Option<&PlatformIdentifier>,
    ) -> Result<ComponentInstanceDescriptor>;

    /// Release a component instance previously created
    async fn dispose_component_instance(
        &self,
        instance_id: &str,
        platform: Option<&PlatformIdentifier>,
    ) -> Result<()>;
}

/// Local, in-process implementation of [`DistributedComponentRegistry`]
///
/// Serves descriptions of the local [`ComponentRegistry`] stamped with the
/// local platform identifier and keeps descriptor-level bookkeeping of
/// created instances.
pub struct LocalDistributedComponentRegistry {
    registry: Arc<ComponentRegistry>,
    platform: Arc<dyn PlatformService>,
    instances: std::sync::Mutex<HashMap<String, ComponentInstanceDescriptor>>,
}

impl LocalDistributedComponentRegistry {
    pub fn new(registry: Arc<ComponentRegistry>, platform: Arc<dyn PlatformService>) -> Self {
        Self {
            registry,
            platform,
            instances: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Number of instances currently recorded
    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}

#[async_trait]
impl DistributedComponentRegistry for LocalDistributedComponentRegistry {
    async fn all_component_descriptions(&self, _force_refresh: bool) -> Result<Vec<ComponentDescription>> {
        let platform = self.platform.platform_identifier();
        let mut descriptions = Vec::new();
        for identifier in self.registry.entries.keys() {
            if let Some(declarative) = self.registry.description_arc(identifier) {
                let mut description = ComponentDescription::new(declarative);
                description.set_platform(Some(platform.clone()));
                descriptions.push(description);
            }
        }
        Ok(descriptions)
    }

    async fn create_component_instance(
        &self,
        description: &ComponentDescription,
        name: &str,
        workflow_id: &str,
        platform: Option<&PlatformIdentifier>,
    ) -> Result<ComponentInstanceDescriptor> {
        if !self.registry.has_component(description.identifier()) {
            return Err(EngineError::UnknownComponent(description.identifier().to_string()));
        }
        let descriptor = ComponentInstanceDescriptor {
            identifier: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            platform: platform.cloned().or_else(|| Some(self.platform.platform_identifier())),
            working_directory: std::env::temp_dir().join(format!("component-{}", workflow_id)),
            component_identifier: description.identifier().to_string(),
            workflow_context_name: workflow_id.to_string(),
            involved_platforms: vec![self.platform.platform_identifier()],
        };
        self.instances
            .lock()
            .unwrap()
            .insert(descriptor.identifier.clone(), descriptor.clone());
        Ok(descriptor)
    }

    async fn dispose_component_instance(
        &self,
        instance_id: &str,
        _platform: Option<&PlatformIdentifier>,
    ) -> Result<()> {
        self.instances.lock().unwrap().remove(instance_id);
        Ok(())
    }
}

/// Null object standing in while no distributed component registry is wired
///
/// Every call fails fast with a service-unavailable error instead of
/// silently rebinding.
pub struct UnavailableDistributedComponentRegistry;

#[async_trait]
impl DistributedComponentRegistry for UnavailableDistributedComponentRegistry {
    async fn all_component_descriptions(&self, _force_refresh: bool) -> Result<Vec<ComponentDescription>> {
        Err(EngineError::ServiceUnavailable(
            "distributed component registry".to_string(),
        ))
    }

    async fn create_component_instance(
        &self,
        _description: &ComponentDescription,
        _name: &str,
        _workflow_id: &str,
        _platform: Option<&PlatformIdentifier>,
    ) -> Result<ComponentInstanceDescriptor> {
        Err(EngineError::ServiceUnavailable(
            "distributed component registry".to_string(),
        ))
    }

    async fn dispose_component_instance(
        &self,
        _instance_id: &str,
        _platform: Option<&PlatformIdentifier>,
    ) -> Result<()> {
        Err(EngineError::ServiceUnavailable(
            "distributed component registry".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyx_component_model::ChannelType;

    #[derive(Default)]
    struct NoopComponent;

    impl Component for NoopComponent {}

    fn declarative(identifier: &str) -> DeclarativeComponentDescription {
        DeclarativeComponentDescription::new(identifier, "Noop", "Test", "1.0")
            .with_output("out", ChannelType::Text)
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ComponentRegistry::new();
        registry.register(declarative("test.noop"), || Box::new(NoopComponent));

        assert!(registry.has_component("test.noop"));
        assert!(!registry.has_component("test.other"));
        assert!(registry.create("test.noop").is_ok());
        assert_eq!(registry.descriptions().len(), 1);
        assert_eq!(registry.description("test.noop").unwrap().name(), "Noop");
    }

    #[test]
    fn test_create_unknown_component() {
        let registry = ComponentRegistry::new();
        let result = registry.create("test.missing");
        assert!(matches!(
            result,
            Err(EngineError::Component(ComponentError::Instantiation(_)))
        ));
    }

    #[test]
    fn test_merge_overrides() {
        let mut first = ComponentRegistry::new();
        first.register(declarative("test.noop"), || Box::new(NoopComponent));

        let mut second = ComponentRegistry::new();
        second.register(
            DeclarativeComponentDescription::new("test.noop", "Replacement", "Test", "2.0"),
            || Box::new(NoopComponent),
        );
        first.merge(second);

        assert_eq!(first.descriptions().len(), 1);
        assert_eq!(first.description("test.noop").unwrap().name(), "Replacement");
    }

    #[tokio::test]
    async fn test_local_distributed_registry_stamps_platform() {
        let mut registry = ComponentRegistry::new();
        registry.register(declarative("test.noop"), || Box::new(NoopComponent));

        let distributed = LocalDistributedComponentRegistry::new(
            Arc::new(registry),
            Arc::new(LocalPlatformService::new("node-a")),
        );
        let descriptions = distributed.all_component_descriptions(false).await.unwrap();
        assert_eq!(descriptions.len(), 1);
        assert_eq!(
            descriptions[0].platform().map(|p| p.node_id()),
            Some("node-a")
        );
    }

    #[tokio::test]
    async fn test_local_distributed_registry_instance_bookkeeping() {
        let mut registry = ComponentRegistry::new();
        registry.register(declarative("test.noop"), || Box::new(NoopComponent));

        let distributed = LocalDistributedComponentRegistry::new(
            Arc::new(registry),
            Arc::new(LocalPlatformService::new("node-a")),
        );
        let description = ComponentDescription::new(
            distributed.registry.description_arc("test.noop").unwrap(),
        );
        let descriptor = distributed
            .create_component_instance(&description, "Noop 1", "wf-1", None)
            .await
            .unwrap();
        assert_eq!(distributed.instance_count(), 1);

        distributed
            .dispose_component_instance(&descriptor.identifier, None)
            .await
            .unwrap();
        assert_eq!(distributed.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_registry_fails_fast() {
        let registry = UnavailableDistributedComponentRegistry;
        assert!(matches!(
            registry.all_component_descriptions(false).await,
            Err(EngineError::ServiceUnavailable(_))
        ));
    }
}
