//! Workflow instance management across platforms
//!
//! [`DistributedWorkflowRegistry`] is the potentially-remote collaborator
//! creating and controlling workflow instances; [`LocalWorkflowRegistry`] is
//! its in-process implementation. [`SimpleWorkflowRegistry`] is the thin
//! facade the front ends use; it acts on the registry's cache unless a
//! refresh is forced.
//!
//! Failure contracts are deliberately asymmetric and preserved per API:
//! creating an instance for an unreachable target platform is a soft `None`,
//! while querying the state of a workflow that cannot be reached is a hard
//! [`EngineError::RemoteFailure`] ("could not even ask").

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use calyx_component_model::PlatformIdentifier;

use crate::error::{EngineError, Result};
use crate::events::EventSink;
use crate::graph::WorkflowDescription;
use crate::registry::{ComponentRegistry, PlatformService};
use crate::state::WorkflowState;
use crate::workflow::{Workflow, WorkflowInformation};

/// Workflow registry spanning all reachable platforms
#[async_trait]
pub trait DistributedWorkflowRegistry: Send + Sync {
    /// Create a new workflow instance
    ///
    /// Returns `Ok(None)` when no instance can be created for the given
    /// target platform; this soft failure is part of the contract and
    /// distinct from the hard failures of the control calls.
    async fn create_workflow_instance(
        &self,
        description: &WorkflowDescription,
        name: &str,
        configuration: BTreeMap<String, serde_json::Value>,
        target_platform: Option<&PlatformIdentifier>,
    ) -> Result<Option<WorkflowInformation>>;

    /// All known workflow instances; `force_refresh` bypasses the cache
    async fn all_workflow_informations(&self, force_refresh: bool) -> Result<Vec<WorkflowInformation>>;

    /// Release a workflow instance
    async fn dispose_workflow_instance(
        &self,
        instance_id: &str,
        platform: Option<&PlatformIdentifier>,
    ) -> Result<()>;

    async fn start_workflow(&self, instance_id: &str) -> Result<()>;

    async fn pause_workflow(&self, instance_id: &str) -> Result<()>;

    async fn resume_workflow(&self, instance_id: &str) -> Result<()>;

    async fn cancel_workflow(&self, instance_id: &str) -> Result<()>;

    async fn workflow_state(&self, instance_id: &str) -> Result<WorkflowState>;
}

/// In-process implementation of [`DistributedWorkflowRegistry`]
///
/// Owns the running [`Workflow`] instances of the local platform.
pub struct LocalWorkflowRegistry {
    component_registry: Arc<ComponentRegistry>,
    platform: Arc<dyn PlatformService>,
    event_sink: Arc<dyn EventSink>,
    work_root: PathBuf,
    workflows: tokio::sync::Mutex<BTreeMap<String, Workflow>>,
    cache: std::sync::Mutex<Vec<WorkflowInformation>>,
}

impl LocalWorkflowRegistry {
    pub fn new(
        component_registry: Arc<ComponentRegistry>,
        platform: Arc<dyn PlatformService>,
        event_sink: Arc<dyn EventSink>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            component_registry,
            platform,
            event_sink,
            work_root,
            workflows: tokio::sync::Mutex::new(BTreeMap::new()),
            cache: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn unknown_instance(instance_id: &str) -> EngineError {
        EngineError::RemoteFailure(format!("workflow instance {} not reachable", instance_id))
    }
}

#[async_trait]
impl DistributedWorkflowRegistry for LocalWorkflowRegistry {
    async fn create_workflow_instance(
        &self,
        description: &WorkflowDescription,
        name: &str,
        _configuration: BTreeMap<String, serde_json::Value>,
        target_platform: Option<&PlatformIdentifier>,
    ) -> Result<Option<WorkflowInformation>> {
        let local = self.platform.platform_identifier();
        if let Some(target) = target_platform {
            if *target != local {
                // not our platform; deliberately a soft failure
                return Ok(None);
            }
        }

        let information = WorkflowInformation {
            identifier: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.deep_copy(),
            controller_platform: Some(local),
        };

        let mut workflow = Workflow::new(information.clone(), Arc::clone(&self.event_sink));
        workflow.initialize(&self.component_registry, &self.work_root)?;

        self.workflows
            .lock()
            .await
            .insert(information.identifier.clone(), workflow);
        self.cache.lock().unwrap().push(information.clone());
        Ok(Some(information))
    }

    async fn all_workflow_informations(&self, force_refresh: bool) -> Result<Vec<WorkflowInformation>> {
        if force_refresh {
            let workflows = self.workflows.lock().await;
            let refreshed: Vec<WorkflowInformation> = workflows
                .values()
                .map(|workflow| workflow.information().clone())
                .collect();
            *self.cache.lock().unwrap() = refreshed;
        }
        Ok(self.cache.lock().unwrap().clone())
    }

    async fn dispose_workflow_instance(
        &self,
        instance_id: &str,
        _platform: Option<&PlatformIdentifier>,
    ) -> Result<()> {
        let mut workflows = self.workflows.lock().await;
        let Some(mut workflow) = workflows.remove(instance_id) else {
            return Err(Self::unknown_instance(instance_id));
        };
        // a still-active instance is canceled before disposal
        if !matches!(
            workflow.state(),
            WorkflowState::Finished | WorkflowState::Canceled | WorkflowState::Failed
        ) {
            workflow.cancel().await;
        }
        workflow.dispose().await?;
        self.cache
            .lock()
            .unwrap()
            .retain(|information| information.identifier != instance_id);
        Ok(())
    }

    async fn start_workflow(&self, instance_id: &str) -> Result<()> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .get_mut(instance_id)
            .ok_or_else(|| Self::unknown_instance(instance_id))?;
        workflow.start().await
    }

    async fn pause_workflow(&self, instance_id: &str) -> Result<()> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .get_mut(instance_id)
            .ok_or_else(|| Self::unknown_instance(instance_id))?;
        workflow.pause().await
    }

    async fn resume_workflow(&self, instance_id: &str) -> Result<()> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .get_mut(instance_id)
            .ok_or_else(|| Self::unknown_instance(instance_id))?;
        workflow.resume().await
    }

    async fn cancel_workflow(&self, instance_id: &str) -> Result<()> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .get_mut(instance_id)
            .ok_or_else(|| Self::unknown_instance(instance_id))?;
        workflow.cancel().await;
        Ok(())
    }

    async fn workflow_state(&self, instance_id: &str) -> Result<WorkflowState> {
        let workflows = self.workflows.lock().await;
        let workflow = workflows
            .get(instance_id)
            .ok_or_else(|| Self::unknown_instance(instance_id))?;
        Ok(workflow.state())
    }
}

/// Null object standing in while no distributed workflow registry is wired
pub struct UnavailableDistributedWorkflowRegistry;

#[async_trait]
impl DistributedWorkflowRegistry for UnavailableDistributedWorkflowRegistry {
    async fn create_workflow_instance(
        &self,
        _description: &WorkflowDescription,
        _name: &str,
        _configuration: BTreeMap<String, serde_json::Value>,
        _target_platform: Option<&PlatformIdentifier>,
    ) -> Result<Option<WorkflowInformation>> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn all_workflow_informations(&self, _force_refresh: bool) -> Result<Vec<WorkflowInformation>> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn dispose_workflow_instance(
        &self,
        _instance_id: &str,
        _platform: Option<&PlatformIdentifier>,
    ) -> Result<()> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn start_workflow(&self, _instance_id: &str) -> Result<()> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn pause_workflow(&self, _instance_id: &str) -> Result<()> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn resume_workflow(&self, _instance_id: &str) -> Result<()> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn cancel_workflow(&self, _instance_id: &str) -> Result<()> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }

    async fn workflow_state(&self, _instance_id: &str) -> Result<WorkflowState> {
        Err(EngineError::ServiceUnavailable("distributed workflow registry".to_string()))
    }
}

/// Facade providing access to all workflows within the distributed system
///
/// Lookups act on the registry's cache and have soft `None` contracts;
/// control calls surface transport failures as
/// [`EngineError::RemoteFailure`], letting callers distinguish "the workflow
/// said no" from "could not even ask".
pub struct SimpleWorkflowRegistry {
    registry: Arc<dyn DistributedWorkflowRegistry>,
}

impl SimpleWorkflowRegistry {
    pub fn new(registry: Arc<dyn DistributedWorkflowRegistry>) -> Self {
        Self { registry }
    }

    /// All known workflow instances
    pub async fn all_workflow_informations(&self, force_refresh: bool) -> Result<Vec<WorkflowInformation>> {
        self.registry.all_workflow_informations(force_refresh).await
    }

    /// The information of one workflow instance, or `None` if it does not
    /// exist (or the registry cannot be reached; lookups stay soft)
    pub async fn workflow_information(
        &self,
        instance_id: &str,
        force_refresh: bool,
    ) -> Option<WorkflowInformation> {
        match self.registry.all_workflow_informations(force_refresh).await {
            Ok(informations) => informations
                .into_iter()
                .find(|information| information.identifier == instance_id),
            Err(error) => {
                log::warn!("workflow information lookup failed: {}", error);
                None
            }
        }
    }

    /// Create a new workflow instance; `None` when no matching instance can
    /// be created for the description's target platform
    pub async fn create_workflow_instance(
        &self,
        description: &WorkflowDescription,
        name: &str,
        configuration: BTreeMap<String, serde_json::Value>,
    ) -> Option<WorkflowInformation> {
        match self
            .registry
            .create_workflow_instance(description, name, configuration, description.target_platform())
            .await
        {
            Ok(information) => information,
            Err(error) => {
                log::warn!("creating workflow instance failed: {}", error);
                None
            }
        }
    }

    fn remote_failure(operation: &str, error: EngineError) -> EngineError {
        EngineError::RemoteFailure(format!("failed to {} remote workflow: {}", operation, error))
    }

    /// Start a workflow
    pub async fn start_workflow(&self, information: &WorkflowInformation) -> Result<()> {
        self.registry
            .start_workflow(&information.identifier)
            .await
            .map_err(|error| Self::remote_failure("start", error))
    }

    /// Pause a workflow
    pub async fn pause_workflow(&self, information: &WorkflowInformation) -> Result<()> {
        self.registry
            .pause_workflow(&information.identifier)
            .await
            .map_err(|error| Self::remote_failure("pause", error))
    }

    /// Resume a workflow
    pub async fn resume_workflow(&self, information: &WorkflowInformation) -> Result<()> {
        self.registry
            .resume_workflow(&information.identifier)
            .await
            .map_err(|error| Self::remote_failure("resume", error))
    }

    /// Cancel a workflow
    pub async fn cancel_workflow(&self, information: &WorkflowInformation) -> Result<()> {
        self.registry
            .cancel_workflow(&information.identifier)
            .await
            .map_err(|error| Self::remote_failure("cancel", error))
    }

    /// Dispose a workflow and release its instance
    pub async fn dispose_workflow(&self, information: &WorkflowInformation) -> Result<()> {
        self.registry
            .dispose_workflow_instance(&information.identifier, information.controller_platform.as_ref())
            .await
            .map_err(|error| Self::remote_failure("dispose", error))
    }

    /// The state of a workflow
    ///
    /// A transport failure is a hard error here, unlike the soft lookups.
    pub async fn state_of_workflow(&self, information: &WorkflowInformation) -> Result<WorkflowState> {
        self.registry
            .workflow_state(&information.identifier)
            .await
            .map_err(|error| Self::remote_failure("get state of", error))
    }

    /// Whether any workflow instance is in an active state
    pub async fn has_active_workflows(&self) -> Result<bool> {
        for information in self.registry.all_workflow_informations(false).await? {
            if self
                .registry
                .workflow_state(&information.identifier)
                .await?
                .is_active()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Cancel every workflow instance in an active state
    pub async fn cancel_active_workflows(&self) -> Result<()> {
        for information in self.registry.all_workflow_informations(false).await? {
            if self
                .registry
                .workflow_state(&information.identifier)
                .await?
                .is_active()
            {
                self.cancel_workflow(&information).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::graph::WorkflowNode;
    use crate::registry::LocalPlatformService;
    use calyx_component_model::{
        ChannelValue, Component, ComponentDescription, ComponentInstanceInformation,
        DeclarativeComponentDescription, Output,
    };

    #[derive(Default)]
    struct OneValueSource {
        output: Option<Output>,
    }

    impl Component for OneValueSource {
        fn on_prepare(
            &mut self,
            info: &ComponentInstanceInformation,
        ) -> calyx_component_model::component::Result<()> {
            self.output = info.output("out").cloned();
            Ok(())
        }

        fn run_initial(&mut self, _inputs_connected: bool) -> calyx_component_model::component::Result<bool> {
            if let Some(output) = &self.output {
                output.write(ChannelValue::Text("done".to_string()));
            }
            Ok(false)
        }
    }

    fn component_registry() -> Arc<ComponentRegistry> {
        let mut registry = ComponentRegistry::new();
        registry.register(
            DeclarativeComponentDescription::new("test.one-value", "One Value", "Test", "1.0")
                .with_output("out", calyx_component_model::ChannelType::Text),
            || Box::new(OneValueSource::default()),
        );
        Arc::new(registry)
    }

    fn local_registry() -> Arc<LocalWorkflowRegistry> {
        Arc::new(LocalWorkflowRegistry::new(
            component_registry(),
            Arc::new(LocalPlatformService::new("local-node")),
            Arc::new(NullEventSink),
            std::env::temp_dir().join("calyx-registry-tests"),
        ))
    }

    fn single_node_description(identifier: &str) -> WorkflowDescription {
        let mut wd = WorkflowDescription::new(identifier);
        let declarative = DeclarativeComponentDescription::new("test.one-value", "One Value", "Test", "1.0")
            .with_output("out", calyx_component_model::ChannelType::Text);
        wd.add_workflow_node(WorkflowNode::with_identifier(
            "n1",
            ComponentDescription::new(Arc::new(declarative)),
        ));
        wd
    }

    #[tokio::test]
    async fn test_create_for_foreign_platform_returns_none() {
        let registry = SimpleWorkflowRegistry::new(local_registry());
        let mut description = single_node_description("wf-1");
        description.set_target_platform(Some(PlatformIdentifier::new("some-other-node")));

        let created = registry
            .create_workflow_instance(&description, "Run 1", BTreeMap::new())
            .await;
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_create_run_and_state() {
        let registry = SimpleWorkflowRegistry::new(local_registry());
        let description = single_node_description("wf-1");

        let information = registry
            .create_workflow_instance(&description, "Run 1", BTreeMap::new())
            .await
            .expect("local instance should be created");

        assert_eq!(
            registry.state_of_workflow(&information).await.unwrap(),
            WorkflowState::Ready
        );

        registry.start_workflow(&information).await.unwrap();
        // the single source finishes immediately after its initial run
        for _ in 0..100 {
            if registry.state_of_workflow(&information).await.unwrap() == WorkflowState::Finished {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(
            registry.state_of_workflow(&information).await.unwrap(),
            WorkflowState::Finished
        );
        assert!(!registry.has_active_workflows().await.unwrap());

        registry.dispose_workflow(&information).await.unwrap();
        assert!(registry.workflow_information(&information.identifier, true).await.is_none());
    }

    #[tokio::test]
    async fn test_state_of_unknown_workflow_is_hard_failure() {
        let registry = SimpleWorkflowRegistry::new(local_registry());
        let information = WorkflowInformation {
            identifier: "missing".to_string(),
            name: "Missing".to_string(),
            description: WorkflowDescription::new("missing"),
            controller_platform: None,
        };

        let result = registry.state_of_workflow(&information).await;
        assert!(matches!(result, Err(EngineError::RemoteFailure(_))));
    }

    #[tokio::test]
    async fn test_lookup_is_soft_on_absence() {
        let registry = SimpleWorkflowRegistry::new(local_registry());
        assert!(registry.workflow_information("missing", true).await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_sentinel_fails_fast() {
        let registry = SimpleWorkflowRegistry::new(Arc::new(UnavailableDistributedWorkflowRegistry));
        let description = WorkflowDescription::new("wf-1");

        // soft APIs degrade to None, control APIs surface the failure
        assert!(registry
            .create_workflow_instance(&description, "Run", BTreeMap::new())
            .await
            .is_none());
        assert!(registry.all_workflow_informations(false).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_vs_force_refresh() {
        let local = local_registry();
        let registry = SimpleWorkflowRegistry::new(Arc::clone(&local) as Arc<dyn DistributedWorkflowRegistry>);
        let description = single_node_description("wf-1");

        let information = registry
            .create_workflow_instance(&description, "Run 1", BTreeMap::new())
            .await
            .unwrap();

        // drop the instance behind the cache's back
        local
            .dispose_workflow_instance(&information.identifier, None)
            .await
            .unwrap();

        assert!(registry
            .workflow_information(&information.identifier, true)
            .await
            .is_none());
    }
}
