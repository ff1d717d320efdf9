//! Per-instance orchestration: one workflow, many controllers
//!
//! A [`Workflow`] builds one [`ComponentController`] per node of its
//! description, wires the connections into endpoint subscriptions, and fans
//! lifecycle operations out across all controllers. A monitor task watches
//! the controllers: the workflow finishes when every controller reached a
//! finished state, and fails (canceling the remaining controllers) as soon
//! as any controller fails.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use calyx_component_model::PlatformIdentifier;

use crate::controller::{ComponentController, InitializeRequest, InputSubscription};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::graph::WorkflowDescription;
use crate::registry::ComponentRegistry;
use crate::state::{ComponentState, WorkflowState};

/// Identification of one workflow instance
pub struct WorkflowInformation {
    pub identifier: String,
    pub name: String,
    pub description: WorkflowDescription,
    pub controller_platform: Option<PlatformIdentifier>,
}

impl Clone for WorkflowInformation {
    fn clone(&self) -> Self {
        Self {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            description: self.description.deep_copy(),
            controller_platform: self.controller_platform.clone(),
        }
    }
}

impl std::fmt::Debug for WorkflowInformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowInformation")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A running workflow instance
pub struct Workflow {
    information: WorkflowInformation,
    controllers: BTreeMap<String, Arc<ComponentController>>,
    state_tx: watch::Sender<WorkflowState>,
    state_rx: watch::Receiver<WorkflowState>,
    event_sink: Arc<dyn EventSink>,
    monitor: Option<JoinHandle<()>>,
}

impl Workflow {
    pub fn new(information: WorkflowInformation, event_sink: Arc<dyn EventSink>) -> Self {
        let (state_tx, state_rx) = watch::channel(WorkflowState::Init);
        Self {
            information,
            controllers: BTreeMap::new(),
            state_tx,
            state_rx,
            event_sink,
            monitor: None,
        }
    }

    pub fn information(&self) -> &WorkflowInformation {
        &self.information
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkflowState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle state changes
    pub fn state_watch(&self) -> watch::Receiver<WorkflowState> {
        self.state_rx.clone()
    }

    /// Publish a state change; a failure state is kept even when later
    /// transitions (e.g. the cancellation following it) come through
    fn set_state(&self, state: WorkflowState) {
        Self::publish_state(&self.state_tx, &self.event_sink, &self.information.identifier, state);
    }

    fn publish_state(
        state_tx: &watch::Sender<WorkflowState>,
        event_sink: &Arc<dyn EventSink>,
        workflow_id: &str,
        state: WorkflowState,
    ) {
        if *state_tx.borrow() == WorkflowState::Failed {
            return;
        }
        state_tx.send_replace(state);
        let _ = event_sink.send(EngineEvent::WorkflowStateChanged {
            workflow_id: workflow_id.to_string(),
            state,
        });
    }

    /// State of one component instance, or `None` if the instance does not
    /// belong to this workflow
    pub fn state_of_component(&self, instance_id: &str) -> Option<ComponentState> {
        self.controllers
            .values()
            .find(|controller| controller.instance_descriptor().identifier == instance_id)
            .map(|controller| controller.state())
    }

    /// Remote-facing descriptors of all component instances
    pub fn component_instance_descriptors(&self) -> Vec<calyx_component_model::ComponentInstanceDescriptor> {
        self.controllers
            .values()
            .map(|controller| controller.instance_descriptor().clone())
            .collect()
    }

    /// The controller of the given node
    pub fn controller_of_node(&self, node_id: &str) -> Option<&Arc<ComponentController>> {
        self.controllers.get(node_id)
    }

    /// Instantiate one controller per node
    pub fn initialize(&mut self, registry: &ComponentRegistry, work_root: &PathBuf) -> Result<()> {
        let connected_targets: BTreeSet<String> = self
            .information
            .description
            .connections()
            .iter()
            .map(|connection| connection.target().to_string())
            .collect();

        let involved_platforms: Vec<PlatformIdentifier> = self
            .information
            .description
            .workflow_nodes()
            .iter()
            .filter_map(|node| node.component_description().platform().cloned())
            .chain(self.information.controller_platform.clone())
            .collect();

        for node in self.information.description.workflow_nodes() {
            let request = InitializeRequest {
                controller_id: format!("{}-{}", self.information.identifier, node.identifier()),
                component_name: node.name().to_string(),
                description: node.component_description().deep_copy(),
                workflow_id: self.information.identifier.clone(),
                workflow_name: self.information.name.clone(),
                involved_platforms: involved_platforms.clone(),
                inputs_connected: connected_targets.contains(node.identifier()),
                working_directory_root: work_root.clone(),
            };
            let controller =
                ComponentController::initialize(request, registry, Arc::clone(&self.event_sink))?;
            self.controllers.insert(node.identifier().to_string(), Arc::new(controller));
        }

        self.set_state(WorkflowState::Ready);
        Ok(())
    }

    /// Prepare and start all controllers, then watch them to completion
    pub async fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != WorkflowState::Ready {
            return Err(EngineError::lifecycle_issue("start", "READY", state));
        }

        self.set_state(WorkflowState::Preparing);

        // group subscriptions by target node
        let mut subscriptions: BTreeMap<String, Vec<InputSubscription>> = BTreeMap::new();
        for connection in self.information.description.connections() {
            let source = self
                .controllers
                .get(connection.source())
                .ok_or_else(|| EngineError::UnknownNode(connection.source().to_string()))?;
            let output = source.output(connection.output()).ok_or_else(|| {
                EngineError::Lifecycle(format!(
                    "connection references unknown output '{}' of node {}",
                    connection.output(),
                    connection.source()
                ))
            })?;
            subscriptions.entry(connection.target().to_string()).or_default().push(
                InputSubscription {
                    source: output,
                    input_name: connection.input().to_string(),
                },
            );
        }

        for (node_id, controller) in &self.controllers {
            let endpoint_mapping = subscriptions.remove(node_id).unwrap_or_default();
            controller.prepare(endpoint_mapping);
        }
        if let Err(error) = self.wait_for_components().await {
            log::error!("executing workflow failed, it will be canceled: {}", error);
            self.cancel().await;
            self.set_state(WorkflowState::Failed);
            return Err(error);
        }

        self.set_state(WorkflowState::Running);
        for controller in self.controllers.values() {
            controller.start();
        }
        if let Err(error) = self.wait_for_components().await {
            log::error!("executing workflow failed, it will be canceled: {}", error);
            self.cancel().await;
            self.set_state(WorkflowState::Failed);
            return Err(error);
        }

        self.spawn_monitor();
        Ok(())
    }

    /// Watch all controllers; finish the workflow when all finished, fail it
    /// (canceling the rest) when any failed
    fn spawn_monitor(&mut self) {
        let controllers: Vec<Arc<ComponentController>> = self.controllers.values().cloned().collect();
        let state_tx = self.state_tx.clone();
        let event_sink = Arc::clone(&self.event_sink);
        let workflow_id = self.information.identifier.clone();

        let handle = tokio::spawn(async move {
            let mut watchers: Vec<watch::Receiver<ComponentState>> =
                controllers.iter().map(|controller| controller.state_watch()).collect();

            loop {
                let states: Vec<ComponentState> =
                    watchers.iter().map(|watcher| *watcher.borrow()).collect();

                if states.iter().any(|state| *state == ComponentState::Failed) {
                    for controller in &controllers {
                        if controller.state() != ComponentState::Failed {
                            controller.cancel();
                        }
                    }
                    for controller in &controllers {
                        let _ = controller.wait_for_lifecycle_phase_finished().await;
                    }
                    Workflow::publish_state(&state_tx, &event_sink, &workflow_id, WorkflowState::Failed);
                    break;
                }

                if states.iter().all(|state| state.is_finished()) {
                    for controller in &controllers {
                        controller.finished();
                    }
                    for controller in &controllers {
                        let _ = controller.wait_for_lifecycle_phase_finished().await;
                    }
                    Workflow::publish_state(&state_tx, &event_sink, &workflow_id, WorkflowState::Finished);
                    break;
                }

                // some controller is still working; wake on the next change
                let changed: Vec<_> = watchers
                    .iter_mut()
                    .map(|watcher| Box::pin(watcher.changed()))
                    .collect();
                let (result, _, _) = select_all(changed).await;
                if result.is_err() {
                    break;
                }
            }
        });
        self.monitor = Some(handle);
    }

    /// Pause all controllers
    pub async fn pause(&mut self) -> Result<()> {
        let state = self.state();
        if state != WorkflowState::Running {
            return Err(EngineError::lifecycle_issue("pause", "RUNNING", state));
        }
        self.set_state(WorkflowState::Pausing);
        for controller in self.controllers.values() {
            controller.pause();
        }
        self.wait_for_components().await?;
        self.set_state(WorkflowState::Paused);
        Ok(())
    }

    /// Resume all controllers
    pub async fn resume(&mut self) -> Result<()> {
        let state = self.state();
        if state != WorkflowState::Paused {
            return Err(EngineError::lifecycle_issue("resume", "PAUSED", state));
        }
        self.set_state(WorkflowState::Resuming);
        for controller in self.controllers.values() {
            controller.resume();
        }
        self.wait_for_components().await?;
        self.set_state(WorkflowState::Running);
        Ok(())
    }

    /// Cancel all controllers
    pub async fn cancel(&mut self) {
        self.set_state(WorkflowState::Canceling);
        for controller in self.controllers.values() {
            controller.cancel();
        }
        if let Err(error) = self.wait_for_components().await {
            log::error!("cancelling workflow failed: {}", error);
            self.set_state(WorkflowState::Failed);
            return;
        }
        self.set_state(WorkflowState::Canceled);
    }

    /// Dispose all controllers; only valid from a terminal state
    pub async fn dispose(&mut self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            WorkflowState::Finished | WorkflowState::Canceled | WorkflowState::Failed
        ) {
            return Err(EngineError::lifecycle_issue(
                "dispose",
                "FINISHED, CANCELED, or FAILED",
                state,
            ));
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.set_state(WorkflowState::Disposing);
        for controller in self.controllers.values() {
            controller.dispose();
        }
        self.wait_for_components().await?;
        self.set_state(WorkflowState::Disposed);
        Ok(())
    }

    async fn wait_for_components(&self) -> Result<()> {
        let mut error_seen = false;
        for controller in self.controllers.values() {
            if controller.wait_for_lifecycle_phase_finished().await.is_err() {
                error_seen = true;
            }
        }
        if error_seen {
            Err(EngineError::Lifecycle(
                "at least one component run failed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::NullEventSink;
    use crate::graph::{Connection, WorkflowNode};
    use calyx_component_model::{
        ChannelType, ChannelValue, Component, ComponentDescription, ComponentError,
        ComponentInstanceInformation, DeclarativeComponentDescription, Input, Output,
        PendingInputs,
    };

    #[derive(Default)]
    struct CountingSource {
        output: Option<Output>,
    }

    impl Component for CountingSource {
        fn on_prepare(
            &mut self,
            info: &ComponentInstanceInformation,
        ) -> calyx_component_model::component::Result<()> {
            self.output = info.output("out").cloned();
            Ok(())
        }

        fn run_initial(&mut self, _inputs_connected: bool) -> calyx_component_model::component::Result<bool> {
            if let Some(output) = &self.output {
                for value in 0..3 {
                    output.write(ChannelValue::Integer(value));
                }
            }
            Ok(false)
        }
    }

    #[derive(Default)]
    struct Collector;

    impl Component for Collector {
        fn run_step(
            &mut self,
            _new_input: Option<&Input>,
            pending: &mut PendingInputs,
        ) -> calyx_component_model::component::Result<bool> {
            pending.take_next("in");
            Ok(true)
        }
    }

    #[derive(Default)]
    struct FailingInitial;

    impl Component for FailingInitial {
        fn run_initial(&mut self, _inputs_connected: bool) -> calyx_component_model::component::Result<bool> {
            Err(ComponentError::fatal("boom"))
        }
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(
            DeclarativeComponentDescription::new("test.counting-source", "Source", "Test", "1.0")
                .with_output("out", ChannelType::Integer),
            || Box::new(CountingSource::default()),
        );
        registry.register(
            DeclarativeComponentDescription::new("test.collector", "Collector", "Test", "1.0")
                .with_input("in", ChannelType::Integer),
            || Box::new(Collector),
        );
        registry.register(
            DeclarativeComponentDescription::new("test.failing", "Failing", "Test", "1.0"),
            || Box::new(FailingInitial),
        );
        registry
    }

    fn two_node_description(registry: &ComponentRegistry) -> WorkflowDescription {
        let mut wd = WorkflowDescription::new("wf-under-test");
        wd.set_name("Under Test");
        let source = WorkflowNode::with_identifier(
            "n1",
            ComponentDescription::new(Arc::new(
                registry.description("test.counting-source").unwrap().clone(),
            )),
        );
        let sink = WorkflowNode::with_identifier(
            "n2",
            ComponentDescription::new(Arc::new(registry.description("test.collector").unwrap().clone())),
        );
        wd.add_workflow_node(source);
        wd.add_workflow_node(sink);
        wd.add_connection(Connection::new("n1", "out", "n2", "in"));
        wd
    }

    fn workflow(description: WorkflowDescription) -> Workflow {
        Workflow::new(
            WorkflowInformation {
                identifier: "wf-instance-1".to_string(),
                name: "Under Test".to_string(),
                description,
                controller_platform: None,
            },
            Arc::new(NullEventSink),
        )
    }

    async fn wait_for_workflow_state(workflow: &Workflow, expected: WorkflowState) {
        let mut watch = workflow.state_watch();
        tokio::time::timeout(Duration::from_secs(10), watch.wait_for(|state| *state == expected))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", expected))
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_node_workflow_runs_to_finished() {
        let registry = registry();
        let mut workflow = workflow(two_node_description(&registry));

        workflow
            .initialize(&registry, &std::env::temp_dir().join("calyx-workflow-tests"))
            .unwrap();
        assert_eq!(workflow.state(), WorkflowState::Ready);

        workflow.start().await.unwrap();
        wait_for_workflow_state(&workflow, WorkflowState::Finished).await;

        let sink = workflow.controller_of_node("n2").unwrap();
        assert_eq!(sink.run_count(), 3);

        workflow.dispose().await.unwrap();
        assert_eq!(workflow.state(), WorkflowState::Disposed);
    }

    #[tokio::test]
    async fn test_component_failure_fails_workflow() {
        let registry = registry();
        let mut wd = WorkflowDescription::new("wf-failing");
        wd.add_workflow_node(WorkflowNode::with_identifier(
            "n1",
            ComponentDescription::new(Arc::new(registry.description("test.failing").unwrap().clone())),
        ));
        let mut workflow = workflow(wd);

        workflow
            .initialize(&registry, &std::env::temp_dir().join("calyx-workflow-tests"))
            .unwrap();
        workflow.start().await.unwrap();
        wait_for_workflow_state(&workflow, WorkflowState::Failed).await;
    }

    #[tokio::test]
    async fn test_initialize_fails_on_unknown_component() {
        let registry = registry();
        let mut wd = WorkflowDescription::new("wf-unknown");
        wd.add_workflow_node(WorkflowNode::with_identifier(
            "n1",
            ComponentDescription::placeholder("Missing"),
        ));
        let mut workflow = workflow(wd);
        assert!(workflow
            .initialize(&registry, &std::env::temp_dir().join("calyx-workflow-tests"))
            .is_err());
    }
}
