//! The per-instance lifecycle controller
//!
//! One [`ComponentController`] drives one boxed [`Component`] through the
//! lifecycle state machine. All lifecycle calls are fire-and-forget: they
//! enqueue a task for the controller's own driving task, so workflow-wide
//! start/pause/cancel can be issued across many nodes without per-node
//! round-trip latency. [`ComponentController::wait_for_lifecycle_phase_finished`]
//! is the single deliberately blocking call, used by the orchestrator to
//! synchronize bulk setup.
//!
//! A single shared input queue feeds all of the instance's input channels;
//! the driving loop demultiplexes by input name before handing tokens to the
//! component's decision functions.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use calyx_component_model::{
    Component, ComponentInstanceDescriptor, ComponentInstanceInformation, Input, InputFeed,
    InputGate, Output, PendingInputs, PlatformIdentifier, WorkflowContextInformation,
};

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::registry::ComponentRegistry;
use crate::state::ComponentState;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to bind a component implementation to a new instance
pub struct InitializeRequest {
    /// Identifier of the new instance (and its controller)
    pub controller_id: String,
    /// Display name of the instance
    pub component_name: String,
    /// The node's component description, resolved and deep-copied
    pub description: calyx_component_model::ComponentDescription,
    /// Identifier of the owning workflow instance
    pub workflow_id: String,
    /// Name of the owning workflow instance
    pub workflow_name: String,
    /// All platforms participating in the workflow
    pub involved_platforms: Vec<PlatformIdentifier>,
    /// Whether any upstream output is connected to this instance
    pub inputs_connected: bool,
    /// Directory under which the instance's working directory is created
    pub working_directory_root: PathBuf,
}

/// One upstream output to subscribe to during prepare, and the name of the
/// input it feeds
pub struct InputSubscription {
    pub source: Output,
    pub input_name: String,
}

type LifecycleFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct LifecycleTask {
    future: LifecycleFuture,
    done: oneshot::Sender<Result<()>>,
}

/// Loop-private aggregation state, parked between loop runs (pause/resume)
struct LoopState {
    pending: PendingInputs,
    gate: InputGate,
    finished_inputs: BTreeSet<String>,
    post_run_check_done: bool,
}

struct ControllerShared {
    info: ComponentInstanceInformation,
    component: tokio::sync::Mutex<Box<dyn Component>>,
    state_tx: watch::Sender<ComponentState>,
    state_rx: watch::Receiver<ComponentState>,
    lifecycle_tx: mpsc::UnboundedSender<LifecycleTask>,
    outstanding: Mutex<Vec<oneshot::Receiver<Result<()>>>>,
    feed: InputFeed,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<Input>>>,
    loop_state: Mutex<Option<LoopState>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    interrupt: AtomicBool,
    connected_inputs: Mutex<BTreeSet<String>>,
    current_input_numbers: Mutex<BTreeMap<String, Option<u64>>>,
    run_count: AtomicU64,
    event_sink: Arc<dyn EventSink>,
}

impl ControllerShared {
    fn state(&self) -> ComponentState {
        *self.state_rx.borrow()
    }

    /// Publish a state change. After a failure the workflow will be canceled,
    /// but the component's failure state remains visible even then, so no
    /// state change after `Failed` is published.
    fn set_state(&self, state: ComponentState) {
        let previous = self.state();
        if previous == ComponentState::Failed {
            return;
        }
        self.state_tx.send_replace(state);
        let _ = self.event_sink.send(EngineEvent::ComponentStateChanged {
            workflow_id: self.info.workflow_identifier().to_string(),
            component_id: self.info.identifier().to_string(),
            state,
        });
    }

    fn failed(&self, error: &dyn std::fmt::Display) {
        log::error!("component run failed: {}", error);
        self.set_state(ComponentState::Failed);
    }

    fn bump_runs(&self) {
        let runs = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.event_sink.send(EngineEvent::ComponentRun {
            workflow_id: self.info.workflow_identifier().to_string(),
            component_id: self.info.identifier().to_string(),
            run_count: runs,
        });
    }

    /// Move the instance to its finished state and signal end-of-stream on
    /// every output
    fn finish(&self) {
        let connected = self.connected_inputs.lock().unwrap().len();
        if connected != 0 && self.run_count.load(Ordering::SeqCst) == 0 {
            self.set_state(ComponentState::FinishedNoRunStep);
        } else {
            self.set_state(ComponentState::Finished);
        }
        for output in self.info.outputs() {
            output.write_finished();
        }
    }
}

/// Drives one component instance through its lifecycle
pub struct ComponentController {
    shared: Arc<ControllerShared>,
    descriptor: ComponentInstanceDescriptor,
}

impl ComponentController {
    /// Bind a component implementation to a new instance
    ///
    /// Resolves the implementation from the typed registry, creates the
    /// instance's working directory, and builds the outputs and the runtime
    /// snapshot. Fails with an instantiation error for an unknown component
    /// identifier. Must be called within a tokio runtime; the controller's
    /// driving task is spawned here.
    pub fn initialize(
        request: InitializeRequest,
        registry: &ComponentRegistry,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<ComponentController> {
        let component = registry.create(request.description.identifier())?;

        let working_directory = request
            .working_directory_root
            .join(format!("component-{}", request.controller_id));
        std::fs::create_dir_all(&working_directory)?;

        let outputs: Vec<Output> = request
            .description
            .output_definitions()
            .iter()
            .map(|(name, channel_type)| {
                Output::new(name, *channel_type, &request.controller_id, &request.workflow_id)
            })
            .collect();

        let info = ComponentInstanceInformation::new(
            request.controller_id,
            request.component_name,
            working_directory,
            request.description,
            WorkflowContextInformation {
                identifier: request.workflow_id,
                name: request.workflow_name,
                involved_platforms: request.involved_platforms,
            },
            request.inputs_connected,
            outputs,
        );
        let descriptor = info.descriptor();

        let gate = InputGate::for_instance(&info);
        let (feed, input_rx) = InputFeed::new();
        let (state_tx, state_rx) = watch::channel(ComponentState::Instantiated);
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ControllerShared {
            info,
            component: tokio::sync::Mutex::new(component),
            state_tx,
            state_rx,
            lifecycle_tx,
            outstanding: Mutex::new(Vec::new()),
            feed,
            input_rx: Mutex::new(Some(input_rx)),
            loop_state: Mutex::new(Some(LoopState {
                pending: PendingInputs::new(),
                gate,
                finished_inputs: BTreeSet::new(),
                post_run_check_done: true,
            })),
            loop_handle: Mutex::new(None),
            interrupt: AtomicBool::new(false),
            connected_inputs: Mutex::new(BTreeSet::new()),
            current_input_numbers: Mutex::new(BTreeMap::new()),
            run_count: AtomicU64::new(0),
            event_sink,
        });

        Self::spawn_lifecycle_driver(lifecycle_rx);
        shared.set_state(ComponentState::Instantiated);

        Ok(ComponentController { shared, descriptor })
    }

    /// The driving task executing lifecycle tasks strictly in submission order
    fn spawn_lifecycle_driver(mut lifecycle_rx: mpsc::UnboundedReceiver<LifecycleTask>) {
        tokio::spawn(async move {
            while let Some(task) = lifecycle_rx.recv().await {
                let result = task.future.await;
                let _ = task.done.send(result);
            }
        });
    }

    fn submit(&self, future: LifecycleFuture) {
        let (done, receiver) = oneshot::channel();
        self.shared.outstanding.lock().unwrap().push(receiver);
        if self.shared.lifecycle_tx.send(LifecycleTask { future, done }).is_err() {
            log::error!(
                "lifecycle task submitted to stopped controller {}",
                self.shared.info.identifier()
            );
        }
    }

    /// Remote-facing snapshot of the instance
    pub fn instance_descriptor(&self) -> &ComponentInstanceDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub fn state(&self) -> ComponentState {
        self.shared.state()
    }

    /// Watch lifecycle state changes
    pub fn state_watch(&self) -> watch::Receiver<ComponentState> {
        self.shared.state_rx.clone()
    }

    /// Number of completed run steps, excluding the initial run
    pub fn run_count(&self) -> u64 {
        self.shared.run_count.load(Ordering::SeqCst)
    }

    /// Producer-side handle of this instance's shared input queue
    pub fn input_feed(&self) -> InputFeed {
        self.shared.feed.clone()
    }

    /// The output with the given name, for downstream subscription wiring
    pub fn output(&self, name: &str) -> Option<Output> {
        self.shared.info.output(name).cloned()
    }

    /// Sequence number of the most recently dequeued input per endpoint
    pub fn current_input_numbers(&self) -> BTreeMap<String, Option<u64>> {
        self.shared.current_input_numbers.lock().unwrap().clone()
    }

    /// Wire upstream subscriptions and run the component's `on_prepare`
    ///
    /// Errors in `on_prepare` are fatal to the instance and never retried.
    pub fn prepare(&self, endpoint_mapping: Vec<InputSubscription>) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            if state != ComponentState::Instantiated {
                return Err(EngineError::lifecycle_issue("prepare", "INSTANTIATED", state));
            }
            shared.set_state(ComponentState::Preparing);

            let mut connected = BTreeSet::new();
            for subscription in endpoint_mapping {
                subscription
                    .source
                    .subscribe(subscription.input_name.clone(), shared.feed.clone());
                connected.insert(subscription.input_name);
            }
            {
                let mut loop_state = shared.loop_state.lock().unwrap();
                if let Some(loop_state) = loop_state.as_mut() {
                    for name in &connected {
                        loop_state.pending.register(name);
                    }
                }
            }
            {
                let mut numbers = shared.current_input_numbers.lock().unwrap();
                for name in &connected {
                    numbers.insert(name.clone(), None);
                }
            }
            *shared.connected_inputs.lock().unwrap() = connected;

            let mut component = shared.component.lock().await;
            component.on_prepare(&shared.info)?;
            shared.set_state(ComponentState::Prepared);
            Ok(())
        }));
    }

    /// Run `run_initial` once and start the input-processing loop
    ///
    /// `run_initial` returning `Ok(false)`, or an instance without connected
    /// inputs, takes the finish path immediately.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            if state != ComponentState::Prepared {
                return Err(EngineError::lifecycle_issue("start", "PREPARED", state));
            }
            shared.set_state(ComponentState::Starting);

            let initial = {
                let mut component = shared.component.lock().await;
                component.run_initial(shared.info.inputs_connected())
            };
            let can_run_again = match initial {
                Ok(can_run_again) => can_run_again,
                Err(error) => {
                    shared.failed(&error);
                    return Ok(());
                }
            };

            if !shared.info.inputs_connected() || !can_run_again {
                shared.finish();
                return Ok(());
            }

            shared.set_state(ComponentState::Ready);
            if !shared.connected_inputs.lock().unwrap().is_empty() {
                let loop_shared = Arc::clone(&shared);
                let handle = tokio::spawn(process_queued_inputs(loop_shared));
                *shared.loop_handle.lock().unwrap() = Some(handle);
            }
            Ok(())
        }));
    }

    /// Suspend input processing after the current step
    ///
    /// Inputs arriving while pausing or paused are buffered and replayed on
    /// resume.
    pub fn pause(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            // the component can finish or fail asynchronously in the meantime
            if state.is_finished() || state == ComponentState::Failed {
                return Ok(());
            }
            if !matches!(
                state,
                ComponentState::Running | ComponentState::Checking | ComponentState::Ready
            ) {
                return Err(EngineError::lifecycle_issue(
                    "pause",
                    "RUNNING, CHECKING, or READY",
                    state,
                ));
            }
            shared.set_state(ComponentState::Pausing);
            shared.feed.set_paused(true);
            shared.interrupt.store(true, Ordering::SeqCst);

            let handle = shared.loop_handle.lock().unwrap().take();
            if let Some(handle) = handle {
                if handle.await.is_err() {
                    log::error!("awaiting the last component run after pausing failed");
                }
            }
            shared.interrupt.store(false, Ordering::SeqCst);
            shared.set_state(ComponentState::Paused);
            Ok(())
        }));
    }

    /// Resume input processing, replaying inputs buffered while paused
    pub fn resume(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            // the component can finish or fail asynchronously in the meantime
            if state.is_finished() || state == ComponentState::Failed {
                return Ok(());
            }
            if state != ComponentState::Paused {
                return Err(EngineError::lifecycle_issue("resume", "PAUSED", state));
            }
            shared.set_state(ComponentState::Starting);
            shared.feed.replay_buffered();

            let loop_shared = Arc::clone(&shared);
            let handle = tokio::spawn(process_queued_inputs(loop_shared));
            *shared.loop_handle.lock().unwrap() = Some(handle);
            Ok(())
        }));
    }

    /// Cancel the instance
    ///
    /// Does not interrupt an in-flight `run_step`; cancellation takes effect
    /// at the next decision point.
    pub fn cancel(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            // the component can finish or fail asynchronously in the meantime
            if state.is_finished() || state == ComponentState::Failed {
                return Ok(());
            }
            shared.set_state(ComponentState::Canceling);
            shared.interrupt.store(true, Ordering::SeqCst);

            let handle = shared.loop_handle.lock().unwrap().take();
            if let Some(handle) = handle {
                if handle.await.is_err() {
                    log::error!("awaiting the last component run after cancelling failed");
                }
            }
            shared.interrupt.store(false, Ordering::SeqCst);

            let mut component = shared.component.lock().await;
            component.on_cancel();
            shared.set_state(ComponentState::Canceled);
            Ok(())
        }));
    }

    /// Dispose the instance; only valid from a terminal state
    pub fn dispose(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            if !matches!(
                state,
                ComponentState::Finished
                    | ComponentState::FinishedNoRunStep
                    | ComponentState::Failed
                    | ComponentState::Canceled
            ) {
                return Err(EngineError::lifecycle_issue(
                    "dispose",
                    "FINISHED, FAILED, or CANCELED",
                    state,
                ));
            }
            shared.set_state(ComponentState::Disposing);
            let mut component = shared.component.lock().await;
            component.on_dispose();
            shared.set_state(ComponentState::Disposed);
            Ok(())
        }));
    }

    /// Run the component's `on_finish` hook after it finished or failed
    pub fn finished(&self) {
        let shared = Arc::clone(&self.shared);
        self.submit(Box::pin(async move {
            let state = shared.state();
            if !state.is_finished() && state != ComponentState::Failed {
                return Err(EngineError::lifecycle_issue(
                    "finished",
                    "FINISHED, FINISHED_NO_RUN_STEP, or FAILED",
                    state,
                ));
            }
            let mut component = shared.component.lock().await;
            component.on_finish();
            Ok(())
        }));
    }

    /// Await all outstanding lifecycle tasks
    ///
    /// The only blocking call of the controller, deliberately, so workflow
    /// setup wiring many controllers is not serialized on each instance's
    /// readiness. Any task error moves the instance to `Failed` and surfaces
    /// here.
    pub async fn wait_for_lifecycle_phase_finished(&self) -> Result<()> {
        let receivers: Vec<_> = {
            let mut outstanding = self.shared.outstanding.lock().unwrap();
            outstanding.drain(..).collect()
        };

        let mut error_seen = false;
        for receiver in receivers {
            match receiver.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    log::error!("component run failed: {}", error);
                    self.shared.set_state(ComponentState::Failed);
                    error_seen = true;
                }
                Err(_) => {
                    log::error!("lifecycle task of component {} was dropped", self.descriptor.identifier);
                    self.shared.set_state(ComponentState::Failed);
                    error_seen = true;
                }
            }
        }

        if error_seen {
            Err(EngineError::Lifecycle(
                "error occurred in some lifecycle phase".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// The input-processing loop: poll the shared queue, demultiplex, decide, run
///
/// Ported state machine: a dequeued value goes through
/// `can_run_after_new_input` (CHECKING) and, when positive, `run_step`
/// (RUNNING); afterwards `can_run_after_run` keeps triggering input-free
/// steps until it declines (READY). End-of-stream markers are tracked until
/// every connected input finished. Any component error fails the instance
/// terminally.
async fn process_queued_inputs(shared: Arc<ControllerShared>) {
    let Some(mut input_rx) = shared.input_rx.lock().unwrap().take() else {
        log::error!("input processing started without an input queue");
        return;
    };
    let Some(mut loop_state) = shared.loop_state.lock().unwrap().take() else {
        log::error!("input processing started without aggregation state");
        return;
    };

    shared.set_state(ComponentState::Ready);

    let mut continue_processing = true;
    'processing: while continue_processing {
        if shared.interrupt.load(Ordering::SeqCst) {
            break 'processing;
        }

        let mut current_input: Option<Input> = None;
        if loop_state.post_run_check_done {
            let input = match tokio::time::timeout(INPUT_POLL_INTERVAL, input_rx.recv()).await {
                Ok(Some(input)) => input,
                Ok(None) => break 'processing,
                Err(_) => continue 'processing,
            };

            if input.is_finished_marker() {
                loop_state.finished_inputs.insert(input.name.clone());
                let connected = shared.connected_inputs.lock().unwrap().len();
                if loop_state.finished_inputs.len() == connected {
                    shared.finish();
                    continue_processing = false;
                }
                continue 'processing;
            }

            loop_state.finished_inputs.remove(&input.name);
            shared
                .current_input_numbers
                .lock()
                .unwrap()
                .insert(input.name.clone(), Some(input.number));
            let _ = shared.event_sink.send(EngineEvent::InputDelivered {
                workflow_id: shared.info.workflow_identifier().to_string(),
                component_id: shared.info.identifier().to_string(),
                input_name: input.name.clone(),
                number: input.number,
            });
            loop_state.pending.enqueue(input.clone());

            shared.set_state(ComponentState::Checking);
            let decision = {
                let mut component = shared.component.lock().await;
                component.can_run_after_new_input(&input, &mut loop_state.gate, &mut loop_state.pending)
            };
            match decision {
                Err(error) => {
                    shared.failed(&error);
                    continue_processing = false;
                    continue 'processing;
                }
                Ok(false) => {
                    shared.set_state(ComponentState::Ready);
                    continue 'processing;
                }
                Ok(true) => {
                    shared.set_state(ComponentState::Running);
                    let step = {
                        let mut component = shared.component.lock().await;
                        component.run_step(Some(&input), &mut loop_state.pending)
                    };
                    match step {
                        Err(error) => {
                            shared.failed(&error);
                            continue_processing = false;
                            continue 'processing;
                        }
                        Ok(more) => {
                            shared.bump_runs();
                            if !more {
                                shared.finish();
                                continue_processing = false;
                                continue 'processing;
                            }
                            current_input = Some(input);
                        }
                    }
                }
            }
        }

        // post-run phase: keep stepping while the component can run without a
        // new input
        while continue_processing {
            loop_state.post_run_check_done = false;
            if shared.interrupt.load(Ordering::SeqCst) {
                // resume re-enters here, with the post-run check still owed
                break;
            }

            shared.set_state(ComponentState::Checking);
            let decision = {
                let mut component = shared.component.lock().await;
                component.can_run_after_run(
                    current_input.as_ref(),
                    &mut loop_state.gate,
                    &mut loop_state.pending,
                )
            };
            match decision {
                Err(error) => {
                    shared.failed(&error);
                    continue_processing = false;
                }
                Ok(true) => {
                    current_input = None;
                    loop_state.post_run_check_done = true;
                    shared.set_state(ComponentState::Running);
                    let step = {
                        let mut component = shared.component.lock().await;
                        component.run_step(None, &mut loop_state.pending)
                    };
                    match step {
                        Err(error) => {
                            shared.failed(&error);
                            continue_processing = false;
                        }
                        Ok(more) => {
                            shared.bump_runs();
                            if !more {
                                shared.finish();
                                continue_processing = false;
                            }
                        }
                    }
                }
                Ok(false) => {
                    loop_state.post_run_check_done = true;
                    shared.set_state(ComponentState::Ready);
                    break;
                }
            }
        }
    }

    *shared.loop_state.lock().unwrap() = Some(loop_state);
    *shared.input_rx.lock().unwrap() = Some(input_rx);
}
