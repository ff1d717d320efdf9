//! Typed progress events published by controllers and workflows
//!
//! Events are delivered to an injected [`EventSink`], abstracting over the
//! transport so the engine can be observed from different hosts.

use serde::{Deserialize, Serialize};

use crate::state::{ComponentState, WorkflowState};

/// Trait for receiving engine events
pub trait EventSink: Send + Sync {
    /// Deliver an event
    ///
    /// Returns an error if the event could not be delivered (e.g. the
    /// consumer went away).
    fn send(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Error when delivering events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Events emitted during workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A component instance changed its lifecycle state
    #[serde(rename_all = "camelCase")]
    ComponentStateChanged {
        workflow_id: String,
        component_id: String,
        state: ComponentState,
    },

    /// A component instance completed one `run_step`
    #[serde(rename_all = "camelCase")]
    ComponentRun {
        workflow_id: String,
        component_id: String,
        run_count: u64,
    },

    /// A workflow instance changed its lifecycle state
    #[serde(rename_all = "camelCase")]
    WorkflowStateChanged {
        workflow_id: String,
        state: WorkflowState,
    },

    /// A component instance dequeued an input for processing
    #[serde(rename_all = "camelCase")]
    InputDelivered {
        workflow_id: String,
        component_id: String,
        input_name: String,
        number: u64,
    },
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink_collects() {
        let sink = VecEventSink::new();
        sink.send(EngineEvent::ComponentStateChanged {
            workflow_id: "wf".to_string(),
            component_id: "c1".to_string(),
            state: ComponentState::Running,
        })
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            EngineEvent::ComponentStateChanged { component_id, state, .. } => {
                assert_eq!(component_id, "c1");
                assert_eq!(*state, ComponentState::Running);
            }
            _ => panic!("Expected ComponentStateChanged event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(EngineEvent::WorkflowStateChanged {
            workflow_id: "wf".to_string(),
            state: WorkflowState::Running,
        })
        .unwrap();
    }
}
