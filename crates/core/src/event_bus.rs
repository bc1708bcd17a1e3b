//! Unified event bus — trait for emitting generation lifecycle events.
//!
//! Components accept an `Arc<dyn EventSink>` to surface run progress
//! (entities generated, triggers fired, failures) to external observers
//! without the core performing any I/O itself.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{EntityId, GenerationEvent, GenerationEventKind, Vertical};

/// Trait for emitting generation events. Implementations route events to
/// whatever observer the embedding application wires up.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GenerationEvent);
}

/// No-op sink for tests and callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: GenerationEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<GenerationEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_kind(&self, kind: GenerationEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: GenerationEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating `GenerationEvent` with minimal boilerplate.
pub fn make_event(
    kind: GenerationEventKind,
    run_id: impl Into<String>,
    entity_id: Option<EntityId>,
    vertical: Option<Vertical>,
    detail: Option<String>,
) -> GenerationEvent {
    GenerationEvent {
        event_id: Uuid::new_v4(),
        kind,
        run_id: run_id.into(),
        entity_id,
        vertical,
        detail,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op sink for callers that don't need one.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
