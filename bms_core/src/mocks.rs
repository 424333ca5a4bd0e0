//! Test and helper collaborators for bms_core.

use crate::event::{Event, EventKind, EventSink};
use std::sync::{Arc, Mutex};

/// Sink that keeps every event in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|v| v.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Events whose kind name matches, e.g. `"relay_transition"`.
    pub fn named(&self, name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.name() == name)
            .collect()
    }

    pub fn contains(&self, pred: impl Fn(&EventKind) -> bool) -> bool {
        self.events().iter().any(|e| pred(&e.kind))
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut v) => v.clear(),
            Err(p) => p.into_inner().clear(),
        }
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut v) => v.push(event.clone()),
            Err(p) => p.into_inner().push(event.clone()),
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &Event) {}
}
