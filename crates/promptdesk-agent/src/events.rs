//! Synchronous, in-process notification of editor events.
//!
//! Each event type has at most one listener. Registering a listener for a type
//! that already has one replaces it (last registration wins). Delivery happens
//! on the emitting thread before `emit` returns; nothing is queued.

use promptdesk_core::{EditorEvent, EventType};
use std::collections::HashMap;

pub type Listener = Box<dyn FnMut(&EditorEvent) + Send>;

#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventType, Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`. Returns true if it replaced one.
    pub fn on<F>(&mut self, event_type: EventType, listener: F) -> bool
    where
        F: FnMut(&EditorEvent) + Send + 'static,
    {
        self.listeners
            .insert(event_type, Box::new(listener))
            .is_some()
    }

    pub fn off(&mut self, event_type: EventType) -> bool {
        self.listeners.remove(&event_type).is_some()
    }

    pub fn has_listener(&self, event_type: EventType) -> bool {
        self.listeners.contains_key(&event_type)
    }

    /// Deliver to the listener for this event's type. Returns whether anyone heard it.
    pub fn emit(&mut self, event: &EditorEvent) -> bool {
        match self.listeners.get_mut(&event.event_type()) {
            Some(listener) => {
                listener(event);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
