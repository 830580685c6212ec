//! Synchronous in-process event bus.
//!
//! [`EventBus`] is constructed once in `main` and shared via `Arc<EventBus>`.
//! Publishing invokes every listener registered for the event type, then every
//! wildcard listener, on the caller's thread. Listeners that need to do I/O
//! must hand the work off to a task themselves.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use atrium_shared::{EventEnvelope, EventType};

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Receives events from the bus. Delivery happens inline with `publish`.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event_type: EventType, envelope: &EventEnvelope);
}

impl<F> EventListener for F
where
    F: Fn(EventType, &EventEnvelope) + Send + Sync,
{
    fn on_event(&self, event_type: EventType, envelope: &EventEnvelope) {
        self(event_type, envelope)
    }
}

/// Handle returned by `subscribe`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Registered = (SubscriptionId, Arc<dyn EventListener>);

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Listener count past which the bus warns about a probable leak.
pub const DEFAULT_MAX_LISTENERS: usize = 100;

pub struct EventBus {
    listeners: RwLock<HashMap<EventType, Vec<Registered>>>,
    wildcard: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
    max_listeners: usize,
}

impl EventBus {
    pub fn new(max_listeners: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_listeners,
        }
    }

    /// Register a listener for one event type.
    pub fn subscribe(&self, event_type: EventType, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = self.allocate_id();
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let entry = listeners.entry(event_type).or_default();
        entry.push((id, listener));
        if entry.len() > self.max_listeners {
            tracing::warn!(
                event_type = %event_type,
                count = entry.len(),
                max = self.max_listeners,
                "Listener count exceeds configured maximum"
            );
        }
        id
    }

    /// Register a listener that receives every event.
    pub fn subscribe_all(&self, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = self.allocate_id();
        let mut wildcard = self.wildcard.write().unwrap_or_else(|e| e.into_inner());
        wildcard.push((id, listener));
        if wildcard.len() > self.max_listeners {
            tracing::warn!(
                count = wildcard.len(),
                max = self.max_listeners,
                "Wildcard listener count exceeds configured maximum"
            );
        }
        id
    }

    /// Remove a listener. Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        {
            let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
            for entries in listeners.values_mut() {
                let before = entries.len();
                entries.retain(|(registered, _)| *registered != id);
                removed |= entries.len() != before;
            }
        }
        let mut wildcard = self.wildcard.write().unwrap_or_else(|e| e.into_inner());
        let before = wildcard.len();
        wildcard.retain(|(registered, _)| *registered != id);
        removed | (wildcard.len() != before)
    }

    /// Deliver an event to its listeners, then to the wildcard listeners.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still run and the publisher never observes the failure.
    pub fn publish(&self, event_type: EventType, envelope: &EventEnvelope) {
        // Snapshot so listeners may subscribe/unsubscribe while being called.
        let targets: Vec<Arc<dyn EventListener>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            let wildcard = self.wildcard.read().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(&event_type)
                .into_iter()
                .flatten()
                .chain(wildcard.iter())
                .map(|(_, listener)| listener.clone())
                .collect()
        };

        tracing::debug!(
            event_type = %event_type,
            tenant_id = %envelope.tenant_id,
            entity_id = %envelope.entity_id,
            listeners = targets.len(),
            "Publishing event"
        );

        for listener in targets {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(event_type, envelope)));
            if delivered.is_err() {
                tracing::error!(event_type = %event_type, "Event listener panicked");
            }
        }
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
