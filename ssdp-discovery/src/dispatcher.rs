//! Listener notification
//!
//! Added/removed events are fanned out once per external id whose filter
//! matches the record's protocol, and every listener receives its own copy.
//! Delivery happens on the context's serialized delivery queue, never on the
//! thread that changed the registry.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::context::DiscoveryContext;
use crate::engine::{DiscoveryEngine, EngineInner};
use crate::service::{DiscoveryFilter, ServiceDescription};

/// Receives discovery events
///
/// Callbacks run off the engine's delivery queue, one at a time. They may call
/// back into the engine (including `stop()`), but should not block for long.
pub trait DiscoveryListener: Send + Sync {
    fn on_service_added(&self, engine: &DiscoveryEngine, service: ServiceDescription);
    fn on_service_removed(&self, engine: &DiscoveryEngine, service: ServiceDescription);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notification {
    Added,
    Removed,
}

type ListenerList = Arc<Vec<Arc<dyn DiscoveryListener>>>;

pub(crate) struct NotificationDispatcher {
    // Replaced wholesale on every change so readers iterate a stable snapshot
    listeners: RwLock<ListenerList>,
    context: Arc<DiscoveryContext>,
    source: Weak<EngineInner>,
}

impl NotificationDispatcher {
    pub(crate) fn new(context: Arc<DiscoveryContext>, source: Weak<EngineInner>) -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            context,
            source,
        }
    }

    /// Register a listener; the same `Arc` is only registered once
    pub(crate) fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut updated = Vec::clone(&listeners);
        updated.push(listener);
        *listeners = Arc::new(updated);
        true
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        let mut listeners = self.listeners.write();
        let updated: Vec<_> = listeners
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        if updated.len() == listeners.len() {
            return false;
        }
        *listeners = Arc::new(updated);
        true
    }

    pub(crate) fn listeners(&self) -> ListenerList {
        Arc::clone(&self.listeners.read())
    }

    pub(crate) fn notify_added(&self, record: &ServiceDescription, filters: &[DiscoveryFilter]) {
        self.notify(Notification::Added, record, filters);
    }

    pub(crate) fn notify_removed(&self, record: &ServiceDescription, filters: &[DiscoveryFilter]) {
        self.notify(Notification::Removed, record, filters);
    }

    fn notify(&self, kind: Notification, record: &ServiceDescription, filters: &[DiscoveryFilter]) {
        let copies: Vec<ServiceDescription> = external_ids_for(&record.protocol_filter, filters)
            .iter()
            .map(|id| record.for_external_id(id))
            .collect();

        if copies.is_empty() {
            tracing::debug!(
                uuid = %record.uuid,
                filter = %record.protocol_filter,
                "no filter registered for record, skipping notification"
            );
            return;
        }

        let source = self.source.clone();
        let queued = self.context.deliver(move || {
            let Some(inner) = source.upgrade() else {
                return;
            };
            let listeners = inner.dispatcher.listeners();
            let engine = DiscoveryEngine::from_inner(inner);

            for copy in copies {
                for listener in listeners.iter() {
                    match kind {
                        Notification::Added => listener.on_service_added(&engine, copy.clone()),
                        Notification::Removed => listener.on_service_removed(&engine, copy.clone()),
                    }
                }
            }
        });

        if !queued {
            tracing::debug!(uuid = %record.uuid, ?kind, "delivery context stopped, notification dropped");
        }
    }
}

/// External ids of every filter registered for `protocol_filter`
pub fn external_ids_for(protocol_filter: &str, filters: &[DiscoveryFilter]) -> Vec<String> {
    filters
        .iter()
        .filter(|f| f.protocol_filter == protocol_filter)
        .map(|f| f.external_id.clone())
        .collect()
}

fn same_listener(a: &Arc<dyn DiscoveryListener>, b: &Arc<dyn DiscoveryListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
