//! Channel-backed listener and blocking event iterator.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::dispatcher::DiscoveryListener;
use crate::engine::{DiscoveryEngine, EngineInner};
use crate::service::ServiceDescription;

/// Events emitted during discovery.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A device was resolved and is now live
    Added(ServiceDescription),
    /// A live device said byebye or timed out
    Removed(ServiceDescription),
}

impl DiscoveryEvent {
    pub fn service(&self) -> &ServiceDescription {
        match self {
            DiscoveryEvent::Added(service) | DiscoveryEvent::Removed(service) => service,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, DiscoveryEvent::Added(_))
    }
}

/// Listener forwarding every event into a channel
pub struct ChannelListener {
    tx: Sender<DiscoveryEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, Receiver<DiscoveryEvent>) {
        let (tx, rx) = channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl DiscoveryListener for ChannelListener {
    fn on_service_added(&self, _engine: &DiscoveryEngine, service: ServiceDescription) {
        let _ = self.tx.send(DiscoveryEvent::Added(service));
    }

    fn on_service_removed(&self, _engine: &DiscoveryEngine, service: ServiceDescription) {
        let _ = self.tx.send(DiscoveryEvent::Removed(service));
    }
}

// The dispatcher owns the listener; the iterator only points back at it
struct Subscription {
    engine: Weak<EngineInner>,
    listener: Weak<ChannelListener>,
}

impl Subscription {
    fn cancel(&self) {
        let (Some(inner), Some(listener)) = (self.engine.upgrade(), self.listener.upgrade()) else {
            return;
        };
        let listener: Arc<dyn DiscoveryListener> = listener;
        inner.dispatcher.remove_listener(&listener);
    }
}

/// Blocking iterator over discovery events
///
/// Without a timeout the iterator ends only when the engine is dropped. With
/// one, it ends after no event arrived for that long. Dropping the iterator
/// unregisters its listener.
pub struct EventIterator {
    rx: Receiver<DiscoveryEvent>,
    timeout: Option<Duration>,
    subscription: Option<Subscription>,
}

impl EventIterator {
    pub(crate) fn new(rx: Receiver<DiscoveryEvent>, timeout: Option<Duration>) -> Self {
        Self {
            rx,
            timeout,
            subscription: None,
        }
    }

    /// Register a fresh [`ChannelListener`] on `engine` and iterate its events
    pub(crate) fn subscribe(engine: &Arc<EngineInner>, timeout: Option<Duration>) -> Self {
        let (listener, rx) = ChannelListener::new();
        let subscription = Subscription {
            engine: Arc::downgrade(engine),
            listener: Arc::downgrade(&listener),
        };
        engine.dispatcher.add_listener(listener);

        let mut events = Self::new(rx, timeout);
        events.subscription = Some(subscription);
        events
    }

    /// Next event if one is already queued
    pub fn try_next(&self) -> Option<DiscoveryEvent> {
        self.rx.try_recv().ok()
    }
}

impl Iterator for EventIterator {
    type Item = DiscoveryEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).ok(),
            None => self.rx.recv().ok(),
        }
    }
}

impl Drop for EventIterator {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}
