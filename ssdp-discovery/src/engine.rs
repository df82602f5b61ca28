//! Discovery engine
//!
//! Ties the transport, registry, scheduler and dispatcher together:
//!
//! - two receive threads (`ssdp-response`, `ssdp-notify`) feed decoded packets
//!   into [`EngineInner::handle_packet`]
//! - first sightings are resolved as background tasks on the context's runtime
//! - the scheduler evicts silent devices and repeats the searches
//!
//! Every thread and task the engine starts holds only a `Weak` reference back
//! to it, so dropping the last [`DiscoveryEngine`] handle stops discovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::address::{AddressProvider, AutoDetectAddress};
use crate::config::DiscoveryConfig;
use crate::context::DiscoveryContext;
use crate::description::{DescriptionResolver, DeviceMetadata, HttpDescriptionResolver};
use crate::dispatcher::{DiscoveryListener, NotificationDispatcher};
use crate::error::{DiscoveryError, Result};
use crate::events::EventIterator;
use crate::packet::{PacketType, SsdpPacket};
use crate::registry::ServiceRegistry;
use crate::scheduler::SearchScheduler;
use crate::service::{DiscoveryFilter, ServiceDescription};
use crate::ssdp::{udp_opener, Datagram, Transport, TransportOpener};

/// Lifecycle state of a [`DiscoveryEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy)]
enum ReceiveSide {
    Response,
    Multicast,
}

impl ReceiveSide {
    fn thread_name(self) -> &'static str {
        match self {
            ReceiveSide::Response => "ssdp-response",
            ReceiveSide::Multicast => "ssdp-notify",
        }
    }

    fn receive(self, transport: &dyn Transport) -> Result<Datagram> {
        match self {
            ReceiveSide::Response => transport.response_receive(),
            ReceiveSide::Multicast => transport.multicast_receive(),
        }
    }
}

pub(crate) struct EngineInner {
    config: DiscoveryConfig,
    address_provider: Arc<dyn AddressProvider>,
    opener: TransportOpener,
    resolver: Arc<dyn DescriptionResolver>,
    context: Arc<DiscoveryContext>,
    registry: ServiceRegistry,
    pub(crate) dispatcher: NotificationDispatcher,
    scheduler: SearchScheduler,
    filters: RwLock<Arc<Vec<DiscoveryFilter>>>,
    // Serializes start/stop; `state` alone is what other threads observe
    lifecycle: Mutex<()>,
    state: RwLock<EngineState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    active_receivers: Arc<AtomicUsize>,
    self_ref: Weak<EngineInner>,
}

/// SSDP discovery engine
///
/// A cheap, cloneable handle; all clones drive the same engine.
///
/// # Example
///
/// ```no_run
/// use ssdp_discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryEvent, DiscoveryFilter};
///
/// let engine = DiscoveryEngine::new(DiscoveryConfig::default())?;
/// engine.add_filter(DiscoveryFilter::new(
///     "urn:schemas-upnp-org:device:MediaRenderer:1",
///     "DLNA",
/// ))?;
/// let events = engine.events(None);
/// engine.start()?;
///
/// for event in events {
///     match event {
///         DiscoveryEvent::Added(service) => println!("+ {}", service.uuid),
///         DiscoveryEvent::Removed(service) => println!("- {}", service.uuid),
///     }
/// }
/// # Ok::<(), ssdp_discovery::DiscoveryError>(())
/// ```
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<EngineInner>,
}

impl DiscoveryEngine {
    /// Engine with UDP sockets, HTTP resolution and auto-detected local address
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Engine bound to the address returned by `address_provider`
    pub fn with_address_provider<A>(config: DiscoveryConfig, address_provider: A) -> Result<Self>
    where
        A: AddressProvider + 'static,
    {
        Self::builder()
            .config(config)
            .address_provider(address_provider)
            .build()
    }

    /// Engine with every collaborator supplied by the caller
    pub fn with_parts(
        config: DiscoveryConfig,
        address_provider: Arc<dyn AddressProvider>,
        opener: TransportOpener,
        resolver: Arc<dyn DescriptionResolver>,
    ) -> Result<Self> {
        let context = Arc::new(DiscoveryContext::new(config.resolver_threads));
        Self::assemble(config, address_provider, opener, resolver, context)
    }

    pub fn builder() -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder::new()
    }

    fn assemble(
        config: DiscoveryConfig,
        address_provider: Arc<dyn AddressProvider>,
        opener: TransportOpener,
        resolver: Arc<dyn DescriptionResolver>,
        context: Arc<DiscoveryContext>,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| EngineInner {
            scheduler: SearchScheduler::new(config.clone(), Arc::clone(&context)),
            dispatcher: NotificationDispatcher::new(Arc::clone(&context), weak.clone()),
            config,
            address_provider,
            opener,
            resolver,
            context,
            registry: ServiceRegistry::new(),
            filters: RwLock::new(Arc::new(Vec::new())),
            lifecycle: Mutex::new(()),
            state: RwLock::new(EngineState::Stopped),
            transport: RwLock::new(None),
            active_receivers: Arc::new(AtomicUsize::new(0)),
            self_ref: weak.clone(),
        });

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Open the transport and start searching
    ///
    /// No-op while running. When no local address is available or the
    /// sockets can't be bound, the engine logs a warning and stays stopped;
    /// that is not reported as an error. `Err` means a receive thread or the
    /// runtime could not be created.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Stop searching and release the sockets; no-op while stopped
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn restart(&self) -> Result<()> {
        self.inner.stop();
        self.inner.start()
    }

    /// Stop and forget every pending and live device
    pub fn reset(&self) {
        self.inner.stop();
        self.inner.registry.clear();
    }

    /// Run one eviction sweep and send the searches now
    pub fn rescan(&self) {
        self.inner.rescan();
    }

    /// Register a filter; exact duplicates are ignored
    pub fn add_filter(&self, filter: DiscoveryFilter) -> Result<()> {
        if filter.protocol_filter.trim().is_empty() {
            tracing::error!(external_id = %filter.external_id, "This device filter does not have ssdp filter info");
            return Err(DiscoveryError::InvalidFilter(format!(
                "empty protocol filter for '{}'",
                filter.external_id
            )));
        }

        let mut filters = self.inner.filters.write();
        if filters.contains(&filter) {
            return Ok(());
        }
        let mut updated = Vec::clone(&filters);
        updated.push(filter);
        *filters = Arc::new(updated);
        Ok(())
    }

    /// Returns `true` if the filter was registered
    pub fn remove_filter(&self, filter: &DiscoveryFilter) -> bool {
        let mut filters = self.inner.filters.write();
        if !filters.contains(filter) {
            return false;
        }
        let updated: Vec<_> = filters.iter().filter(|f| *f != filter).cloned().collect();
        *filters = Arc::new(updated);
        true
    }

    /// Snapshot of the registered filters
    pub fn filters(&self) -> Arc<Vec<DiscoveryFilter>> {
        self.inner.filters()
    }

    /// True when no filter is registered
    pub fn is_empty(&self) -> bool {
        self.inner.filters.read().is_empty()
    }

    /// Returns `false` if the same listener was already registered
    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.inner.dispatcher.add_listener(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.inner.dispatcher.remove_listener(listener)
    }

    /// Blocking iterator over add/remove events from now on
    ///
    /// With `timeout`, iteration ends once no event arrived for that long.
    pub fn events(&self, timeout: Option<Duration>) -> EventIterator {
        EventIterator::subscribe(&self.inner, timeout)
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Copies of every live (resolved) device
    pub fn services(&self) -> Vec<ServiceDescription> {
        self.inner.registry.live_services()
    }

    pub fn service(&self, uuid: &str) -> Option<ServiceDescription> {
        self.inner.registry.live(uuid)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    #[cfg(test)]
    pub(crate) fn active_receivers(&self) -> usize {
        self.inner.active_receivers.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("state", &self.state())
            .field("filters", &self.inner.filters().len())
            .field("live", &self.inner.registry.live_count())
            .field("pending", &self.inner.registry.pending_count())
            .field("context_active", &self.inner.context.is_active())
            .finish()
    }
}

impl EngineInner {
    fn filters(&self) -> Arc<Vec<DiscoveryFilter>> {
        Arc::clone(&self.filters.read())
    }

    fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut state = self.state.write();
            if *state == EngineState::Running {
                return Ok(());
            }
            *state = EngineState::Starting;
        }

        let address = match self.address_provider.local_address().ok_or(DiscoveryError::NoAddress) {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!("Discovery not started: {}", e);
                *self.state.write() = EngineState::Stopped;
                return Ok(());
            }
        };

        let transport = match (self.opener)(address, &self.config) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(%address, "Failed to open SSDP transport: {}", e);
                *self.state.write() = EngineState::Stopped;
                return Ok(());
            }
        };

        if let Err(e) = self.launch(transport) {
            tracing::error!("Failed to start discovery: {}", e);
            self.teardown();
            *self.state.write() = EngineState::Stopped;
            return Err(e);
        }
        *self.state.write() = EngineState::Running;

        // Started last so the first tick already sees Running
        let source = self.self_ref.clone();
        if let Err(e) = self.scheduler.start(move || {
            if let Some(inner) = source.upgrade() {
                inner.rescan();
            }
        }) {
            tracing::error!("Failed to start discovery: {}", e);
            *self.state.write() = EngineState::Stopping;
            self.teardown();
            *self.state.write() = EngineState::Stopped;
            return Err(e);
        }

        tracing::info!(%address, filters = self.filters().len(), "SSDP discovery started");
        Ok(())
    }

    fn launch(&self, transport: Arc<dyn Transport>) -> Result<()> {
        *self.transport.write() = Some(Arc::clone(&transport));
        self.context.start()?;
        self.spawn_receiver(ReceiveSide::Response, Arc::clone(&transport))?;
        self.spawn_receiver(ReceiveSide::Multicast, transport)?;
        Ok(())
    }

    fn spawn_receiver(&self, receiver: ReceiveSide, transport: Arc<dyn Transport>) -> Result<()> {
        let source = self.self_ref.clone();
        let active = Arc::clone(&self.active_receivers);
        active.fetch_add(1, Ordering::AcqRel);

        let spawned = thread::Builder::new()
            .name(receiver.thread_name().to_string())
            .spawn(move || {
                receive_loop(receiver, transport.as_ref(), &source);
                active.fetch_sub(1, Ordering::AcqRel);
            });

        if let Err(e) = spawned {
            self.active_receivers.fetch_sub(1, Ordering::AcqRel);
            return Err(DiscoveryError::Runtime(format!(
                "Failed to spawn {} thread: {}",
                receiver.thread_name(),
                e
            )));
        }
        Ok(())
    }

    fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        {
            // Waits for in-flight promotions and sweeps holding the read side
            let mut state = self.state.write();
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopping;
        }

        self.teardown();
        *self.state.write() = EngineState::Stopped;
        tracing::info!("SSDP discovery stopped");
    }

    fn teardown(&self) {
        self.scheduler.cancel();
        if let Some(transport) = self.transport.write().take() {
            transport.close();
        }
        self.context.stop();
    }

    fn rescan(&self) {
        let state = self.state.read();
        if *state != EngineState::Running {
            tracing::debug!(state = ?*state, "rescan ignored, engine not running");
            return;
        }

        let transport = self.transport.read().clone();
        self.scheduler.sweep(
            &self.registry,
            &self.dispatcher,
            &self.filters(),
            transport.as_ref(),
        );
    }

    fn handle_datagram(&self, datagram: Datagram) {
        match SsdpPacket::decode(&datagram.payload, datagram.sender) {
            Some(packet) => self.handle_packet(&packet),
            None => tracing::trace!(sender = %datagram.sender, "discarding undecodable datagram"),
        }
    }

    pub(crate) fn handle_packet(&self, packet: &SsdpPacket) {
        if packet.packet_type == PacketType::SearchRequest {
            return;
        }
        let Some(service_key) = packet.service_key() else {
            return;
        };

        let filters = self.filters();
        if !filters.iter().any(|f| f.protocol_filter == service_key) {
            return;
        }
        let Some(uuid) = packet.uuid() else {
            return;
        };

        if packet.is_bye_bye() {
            self.registry.discard_pending(uuid);
            if let Some(record) = self.registry.remove_bye_bye(uuid) {
                tracing::info!(uuid = %uuid, filter = %service_key, "device said byebye");
                self.dispatcher.notify_removed(&record, &filters);
            }
            return;
        }

        if self.registry.touch(uuid) {
            return;
        }

        let Some(location) = packet.location() else {
            return;
        };

        let record = ServiceDescription::new(
            uuid,
            service_key,
            packet.sender.ip().to_string(),
            self.config.default_port,
            location,
        );
        if self.registry.mark_pending(uuid, record) {
            tracing::debug!(uuid = %uuid, %location, "new device, resolving description");
            self.resolve_async(uuid.to_string(), location.to_string(), service_key.to_string());
        }
    }

    fn resolve_async(&self, uuid: String, location: String, protocol_filter: String) {
        let source = self.self_ref.clone();
        let resolver = Arc::clone(&self.resolver);
        let pending_uuid = uuid.clone();

        let queued = self.context.run_in_background(move || {
            let result = resolver.resolve(&location, &protocol_filter);
            if let Some(inner) = source.upgrade() {
                inner.complete_resolution(&uuid, result);
            }
        });

        if !queued {
            self.registry.discard_pending(&pending_uuid);
        }
    }

    fn complete_resolution(&self, uuid: &str, result: Result<DeviceMetadata>) {
        let state = self.state.read();
        match result {
            Ok(metadata) if *state == EngineState::Running => {
                if let Some(record) = self.registry.promote(uuid, metadata) {
                    tracing::info!(
                        uuid = %uuid,
                        name = record.friendly_name.as_deref().unwrap_or("-"),
                        ip = %record.ip_address,
                        "device added"
                    );
                    self.dispatcher.notify_added(&record, &self.filters());
                }
            }
            Ok(_) => {
                tracing::debug!(uuid = %uuid, "engine no longer running, dropping resolved device");
                self.registry.discard_pending(uuid);
            }
            Err(e) => {
                tracing::debug!(uuid = %uuid, "Failed to resolve device description: {}", e);
                self.registry.discard_pending(uuid);
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(receiver: ReceiveSide, transport: &dyn Transport, source: &Weak<EngineInner>) {
    loop {
        match receiver.receive(transport) {
            Ok(datagram) => {
                let Some(inner) = source.upgrade() else {
                    break;
                };
                inner.handle_datagram(datagram);
            }
            Err(e) if e.is_closed() => {
                tracing::debug!(receiver = receiver.thread_name(), "transport closed, receiver exiting");
                break;
            }
            Err(e) => {
                tracing::error!(
                    receiver = receiver.thread_name(),
                    "Receive failed, receiver stopped until restart: {}",
                    e
                );
                break;
            }
        }
    }
}

/// Builder for [`DiscoveryEngine`]
pub struct DiscoveryEngineBuilder {
    config: DiscoveryConfig,
    address_provider: Option<Arc<dyn AddressProvider>>,
    opener: Option<TransportOpener>,
    resolver: Option<Arc<dyn DescriptionResolver>>,
    context: Option<Arc<DiscoveryContext>>,
}

impl DiscoveryEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: DiscoveryConfig::default(),
            address_provider: None,
            opener: None,
            resolver: None,
            context: None,
        }
    }

    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address_provider<A>(mut self, provider: A) -> Self
    where
        A: AddressProvider + 'static,
    {
        self.address_provider = Some(Arc::new(provider));
        self
    }

    /// Replace the UDP transport, e.g. with an in-memory one
    pub fn transport_opener(mut self, opener: TransportOpener) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: DescriptionResolver + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Execution context; started and stopped by the engine
    pub fn context(mut self, context: Arc<DiscoveryContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<DiscoveryEngine> {
        let config = self.config;
        let address_provider = self
            .address_provider
            .unwrap_or_else(|| Arc::new(AutoDetectAddress));
        let opener = self.opener.unwrap_or_else(udp_opener);
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(HttpDescriptionResolver::new(config.http_timeout)?),
        };
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(DiscoveryContext::new(config.resolver_threads)));

        DiscoveryEngine::assemble(config, address_provider, opener, resolver, context)
    }
}

impl Default for DiscoveryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
