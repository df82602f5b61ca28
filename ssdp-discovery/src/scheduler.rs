//! Periodic eviction and search
//!
//! The periodic sweep runs on the context's runtime. Each filter's repeated
//! searches get their own task, so the sends of one filter stay in order while
//! different filters go out concurrently.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::DiscoveryConfig;
use crate::context::DiscoveryContext;
use crate::dispatcher::NotificationDispatcher;
use crate::error::{DiscoveryError, Result};
use crate::packet::search_message;
use crate::registry::ServiceRegistry;
use crate::service::DiscoveryFilter;
use crate::ssdp::Transport;

pub(crate) struct SearchScheduler {
    config: DiscoveryConfig,
    context: Arc<DiscoveryContext>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SearchScheduler {
    pub(crate) fn new(config: DiscoveryConfig, context: Arc<DiscoveryContext>) -> Self {
        Self {
            config,
            context,
            timer: Mutex::new(None),
        }
    }

    /// Run `tick` after `initial_delay`, then every `rescan_interval`
    ///
    /// Replaces a previously started timer. Fails while the context is stopped.
    pub(crate) fn start<F>(&self, tick: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let timer = self
            .context
            .spawn_periodic(self.config.initial_delay, self.config.rescan_interval, tick)
            .ok_or_else(|| {
                DiscoveryError::Runtime("Failed to schedule periodic search".to_string())
            })?;

        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop the periodic timer; a sweep already running finishes
    pub(crate) fn cancel(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    /// One sweep: evict silent devices, then send the searches
    pub(crate) fn sweep(
        &self,
        registry: &ServiceRegistry,
        dispatcher: &NotificationDispatcher,
        filters: &[DiscoveryFilter],
        transport: Option<&Arc<dyn Transport>>,
    ) {
        // `checked_sub` fails only when the process is younger than the timeout
        if let Some(cutoff) = Instant::now().checked_sub(self.config.timeout) {
            for record in registry.evict_expired(cutoff) {
                tracing::debug!(uuid = %record.uuid, "device timed out");
                dispatcher.notify_removed(&record, filters);
            }
        }

        if filters.is_empty() {
            tracing::warn!("There are no filters added");
            return;
        }

        let Some(transport) = transport else {
            tracing::debug!("no open transport, skipping search");
            return;
        };

        for filter in filters {
            let message = search_message(
                &filter.protocol_filter,
                self.config.search_mx,
                &self.config.user_agent,
            );
            let transport = Arc::clone(transport);
            let st = filter.protocol_filter.clone();
            let repeats = self.config.search_repeats;
            let spacing = self.config.search_spacing;

            let spawned = self.context.spawn(async move {
                let start = tokio::time::Instant::now();
                for attempt in 0..repeats {
                    tokio::time::sleep_until(start + spacing * attempt).await;
                    match transport.send(&message) {
                        Ok(()) => tracing::trace!(filter = %st, attempt, "M-SEARCH sent"),
                        Err(DiscoveryError::TransportClosed) => return,
                        Err(e) => tracing::error!(filter = %st, "Failed to send search: {}", e),
                    }
                }
            });

            if spawned.is_none() {
                tracing::debug!(filter = %filter.protocol_filter, "execution context stopped, search skipped");
            }
        }
    }
}

impl Drop for SearchScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
