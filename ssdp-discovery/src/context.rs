//! Execution context for background work and listener delivery
//!
//! The engine owns one context for its whole life. A tokio runtime is built
//! when the engine starts and shut down when it stops, so a stopped engine
//! holds no threads. Blocking work (description fetches, listener callbacks,
//! sweeps) runs under `spawn_blocking`; async tasks only do the waiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{DiscoveryError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Active {
    runtime: Runtime,
    permits: Arc<Semaphore>,
    delivery: mpsc::UnboundedSender<Job>,
}

/// Background work bounded by a permit count plus a serialized delivery queue
pub struct DiscoveryContext {
    background_threads: usize,
    active: RwLock<Option<Active>>,
}

impl DiscoveryContext {
    /// `background_threads` bounds how many description fetches run at once
    pub fn new(background_threads: usize) -> Self {
        Self {
            background_threads: background_threads.max(1),
            active: RwLock::new(None),
        }
    }

    /// Build the runtime and the delivery task; no-op while already active
    pub fn start(&self) -> Result<()> {
        let mut active = self.active.write();
        if active.is_some() {
            return Ok(());
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ssdp-runtime")
            .enable_all()
            .build()
            .map_err(|e| DiscoveryError::Runtime(format!("Failed to create tokio runtime: {}", e)))?;

        let (delivery, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_delivery(queue));

        tracing::trace!(background = self.background_threads, "execution context started");
        *active = Some(Active {
            runtime,
            permits: Arc::new(Semaphore::new(self.background_threads)),
            delivery,
        });
        Ok(())
    }

    /// Shut the runtime down without waiting for it
    ///
    /// Timers, queued deliveries and fetches still waiting for a permit are
    /// dropped. Blocking work that already started runs to completion.
    pub fn stop(&self) {
        if let Some(active) = self.active.write().take() {
            active.runtime.shutdown_background();
            tracing::trace!("execution context stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    /// Run `job` off the caller's thread; `false` if the context is stopped
    pub fn run_in_background<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.active.read();
        let Some(active) = guard.as_ref() else {
            return false;
        };

        let permits = Arc::clone(&active.permits);
        active.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                if e.is_panic() {
                    tracing::error!("background task panicked");
                }
            }
        });
        true
    }

    /// Queue `job` for the delivery task; jobs run one at a time in order
    pub fn deliver<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.active
            .read()
            .as_ref()
            .map_or(false, |active| active.delivery.send(Box::new(job)).is_ok())
    }

    /// Spawn an async task on the runtime; `None` if the context is stopped
    pub(crate) fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.active
            .read()
            .as_ref()
            .map(|active| active.runtime.spawn(task))
    }

    /// Run `tick` after `initial_delay`, then every `period`
    ///
    /// Ticks never overlap: a tick that overruns delays the next one.
    pub(crate) fn spawn_periodic<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        tick: F,
    ) -> Option<JoinHandle<()>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tick = Arc::new(tick);
        self.spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let tick = Arc::clone(&tick);
                if let Err(e) = tokio::task::spawn_blocking(move || (*tick)()).await {
                    if e.is_panic() {
                        tracing::error!("periodic task panicked");
                    }
                }
            }
        })
    }
}

impl Default for DiscoveryContext {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Drop for DiscoveryContext {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_delivery(mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = queue.recv().await {
        if let Err(e) = tokio::task::spawn_blocking(job).await {
            if e.is_panic() {
                tracing::error!("listener callback panicked");
            }
        }
    }
}
