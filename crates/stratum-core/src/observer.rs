//! Observer bus: fire-and-forget fan-out of call events
//!
//! Every registered listener receives each event on its own spawned task.
//! A slow, failing or panicking listener never delays or fails the call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{error, trace, warn};

use crate::event::CallEvent;

/// Receives call lifecycle events.
#[async_trait]
pub trait CallListener: Send + Sync + 'static {
    async fn on_event(&self, event: &CallEvent) -> anyhow::Result<()>;
}

/// A simple listener that invokes a closure.
pub struct FnCallListener<F>
where
    F: Fn(&CallEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnCallListener<F>
where
    F: Fn(&CallEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> CallListener for FnCallListener<F>
where
    F: Fn(&CallEvent) + Send + Sync + 'static,
{
    async fn on_event(&self, event: &CallEvent) -> anyhow::Result<()> {
        (self.f)(event);
        Ok(())
    }
}

/// Registry of named listeners owned by one client instance.
#[derive(Default)]
pub struct ObserverBus {
    listeners: DashMap<String, Arc<dyn CallListener>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `name`, replacing and returning any
    /// listener previously registered under the same name.
    pub fn register<L: CallListener>(
        &self,
        name: impl Into<String>,
        listener: L,
    ) -> Option<Arc<dyn CallListener>> {
        self.register_shared(name, Arc::new(listener))
    }

    pub fn register_shared(
        &self,
        name: impl Into<String>,
        listener: Arc<dyn CallListener>,
    ) -> Option<Arc<dyn CallListener>> {
        self.listeners.insert(name.into(), listener)
    }

    /// Remove the listener registered under `name`; returns whether one was.
    pub fn unregister(&self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Dispatch `event` to every listener without waiting for any of them.
    pub fn publish(&self, event: CallEvent) {
        if self.listeners.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(kind = %event.kind, "No async runtime, dropping call event");
            return;
        };

        let targets: Vec<(String, Arc<dyn CallListener>)> = self
            .listeners
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let event = Arc::new(event);
        for (name, listener) in targets {
            let event = event.clone();
            runtime.spawn(async move {
                match AssertUnwindSafe(listener.on_event(&event))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => trace!(listener = %name, kind = %event.kind, "Delivered call event"),
                    Ok(Err(e)) => warn!(listener = %name, kind = %event.kind, error = %e, "Call listener failed"),
                    Err(_) => error!(listener = %name, kind = %event.kind, "Call listener panicked"),
                }
            });
        }
    }
}
