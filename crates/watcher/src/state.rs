//! Engine lifecycle and the event sink
//!
//! The state only moves forward: `Starting -> Ready -> Closed`. Every
//! emission takes the state lock and checks for `Closed`, and `close()`
//! takes the same lock, so once `close()` returns nothing else is sent.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::Event;

/// Lifecycle state of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Initial discovery in progress, raw notifications are discarded
    Starting,
    /// `Ready` was delivered
    Ready,
    /// Terminal
    Closed,
}

/// Shared state flag plus the shutdown signal for the engine task
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<EngineState>,
    shutdown: Notify,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Starting),
            shutdown: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == EngineState::Closed
    }

    /// Move to `Closed`. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Closed {
                return false;
            }
            *state = EngineState::Closed;
        }
        // Stores a permit if the engine is not currently waiting
        self.shutdown.notify_one();
        true
    }

    /// Resolves once `close()` has been called
    pub(crate) async fn closed(&self) {
        loop {
            let notified = self.shutdown.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

/// Sends public events while honoring the lifecycle
#[derive(Debug)]
pub(crate) struct Emitter {
    tx: mpsc::UnboundedSender<Event>,
    lifecycle: Arc<Lifecycle>,
    metrics: Option<Arc<dyn Metrics>>,
}

impl Emitter {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Event>,
        lifecycle: Arc<Lifecycle>,
        metrics: Option<Arc<dyn Metrics>>,
    ) -> Self {
        Self {
            tx,
            lifecycle,
            metrics,
        }
    }

    /// Sender clone whose `closed()` resolves once the `Watcher` is dropped
    pub(crate) fn receiver_watch(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Deliver `event` unless the engine is closed. Returns whether it was sent.
    pub(crate) fn emit(&self, event: Event) -> bool {
        let state = self.lifecycle.state.lock();
        if *state == EngineState::Closed {
            return false;
        }
        self.send(event)
    }

    /// Move `Starting -> Ready` and deliver `Ready`
    pub(crate) fn ready(&self) -> bool {
        let mut state = self.lifecycle.state.lock();
        if *state != EngineState::Starting {
            return false;
        }
        *state = EngineState::Ready;
        info!("Watcher ready");
        self.send(Event::Ready)
    }

    fn send(&self, event: Event) -> bool {
        if let Some(metrics) = &self.metrics {
            metrics.emitted(&event);
        }
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                // Receiver is gone, the event has nowhere to go
                debug!("Dropped {} event, no receiver", event.name());
                false
            }
        }
    }
}
