//! Interrupt and pause signal bus
//!
//! Each workspace has at most one armed listener: the evaluation currently
//! racing there. Firing a signal delivers it to that listener once; firing
//! with nobody listening, or firing a signal the listener does not accept,
//! is a no-op.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::WorkspaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Interrupt,
    Pause,
}

struct Listener {
    id: u64,
    accepts_pause: bool,
    pause_delivered: bool,
    tx: mpsc::UnboundedSender<Signal>,
}

type Listeners = Arc<Mutex<HashMap<WorkspaceId, Listener>>>;

#[derive(Clone, Default)]
pub struct SignalBus {
    listeners: Listeners,
    next_id: Arc<AtomicU64>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the racing evaluation for a workspace
    ///
    /// The listener stays armed until the returned receiver is dropped or an
    /// interrupt is delivered.
    pub fn arm(&self, workspace: WorkspaceId, accepts_pause: bool) -> SignalReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let listener = Listener {
            id,
            accepts_pause,
            pause_delivered: false,
            tx,
        };

        let mut listeners = self.lock();
        if listeners.insert(workspace.clone(), listener).is_some() {
            warn!(%workspace, "replaced an armed signal listener");
        }

        SignalReceiver {
            workspace,
            id,
            rx,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Deliver a signal to the workspace's racing evaluation
    ///
    /// Returns whether a listener received it.
    pub fn fire(&self, workspace: &WorkspaceId, signal: Signal) -> bool {
        let mut listeners = self.lock();

        let Some(listener) = listeners.get_mut(workspace) else {
            debug!(%workspace, ?signal, "no evaluation in flight, signal ignored");
            return false;
        };

        match signal {
            Signal::Pause if !listener.accepts_pause || listener.pause_delivered => {
                debug!(%workspace, "pause not accepted by the running evaluation");
                return false;
            }
            Signal::Pause => listener.pause_delivered = true,
            Signal::Interrupt => {}
        }

        let delivered = listener.tx.send(signal).is_ok();

        // Interrupt ends the race; later signals have nobody to reach
        if signal == Signal::Interrupt {
            listeners.remove(workspace);
        }

        delivered
    }

    /// Whether an evaluation is currently listening on the workspace
    pub fn is_armed(&self, workspace: &WorkspaceId) -> bool {
        self.lock().contains_key(workspace)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WorkspaceId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end held by the racing evaluation
pub struct SignalReceiver {
    workspace: WorkspaceId,
    id: u64,
    rx: mpsc::UnboundedReceiver<Signal>,
    listeners: Listeners,
}

impl SignalReceiver {
    /// Next delivered signal; `None` once the listener was disarmed
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// A signal delivered but not yet received, if any
    pub fn try_recv(&mut self) -> Option<Signal> {
        self.rx.try_recv().ok()
    }

    /// Change whether pauses reach this listener, keeping it armed
    pub fn accept_pause(&self, accepts_pause: bool) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = listeners
            .get_mut(&self.workspace)
            .filter(|listener| listener.id == self.id)
        {
            listener.accepts_pause = accepts_pause;
        }
    }
}

impl Drop for SignalReceiver {
    fn drop(&mut self) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners
            .get(&self.workspace)
            .is_some_and(|listener| listener.id == self.id)
        {
            listeners.remove(&self.workspace);
        }
    }
}
