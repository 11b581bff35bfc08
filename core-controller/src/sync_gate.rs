//! Initial-sync barrier.
//!
//! A gate opens once the informer has installed its first snapshot and
//! dispatched every notification that snapshot produced. Workers wait on it
//! so nothing is reconciled against a half-populated mirror.

use core_async::sync::{watch, CancellationToken};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SyncGate {
    state: Arc<watch::Sender<bool>>,
}

impl SyncGate {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub(crate) fn mark_synced(&self) {
        self.state.send_replace(true);
    }

    /// Non-blocking probe.
    pub fn has_synced(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the gate opens. If `cancel` fires first the result is the
    /// gate's state at that moment, so an already-open gate still reports
    /// `true`.
    pub async fn wait_until_synced(&self, cancel: &CancellationToken) -> bool {
        let mut synced = self.state.subscribe();
        core_async::select! {
            biased;
            result = synced.wait_for(|synced| *synced) => result.is_ok(),
            _ = cancel.cancelled() => self.has_synced(),
        }
    }
}

impl std::fmt::Debug for SyncGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGate")
            .field("synced", &self.has_synced())
            .finish()
    }
}

/// Waits for every gate. Returns `false` as soon as cancellation wins.
pub async fn wait_for_cache_sync(gates: &[SyncGate], cancel: &CancellationToken) -> bool {
    info!(caches = gates.len(), "Waiting for caches to sync");
    for gate in gates {
        if !gate.wait_until_synced(cancel).await {
            return false;
        }
    }
    info!("Caches are synced");
    true
}
