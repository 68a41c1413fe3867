//! Per-job cancellation channels.
//!
//! Each job gets a one-slot crossbeam channel. The coordinator keeps the
//! sending half in a [`CancelRegistry`]; the worker polls the receiving half
//! at page boundaries. A buffered signal is still observed after the sender
//! has been dropped. A closed channel without a buffered signal is not a
//! cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use uuid::Uuid;

/// Receiving half of a job's cancellation channel.
#[derive(Debug)]
pub struct CancelSignal {
    receiver: Receiver<()>,
    fired: AtomicBool,
}

impl CancelSignal {
    fn new(receiver: Receiver<()>) -> Self {
        Self {
            receiver,
            fired: AtomicBool::new(false),
        }
    }

    /// A signal with no sender; it never fires.
    pub fn detached() -> Self {
        let (_, rx) = bounded(1);
        Self::new(rx)
    }

    /// Non-blocking check. Once observed, stays cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(()) => {
                self.fired.store(true, Ordering::Release);
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }
}

/// Sending halves of all live cancellation channels, keyed by job id.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    senders: Mutex<HashMap<Uuid, Sender<()>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Sender<()>>> {
        self.senders.lock().unwrap_or_else(|poisoned| {
            log::warn!("Cancel registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Creates the channel for `id` and returns its receiving half.
    /// Replaces any previous registration for the same id.
    pub fn register(&self, id: Uuid) -> CancelSignal {
        let (tx, rx) = bounded(1);
        self.lock().insert(id, tx);
        CancelSignal::new(rx)
    }

    /// Sends a cancellation without blocking and removes the registration.
    /// Returns `false` when no channel was registered for `id`.
    pub fn signal(&self, id: Uuid) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => {
                // Full means a signal is already pending.
                let _ = tx.try_send(());
                true
            }
            None => false,
        }
    }

    /// Removes the registration, closing the channel.
    pub fn retire(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of registered job ids.
    pub fn ids(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsignalled_channel_is_not_cancelled() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let signal = registry.register(id);

        assert!(!signal.is_cancelled());
        assert!(registry.contains(id));
    }

    #[test]
    fn test_signal_survives_sender_drop() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let signal = registry.register(id);

        assert!(registry.signal(id));
        assert!(!registry.contains(id));
        assert!(signal.is_cancelled());
        // Latched.
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_retired_channel_is_not_cancelled() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let signal = registry.register(id);

        assert!(registry.retire(id));
        assert!(!signal.is_cancelled());
        assert!(!registry.retire(id));
    }

    #[test]
    fn test_signal_unknown_id() {
        let registry = CancelRegistry::new();
        assert!(!registry.signal(Uuid::new_v4()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detached_never_fires() {
        assert!(!CancelSignal::detached().is_cancelled());
    }

    #[test]
    fn test_ids_snapshot() {
        let registry = CancelRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _sa = registry.register(a);
        let _sb = registry.register(b);

        let mut ids = registry.ids();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(registry.len(), 2);
    }
}
