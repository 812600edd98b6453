//! Set of calls the authority currently considers live

use std::collections::HashSet;
use tokio::sync::watch;

use crate::types::CallIdentity;

/// Live call identities plus the derived "has active calls" signal
///
/// The signal is only published after a mutation has been applied and only
/// when its value actually flips.
pub struct ActiveCallSet {
    calls: HashSet<CallIdentity>,
    has_active_tx: watch::Sender<bool>,
}

impl ActiveCallSet {
    pub fn new() -> Self {
        let (has_active_tx, _) = watch::channel(false);
        Self {
            calls: HashSet::new(),
            has_active_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.has_active_tx.subscribe()
    }

    /// Add a call; returns the new signal value if it changed
    pub fn insert(&mut self, identity: CallIdentity) -> Option<bool> {
        self.calls.insert(identity);
        self.publish()
    }

    /// Remove a call; returns the new signal value if it changed
    pub fn remove(&mut self, identity: &CallIdentity) -> Option<bool> {
        self.calls.remove(identity);
        self.publish()
    }

    /// Drop every call; returns the removed identities and any signal change
    pub fn clear(&mut self) -> (Vec<CallIdentity>, Option<bool>) {
        let removed: Vec<_> = self.calls.drain().collect();
        (removed, self.publish())
    }

    pub fn contains(&self, identity: &CallIdentity) -> bool {
        self.calls.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn identities(&self) -> Vec<CallIdentity> {
        let mut identities: Vec<_> = self.calls.iter().copied().collect();
        identities.sort();
        identities
    }

    fn publish(&self) -> Option<bool> {
        let has_active = !self.calls.is_empty();
        let changed = self.has_active_tx.send_if_modified(|current| {
            if *current == has_active {
                false
            } else {
                *current = has_active;
                true
            }
        });
        changed.then_some(has_active)
    }
}
