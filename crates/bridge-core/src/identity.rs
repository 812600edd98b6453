//! Call identity map
//!
//! Associates each live [`CallIdentity`] with its [`CallRecord`] and remembers
//! which identities have already been reported to the authority as incoming.
//! This component only manages its own storage; it never talks to the
//! authority.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::{CallHandle, CallIdentity, CallPhase, CallRecord, PeerId};

#[derive(Debug, Default)]
pub struct CallIdentityMap {
    records: HashMap<CallIdentity, CallRecord>,
    reported_incoming: HashSet<CallIdentity>,
}

impl CallIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh identity and record for an outgoing call
    pub fn allocate(&mut self, peer: Option<PeerId>, display_title: &str, is_video: bool) -> CallIdentity {
        let identity = CallIdentity::new();
        // A v4 collision means the RNG is broken, not that the caller erred.
        debug_assert!(
            !self.records.contains_key(&identity),
            "call identity collision: {}",
            identity
        );
        self.records
            .insert(identity, CallRecord::new(identity, peer, display_title, is_video));
        debug!("Allocated call identity {} for peer {:?}", identity, peer);
        identity
    }

    /// Register a record under an identity chosen by someone else
    ///
    /// Returns `false` and leaves the existing record alone if the identity is
    /// already known.
    pub fn insert(&mut self, record: CallRecord) -> bool {
        if self.records.contains_key(&record.identity) {
            return false;
        }
        debug!("Registered call identity {}", record.identity);
        self.records.insert(record.identity, record);
        true
    }

    pub fn lookup_peer(&self, identity: &CallIdentity) -> Option<PeerId> {
        self.records.get(identity).and_then(|record| record.peer)
    }

    pub fn record(&self, identity: &CallIdentity) -> Option<&CallRecord> {
        self.records.get(identity)
    }

    pub fn contains(&self, identity: &CallIdentity) -> bool {
        self.records.contains_key(identity)
    }

    pub fn set_handle(&mut self, identity: &CallIdentity, handle: CallHandle) {
        if let Some(record) = self.records.get_mut(identity) {
            record.handle = Some(handle);
        }
    }

    /// Move a record forward; backwards or repeated transitions are ignored
    ///
    /// Returns the previous phase when the record actually changed.
    pub fn advance_phase(&mut self, identity: &CallIdentity, phase: CallPhase) -> Option<CallPhase> {
        let record = self.records.get_mut(identity)?;
        if !record.phase.can_advance_to(phase) {
            debug!(
                "Ignoring phase change {:?} -> {:?} for call {}",
                record.phase, phase, identity
            );
            return None;
        }
        let previous = record.phase;
        record.phase = phase;
        if phase.is_terminal() && record.ended_at.is_none() {
            record.ended_at = Some(Utc::now());
        }
        Some(previous)
    }

    /// Forget a call; removing an unknown identity is not an error
    pub fn remove(&mut self, identity: &CallIdentity) -> Option<CallRecord> {
        let removed = self.records.remove(identity);
        if removed.is_some() {
            debug!("Removed call identity {}", identity);
        }
        removed
    }

    /// Mark an identity as reported; `false` if it already was
    pub fn mark_reported(&mut self, identity: CallIdentity) -> bool {
        self.reported_incoming.insert(identity)
    }

    pub fn records(&self) -> impl Iterator<Item = &CallRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
