//! Registry of in-flight asynchronous operations
//!
//! Every authority request and every application handler invocation the
//! coordinator starts is registered here together with the continuation that
//! must run when it completes. An entry leaves the registry exactly once:
//! either it is resolved by its completion, or it is cancelled. Whichever
//! happens first wins; the loser finds nothing and does nothing.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier of a registered operation
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

struct OperationEntry<T> {
    label: String,
    token: CancellationToken,
    payload: T,
    registered_at: Instant,
}

/// Arena of cancellable operations keyed by [`OperationId`]
///
/// The registry is owned by a single coordinator and is not shared; the
/// tokens it hands out are the only thing that crosses task boundaries.
pub struct OperationRegistry<T> {
    name: String,
    next_id: u64,
    entries: HashMap<OperationId, OperationEntry<T>>,
    root: CancellationToken,
}

impl<T> OperationRegistry<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: 0,
            entries: HashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// Register an operation and get the token its task must watch
    pub fn register(&mut self, label: impl Into<String>, payload: T) -> (OperationId, CancellationToken) {
        let id = OperationId(self.next_id);
        self.next_id += 1;

        let label = label.into();
        let token = self.root.child_token();
        debug!("{}: registered {} ({})", self.name, id, label);

        self.entries.insert(
            id,
            OperationEntry {
                label,
                token: token.clone(),
                payload,
                registered_at: Instant::now(),
            },
        );
        (id, token)
    }

    /// Remove a completed operation and hand back its payload
    ///
    /// Returns `None` if the operation was already resolved or cancelled.
    pub fn resolve(&mut self, id: OperationId) -> Option<T> {
        let entry = self.entries.remove(&id)?;
        debug!(
            "{}: resolved {} ({}) after {:?}",
            self.name,
            id,
            entry.label,
            entry.registered_at.elapsed()
        );
        Some(entry.payload)
    }

    /// Cancel a single operation and hand back its payload
    pub fn cancel(&mut self, id: OperationId) -> Option<T> {
        let entry = self.entries.remove(&id)?;
        entry.token.cancel();
        debug!("{}: cancelled {} ({})", self.name, id, entry.label);
        Some(entry.payload)
    }

    /// Cancel everything still registered
    ///
    /// Payloads come back in registration order so callers can fail them
    /// deterministically.
    pub fn cancel_all(&mut self) -> Vec<T> {
        self.root.cancel();

        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        if !entries.is_empty() {
            debug!("{}: cancelled {} outstanding operations", self.name, entries.len());
        }

        // Later registrations get a fresh root so the registry stays usable.
        self.root = CancellationToken::new();
        entries.into_iter().map(|(_, entry)| entry.payload).collect()
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> fmt::Debug for OperationRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("name", &self.name)
            .field("outstanding", &self.entries.len())
            .finish()
    }
}
