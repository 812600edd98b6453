//! Call coordinator
//!
//! The coordinator is the single serialized context that owns every piece of
//! call state: identities, pending actions, the active-call set and audio
//! focus. It is split the same way across files as its responsibilities:
//!
//! - `actor`: state, main loop, teardown
//! - `submission`: application-originated requests and incoming reports
//! - `router`: authority-originated perform requests and advisories
//! - `handle`: the cloneable [`CallCoordinator`] API
//! - `builder`: availability gating and spawning

mod actor;
mod builder;
mod handle;
mod router;
mod submission;

pub use builder::CoordinatorBuilder;
pub use handle::{BridgeSnapshot, CallCoordinator, PendingOutcome, StartedCall};
