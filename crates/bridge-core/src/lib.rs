//! # Callbridge Core - Call Session Coordination
//!
//! Coordinates call sessions between a host telephony authority (the system
//! component that owns call UI, ringing, lock-screen controls and audio
//! routing) and an application's own call-signaling layer.
//!
//! The application asks the bridge to start, answer, end, or mute calls and
//! to report incoming ones. The authority asks the bridge to *perform* those
//! actions and tells it about resets and audio-session changes. The bridge
//! keeps both sides consistent:
//!
//! - every call attempt gets a fresh [`CallIdentity`](types::CallIdentity)
//! - every submitted action resolves exactly once
//! - an incoming call is surfaced to the authority at most once
//! - audio routing requested before activation is applied on activation
//! - observers see a deduplicated "has active calls" signal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use callbridge_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(host: Arc<dyn TelephonyAuthority>, app: Arc<dyn CallHandler>) -> BridgeResult<()> {
//! let Some(coordinator) = CallCoordinator::builder(host).handler(app).build() else {
//!     // Fall back to in-app call UI
//!     return Ok(());
//! };
//!
//! let call = coordinator
//!     .submit_start(StartCallRequest::new(AccountContext::new("acct-1"), PeerId(42), "Alice"))
//!     .await?;
//! call.outcome.await?;
//!
//! coordinator.submit_end(call.identity).await?.await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! All state is owned by one tokio task behind [`CallCoordinator`]. Authority
//! requests and application handler invocations run as spawned futures
//! registered in an [`OperationRegistry`](registry::OperationRegistry); their
//! completions are posted back to the coordinator task, so callbacks and
//! submissions never race.

pub mod active;
pub mod audio;
pub mod authority;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handler;
pub mod identity;
pub mod registry;
pub mod types;

// Re-export main types
pub use coordinator::{BridgeSnapshot, CallCoordinator, CoordinatorBuilder, PendingOutcome, StartedCall};
pub use error::{AuthorityError, BridgeError, BridgeResult};
pub use events::{BridgeEvent, EventStream};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything needed to wire a coordinator to a host and an application
pub mod prelude {
    pub use crate::audio::{AudioFocusState, AudioSessionControl};
    pub use crate::authority::{
        ActionParams, ActionRequest, ActionResolution, ActionResponder, AuthorityEvent, StartCallInteraction,
        TelephonyAuthority,
    };
    pub use crate::config::{BridgeConfig, PlatformAvailability, ProviderConfiguration};
    pub use crate::coordinator::{BridgeSnapshot, CallCoordinator, CoordinatorBuilder, PendingOutcome, StartedCall};
    pub use crate::error::{AuthorityError, BridgeError, BridgeResult};
    pub use crate::events::{BridgeEvent, EventStream};
    pub use crate::handler::CallHandler;
    pub use crate::types::{
        AccountContext, ActionKind, AudioRouteMode, CallEndedReason, CallHandle, CallIdentity, CallPhase,
        CallRecord, CallUpdate, CallbackKind, HandleKind, IncomingCallReport, PeerId, StartCallRequest,
    };
}
