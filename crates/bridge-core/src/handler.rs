//! Application-side handler contract
//!
//! The coordinator forwards authority perform requests to the application's
//! signaling layer through [`CallHandler`]. Start and end are asynchronous
//! and report success; answer, mute and audio-session changes are
//! fire-and-forget.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use callbridge_core::handler::CallHandler;
//! use callbridge_core::types::{AccountContext, CallIdentity, CallbackKind, PeerId};
//!
//! struct Signaling;
//!
//! #[async_trait]
//! impl CallHandler for Signaling {
//!     async fn on_start(
//!         &self,
//!         _context: AccountContext,
//!         identity: CallIdentity,
//!         peer: Option<PeerId>,
//!         _handle: String,
//!         _is_video: bool,
//!     ) -> bool {
//!         println!("placing call {} to {:?}", identity, peer);
//!         true
//!     }
//!
//!     fn on_answer(&self, _identity: CallIdentity) {}
//!
//!     async fn on_end(&self, _identity: CallIdentity) -> bool {
//!         true
//!     }
//!
//!     fn on_mute(&self, _identity: CallIdentity, _muted: bool) {}
//!
//!     // This layer does not care about audio session changes.
//!     fn handles(&self, callback: CallbackKind) -> bool {
//!         callback != CallbackKind::AudioSession
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::types::{AccountContext, CallIdentity, CallbackKind, PeerId};

#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Place the call in the signaling layer; `true` once it is under way
    async fn on_start(
        &self,
        context: AccountContext,
        identity: CallIdentity,
        peer: Option<PeerId>,
        handle: String,
        is_video: bool,
    ) -> bool;

    fn on_answer(&self, identity: CallIdentity);

    /// Tear the call down in the signaling layer; `true` on success
    async fn on_end(&self, identity: CallIdentity) -> bool;

    fn on_mute(&self, identity: CallIdentity, muted: bool);

    fn on_audio_session_changed(&self, _active: bool) {}

    /// Whether this handler takes the given callback
    ///
    /// Callbacks a handler opts out of are treated as unhandled: perform
    /// requests fail, advisory events are logged and dropped.
    fn handles(&self, _callback: CallbackKind) -> bool {
        true
    }
}
