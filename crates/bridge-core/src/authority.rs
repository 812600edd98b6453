//! Contract with the host telephony authority
//!
//! The authority owns the system call UI, ringing, lock-screen controls and
//! audio routing. The coordinator drives it through [`TelephonyAuthority`];
//! the authority drives the coordinator back by delivering
//! [`AuthorityEvent`]s, each perform request carrying an [`ActionResponder`]
//! that must be resolved exactly once.
//!
//! ```text
//! ┌─────────────────────────┐   request_action / report_*   ┌──────────────┐
//! │    CallCoordinator      │ ────────────────────────────► │  Telephony   │
//! │  (single actor task)    │ ◄──────────────────────────── │  Authority   │
//! └─────────────────────────┘   AuthorityEvent + responder  └──────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::warn;

use crate::config::ProviderConfiguration;
use crate::error::AuthorityError;
use crate::types::{ActionKind, CallEndedReason, CallHandle, CallIdentity, CallUpdate};

/// Kind-specific parameters of an action request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionParams {
    Start {
        handle: CallHandle,
        /// Shown by the authority as the contact name
        contact_identifier: String,
        is_video: bool,
    },
    Answer,
    End,
    Mute {
        muted: bool,
    },
}

/// Request submitted to the authority on the application's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub identity: CallIdentity,
    pub params: ActionParams,
}

impl ActionRequest {
    pub fn start(identity: CallIdentity, handle: CallHandle, contact_identifier: impl Into<String>, is_video: bool) -> Self {
        Self {
            kind: ActionKind::Start,
            identity,
            params: ActionParams::Start {
                handle,
                contact_identifier: contact_identifier.into(),
                is_video,
            },
        }
    }

    pub fn answer(identity: CallIdentity) -> Self {
        Self {
            kind: ActionKind::Answer,
            identity,
            params: ActionParams::Answer,
        }
    }

    pub fn end(identity: CallIdentity) -> Self {
        Self {
            kind: ActionKind::End,
            identity,
            params: ActionParams::End,
        }
    }

    pub fn mute(identity: CallIdentity, muted: bool) -> Self {
        Self {
            kind: ActionKind::Mute,
            identity,
            params: ActionParams::Mute { muted },
        }
    }
}

/// Outgoing-call interaction donated to the host for suggestions and redial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCallInteraction {
    pub handle: String,
    pub display_title: String,
    pub contact_identifier: Option<String>,
}

/// Operations the coordinator invokes on the host authority
#[async_trait]
pub trait TelephonyAuthority: Send + Sync {
    /// Register the provider; called once when the coordinator starts
    fn register_provider(&self, _config: &ProviderConfiguration) {}

    /// Ask the authority to carry out an action
    ///
    /// Resolves once the authority has accepted or rejected the request. An
    /// accepted request is later followed by the matching perform event.
    async fn request_action(&self, request: ActionRequest) -> Result<(), AuthorityError>;

    /// Ask the authority to surface an incoming call
    async fn report_incoming_call(&self, identity: CallIdentity, update: CallUpdate) -> Result<(), AuthorityError>;

    fn report_call_updated(&self, identity: CallIdentity, update: CallUpdate);

    fn report_call_ended(&self, identity: CallIdentity, ended_at: Option<DateTime<Utc>>, reason: CallEndedReason);

    fn report_outgoing_connecting(&self, _identity: CallIdentity, _at: DateTime<Utc>) {}

    fn report_outgoing_connected(&self, _identity: CallIdentity, _at: DateTime<Utc>) {}

    fn donate_interaction(&self, _interaction: StartCallInteraction) {}
}

/// Terminal answer to an authority perform request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResolution {
    Fulfilled { ended_at: Option<DateTime<Utc>> },
    Failed,
}

impl ActionResolution {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, ActionResolution::Fulfilled { .. })
    }
}

/// Single-fire completion slot attached to a perform request
///
/// Resolving consumes the responder. A responder dropped without being
/// resolved reports [`ActionResolution::Failed`], so the authority never
/// waits forever on an action the coordinator lost track of.
#[derive(Debug)]
pub struct ActionResponder {
    kind: ActionKind,
    identity: CallIdentity,
    tx: Option<oneshot::Sender<ActionResolution>>,
}

impl ActionResponder {
    /// Create a responder and the receiver the authority waits on
    pub fn new(kind: ActionKind, identity: CallIdentity) -> (Self, oneshot::Receiver<ActionResolution>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                kind,
                identity,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn identity(&self) -> CallIdentity {
        self.identity
    }

    pub fn fulfill(mut self) {
        self.send(ActionResolution::Fulfilled { ended_at: None });
    }

    pub fn fulfill_ended_at(mut self, ended_at: DateTime<Utc>) {
        self.send(ActionResolution::Fulfilled {
            ended_at: Some(ended_at),
        });
    }

    pub fn fail(mut self) {
        self.send(ActionResolution::Failed);
    }

    fn send(&mut self, resolution: ActionResolution) {
        if let Some(tx) = self.tx.take() {
            // The authority may have stopped listening; nothing left to tell it.
            let _ = tx.send(resolution);
        }
    }
}

impl Drop for ActionResponder {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("{} action for call {} dropped unresolved, failing it", self.kind, self.identity);
            self.send(ActionResolution::Failed);
        }
    }
}

/// Callback delivered by the authority into the coordinator
#[derive(Debug)]
pub enum AuthorityEvent {
    PerformStart {
        identity: CallIdentity,
        handle: CallHandle,
        is_video: bool,
        responder: ActionResponder,
    },
    PerformAnswer {
        identity: CallIdentity,
        responder: ActionResponder,
    },
    PerformEnd {
        identity: CallIdentity,
        responder: ActionResponder,
    },
    PerformMute {
        identity: CallIdentity,
        muted: bool,
        responder: ActionResponder,
    },
    /// The authority discarded all call state out-of-band
    ProviderReset,
    AudioSessionActivated,
    AudioSessionDeactivated,
}

impl AuthorityEvent {
    /// Action kind and call for perform requests, `None` for advisory events
    pub fn action(&self) -> Option<(ActionKind, CallIdentity)> {
        match self {
            AuthorityEvent::PerformStart { identity, .. } => Some((ActionKind::Start, *identity)),
            AuthorityEvent::PerformAnswer { identity, .. } => Some((ActionKind::Answer, *identity)),
            AuthorityEvent::PerformEnd { identity, .. } => Some((ActionKind::End, *identity)),
            AuthorityEvent::PerformMute { identity, .. } => Some((ActionKind::Mute, *identity)),
            _ => None,
        }
    }
}
