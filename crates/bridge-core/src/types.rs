//! Core types for the call bridge
//!
//! Identifiers, call records, handles, and the small value types that flow
//! between the application, the coordinator, and the telephony authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identity naming one call attempt from creation to termination
///
/// Backed by a random 128-bit UUID. Identities are never reused: a retry
/// after a failed start or a rejected incoming report needs a fresh one.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CallIdentity(pub Uuid);

impl CallIdentity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the remote peer a call concerns
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerId(pub i64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation requested against a call identity
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ActionKind {
    Start,
    Answer,
    End,
    Mute,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Answer => "answer",
            ActionKind::End => "end",
            ActionKind::Mute => "mute",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application callbacks the router may need a handler for
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallbackKind {
    Start,
    Answer,
    End,
    Mute,
    AudioSession,
}

impl From<ActionKind> for CallbackKind {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Start => CallbackKind::Start,
            ActionKind::Answer => CallbackKind::Answer,
            ActionKind::End => CallbackKind::End,
            ActionKind::Mute => CallbackKind::Mute,
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackKind::Start => "start callback",
            CallbackKind::Answer => "answer callback",
            CallbackKind::End => "end callback",
            CallbackKind::Mute => "mute callback",
            CallbackKind::AudioSession => "audio session callback",
        };
        f.write_str(name)
    }
}

/// Lifecycle phase of a call record
///
/// Phases only ever advance. `Ringing` and `Connecting` share a rank so an
/// outgoing call may skip ringing and an incoming call may skip straight to
/// connecting once answered.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallPhase {
    Initiating,
    Ringing,
    Connecting,
    Connected,
    Ended,
}

impl CallPhase {
    fn rank(&self) -> u8 {
        match self {
            CallPhase::Initiating => 0,
            CallPhase::Ringing => 1,
            CallPhase::Connecting => 2,
            CallPhase::Connected => 3,
            CallPhase::Ended => 4,
        }
    }

    /// Whether moving to `next` keeps the phase monotonic
    pub fn can_advance_to(&self, next: CallPhase) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended)
    }
}

/// Kind of handle the authority shows for the remote party
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum HandleKind {
    PhoneNumber,
    Generic,
}

/// Remote party handle as understood by the authority
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallHandle {
    pub kind: HandleKind,
    pub value: String,
}

impl CallHandle {
    pub fn phone_number(value: impl Into<String>) -> Self {
        Self {
            kind: HandleKind::PhoneNumber,
            value: value.into(),
        }
    }

    pub fn generic(value: impl Into<String>) -> Self {
        Self {
            kind: HandleKind::Generic,
            value: value.into(),
        }
    }

    /// A known phone number wins; otherwise the handle falls back to `fallback`
    pub fn resolve(phone_number: Option<&str>, fallback: impl Into<String>) -> Self {
        match phone_number {
            Some(number) => Self::phone_number(number),
            None => Self::generic(fallback),
        }
    }

    /// Handle for an outgoing call to `peer`
    pub fn for_peer(peer: PeerId, phone_number: Option<&str>) -> Self {
        Self::resolve(phone_number, peer.to_string())
    }
}

/// Call attributes pushed to the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUpdate {
    pub remote_handle: Option<CallHandle>,
    pub localized_caller_name: Option<String>,
    pub has_video: bool,
    pub supports_holding: bool,
    pub supports_grouping: bool,
    pub supports_ungrouping: bool,
    pub supports_dtmf: bool,
}

impl CallUpdate {
    /// Update for a standalone call: no hold, grouping, or DTMF support
    pub fn single_call(handle: CallHandle, display_title: impl Into<String>, has_video: bool) -> Self {
        Self {
            remote_handle: Some(handle),
            localized_caller_name: Some(display_title.into()),
            has_video,
            supports_holding: false,
            supports_grouping: false,
            supports_ungrouping: false,
            supports_dtmf: false,
        }
    }
}

/// Why a call ended, as reported to the authority
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallEndedReason {
    Failed,
    RemoteEnded,
    Unanswered,
    AnsweredElsewhere,
    DeclinedElsewhere,
}

/// Audio output routing preference
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AudioRouteMode {
    /// Let the system pick the route
    System,
    Speaker,
    Headphones,
    /// A specific output port by name
    Custom(String),
}

/// Application context handed back to the start handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub account_id: String,
}

impl AccountContext {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// Everything the bridge knows about one live call identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub identity: CallIdentity,
    /// Target peer, once resolved
    pub peer: Option<PeerId>,
    pub handle: Option<CallHandle>,
    pub is_video: bool,
    pub display_title: String,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    pub fn new(identity: CallIdentity, peer: Option<PeerId>, display_title: impl Into<String>, is_video: bool) -> Self {
        Self {
            identity,
            peer,
            handle: None,
            is_video,
            display_title: display_title.into(),
            phase: CallPhase::Initiating,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn with_handle(mut self, handle: CallHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// Application request to place an outgoing call
#[derive(Debug, Clone)]
pub struct StartCallRequest {
    pub context: AccountContext,
    pub peer: PeerId,
    pub phone_number: Option<String>,
    pub local_contact_id: Option<String>,
    pub display_title: String,
    pub is_video: bool,
}

impl StartCallRequest {
    pub fn new(context: AccountContext, peer: PeerId, display_title: impl Into<String>) -> Self {
        Self {
            context,
            peer,
            phone_number: None,
            local_contact_id: None,
            display_title: display_title.into(),
            is_video: false,
        }
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn with_local_contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.local_contact_id = Some(contact_id.into());
        self
    }

    pub fn with_video(mut self, is_video: bool) -> Self {
        self.is_video = is_video;
        self
    }
}

/// Application request to surface an incoming call
#[derive(Debug, Clone)]
pub struct IncomingCallReport {
    pub identity: CallIdentity,
    /// Signaling-layer call id, kept for diagnostics
    pub stable_id: i64,
    pub handle: String,
    pub phone_number: Option<String>,
    pub is_video: bool,
    pub display_title: String,
}

impl IncomingCallReport {
    pub fn new(identity: CallIdentity, handle: impl Into<String>, display_title: impl Into<String>) -> Self {
        Self {
            identity,
            stable_id: 0,
            handle: handle.into(),
            phone_number: None,
            is_video: false,
            display_title: display_title.into(),
        }
    }

    pub fn with_stable_id(mut self, stable_id: i64) -> Self {
        self.stable_id = stable_id;
        self
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn with_video(mut self, is_video: bool) -> Self {
        self.is_video = is_video;
        self
    }

    /// Handle the authority should display
    pub fn call_handle(&self) -> CallHandle {
        CallHandle::resolve(self.phone_number.as_deref(), self.handle.clone())
    }
}
