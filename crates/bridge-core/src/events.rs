//! Bridge event stream
//!
//! Diagnostic and UI-facing notifications emitted by the coordinator after
//! each state mutation has been applied. Delivery is best effort: a slow
//! subscriber that lags behind the broadcast buffer loses the oldest events,
//! never the coordinator's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::BridgeError;
use crate::types::{ActionKind, AudioRouteMode, CallIdentity, CallPhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// The application confirmed an outgoing call is under way
    CallStarted { identity: CallIdentity },

    /// An outgoing call never came up
    CallFailed { identity: CallIdentity, reason: String },

    /// The authority accepted an incoming-call report
    IncomingCallReported { identity: CallIdentity },

    CallEnded {
        identity: CallIdentity,
        ended_at: DateTime<Utc>,
    },

    PhaseChanged {
        identity: CallIdentity,
        previous: CallPhase,
        current: CallPhase,
    },

    /// Edge of the derived "has active calls" signal
    ActiveCallsChanged { has_active_calls: bool },

    AudioSessionChanged { active: bool },

    RouteModeApplied { mode: AudioRouteMode },

    /// The authority asked for an action nobody submitted
    ProtocolMismatch {
        kind: ActionKind,
        identity: CallIdentity,
        details: String,
    },

    /// The authority reset; `cleared` calls were dropped from the active set
    ProviderReset { cleared: Vec<CallIdentity> },
}

impl BridgeEvent {
    pub fn call_failed(identity: CallIdentity, error: &BridgeError) -> Self {
        BridgeEvent::CallFailed {
            identity,
            reason: error.to_string(),
        }
    }

    /// Call this event concerns, if it concerns a single one
    pub fn identity(&self) -> Option<CallIdentity> {
        match self {
            BridgeEvent::CallStarted { identity }
            | BridgeEvent::CallFailed { identity, .. }
            | BridgeEvent::IncomingCallReported { identity }
            | BridgeEvent::CallEnded { identity, .. }
            | BridgeEvent::PhaseChanged { identity, .. }
            | BridgeEvent::ProtocolMismatch { identity, .. } => Some(*identity),
            _ => None,
        }
    }
}

/// Subscriber side of the bridge event broadcast
pub struct EventStream {
    rx: broadcast::Receiver<BridgeEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<BridgeEvent>) -> Self {
        Self { rx }
    }

    /// Next event, skipping over any the subscriber lagged past
    ///
    /// Returns `None` once the coordinator has shut down.
    pub async fn next(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Bridge event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
