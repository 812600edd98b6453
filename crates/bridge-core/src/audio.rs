//! Audio focus coordination
//!
//! The authority grants and revokes audio-session activation. Route changes
//! requested while the session is inactive cannot be applied yet, so a single
//! pending intent is parked (last request wins) and applied the moment the
//! session activates.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::AudioRouteMode;

/// Whether the authority has granted audio focus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AudioFocusState {
    Inactive,
    Active,
}

/// Host audio session the coordinator routes through
pub trait AudioSessionControl: Send + Sync {
    /// Apply an output route to the currently active session
    fn apply_output_mode(&self, mode: &AudioRouteMode);

    /// Configure the session before an incoming call is surfaced
    fn prepare_call_session(&self) {}
}

/// What happened to a route request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDisposition {
    Applied,
    Deferred,
}

pub struct AudioFocusCoordinator {
    state: AudioFocusState,
    pending: Option<AudioRouteMode>,
    control: Option<Arc<dyn AudioSessionControl>>,
    active_tx: watch::Sender<bool>,
}

impl AudioFocusCoordinator {
    pub fn new(control: Option<Arc<dyn AudioSessionControl>>) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            state: AudioFocusState::Inactive,
            pending: None,
            control,
            active_tx,
        }
    }

    pub fn state(&self) -> AudioFocusState {
        self.state
    }

    pub fn pending_mode(&self) -> Option<&AudioRouteMode> {
        self.pending.as_ref()
    }

    /// Observable mirror of the focus state
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    pub fn request_route_mode(&mut self, mode: AudioRouteMode) -> RouteDisposition {
        match self.state {
            AudioFocusState::Active => {
                self.apply(&mode);
                RouteDisposition::Applied
            }
            AudioFocusState::Inactive => {
                if let Some(previous) = self.pending.replace(mode) {
                    debug!("Replacing pending audio route {:?}", previous);
                }
                RouteDisposition::Deferred
            }
        }
    }

    /// Handle an activation grant
    ///
    /// Returns `None` if focus was already active, otherwise the pending
    /// route that was applied on the way in (if any).
    pub fn activate(&mut self) -> Option<Option<AudioRouteMode>> {
        if self.state == AudioFocusState::Active {
            warn!("Audio session activated while already active");
            return None;
        }
        self.state = AudioFocusState::Active;
        info!("Audio session activated");

        let applied = self.pending.take();
        if let Some(mode) = &applied {
            self.apply(mode);
        }
        self.publish(true);
        Some(applied)
    }

    /// Handle a deactivation; `false` if focus was already inactive
    pub fn deactivate(&mut self) -> bool {
        if self.state == AudioFocusState::Inactive {
            warn!("Audio session deactivated while already inactive");
            return false;
        }
        self.state = AudioFocusState::Inactive;
        info!("Audio session deactivated");
        self.publish(false);
        true
    }

    pub fn prepare_call_session(&self) {
        if let Some(control) = &self.control {
            control.prepare_call_session();
        }
    }

    fn apply(&self, mode: &AudioRouteMode) {
        match &self.control {
            Some(control) => {
                debug!("Applying audio route {:?}", mode);
                control.apply_output_mode(mode);
            }
            None => debug!("No audio session control, dropping route {:?}", mode),
        }
    }

    fn publish(&self, active: bool) {
        self.active_tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }
}
