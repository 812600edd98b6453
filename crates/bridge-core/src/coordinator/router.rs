//! Authority callback routing
//!
//! | Event                   | Effect                                                       |
//! |-------------------------|--------------------------------------------------------------|
//! | PerformStart            | must match the starting slot; runs `on_start`                |
//! | PerformAnswer           | runs `on_answer`, fulfilled right away                       |
//! | PerformEnd              | runs `on_end`; local bookkeeping is dropped either way       |
//! | PerformMute             | runs `on_mute`, fulfilled right away                         |
//! | ProviderReset           | clears the active set; pending actions stay resolvable       |
//! | AudioSessionActivated   | focus active, pending route applied, handler told `true`     |
//! | AudioSessionDeactivated | focus inactive, handler told `false`                         |
//!
//! A perform request the bridge cannot tie to a known call is a protocol
//! mismatch: the responder is failed and the mismatch is logged and emitted.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::authority::{ActionRequest, ActionResponder, AuthorityEvent};
use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::types::{ActionKind, CallHandle, CallIdentity, CallPhase, CallbackKind};

use super::actor::{Completion, Continuation, CoordinatorActor};

impl CoordinatorActor {
    pub(super) fn route(&mut self, event: AuthorityEvent) {
        debug!("Routing authority event {:?}", event);
        match event {
            AuthorityEvent::PerformStart {
                identity,
                handle,
                is_video,
                responder,
            } => self.perform_start(identity, handle, is_video, responder),
            AuthorityEvent::PerformAnswer { identity, responder } => self.perform_answer(identity, responder),
            AuthorityEvent::PerformEnd { identity, responder } => self.perform_end(identity, responder),
            AuthorityEvent::PerformMute {
                identity,
                muted,
                responder,
            } => self.perform_mute(identity, muted, responder),
            AuthorityEvent::ProviderReset => self.provider_reset(),
            AuthorityEvent::AudioSessionActivated => self.audio_session_changed(true),
            AuthorityEvent::AudioSessionDeactivated => self.audio_session_changed(false),
        }
    }

    fn protocol_mismatch(&self, kind: ActionKind, identity: CallIdentity, details: String, responder: ActionResponder) {
        warn!("Protocol mismatch for {} on call {}: {}", kind, identity, details);
        responder.fail();
        self.emit(BridgeEvent::ProtocolMismatch {
            kind,
            identity,
            details,
        });
    }

    /// Whether a perform request for `identity` refers to something we track
    fn is_known(&self, identity: &CallIdentity, kind: ActionKind) -> bool {
        self.identities.contains(identity) || self.pending.contains_key(&(*identity, kind))
    }

    fn perform_start(&mut self, identity: CallIdentity, handle: CallHandle, is_video: bool, responder: ActionResponder) {
        let context = match &self.current_start {
            Some(slot) if slot.identity == identity && slot.handler.is_none() => slot.context.clone(),
            Some(slot) if slot.identity == identity => {
                let details = "start is already being performed".to_string();
                self.protocol_mismatch(ActionKind::Start, identity, details, responder);
                return;
            }
            Some(slot) => {
                let details = format!("call {} is the one starting", slot.identity);
                self.protocol_mismatch(ActionKind::Start, identity, details, responder);
                return;
            }
            None => {
                let details = "no start is outstanding".to_string();
                self.protocol_mismatch(ActionKind::Start, identity, details, responder);
                return;
            }
        };

        let Some(handler) = self.handler_for(CallbackKind::Start) else {
            warn!("No handler for start of call {}", identity);
            responder.fail();
            self.fail_start(
                identity,
                BridgeError::UnhandledCallback {
                    callback: CallbackKind::Start,
                },
            );
            return;
        };

        let peer = self.identities.lookup_peer(&identity);
        let operation = self.spawn_operation(
            format!("start handler for {}", identity),
            Continuation::StartHandler { identity, responder },
            async move { Completion::Handler(handler.on_start(context, identity, peer, handle.value, is_video).await) },
        );
        // The slot stays taken so later submissions still see a start in progress
        if let Some(slot) = self.current_start.as_mut() {
            slot.handler = Some(operation);
        }
    }

    pub(super) fn on_start_handled(&mut self, identity: CallIdentity, responder: ActionResponder, started: bool) {
        if !self.start_outstanding(&identity) {
            warn!("Start handler of call {} finished with no start outstanding", identity);
            responder.fail();
            return;
        }

        if !started {
            responder.fail();
            self.fail_start(
                identity,
                BridgeError::HandlerDeclined {
                    kind: ActionKind::Start,
                    identity,
                },
            );
            return;
        }

        responder.fulfill();
        self.current_start = None;
        if self.identities.contains(&identity) {
            self.activate_call(identity);
            self.advance(identity, CallPhase::Connecting);
        }
        self.resolve_pending(identity, ActionKind::Start, Ok(()));
        info!("Call {} started", identity);
        self.emit(BridgeEvent::CallStarted { identity });

        if let Some(deferred) = self.deferred_ends.remove(&identity) {
            debug!("Dispatching end held behind start of call {}", identity);
            self.pending.insert((identity, ActionKind::End), deferred);
            self.dispatch_request(ActionRequest::end(identity));
        }
    }

    fn perform_answer(&mut self, identity: CallIdentity, responder: ActionResponder) {
        if !self.is_known(&identity, ActionKind::Answer) {
            self.protocol_mismatch(ActionKind::Answer, identity, "unknown call".to_string(), responder);
            return;
        }

        let Some(handler) = self.handler_for(CallbackKind::Answer) else {
            warn!("No handler for answer of call {}", identity);
            responder.fail();
            self.resolve_pending(
                identity,
                ActionKind::Answer,
                Err(BridgeError::UnhandledCallback {
                    callback: CallbackKind::Answer,
                }),
            );
            return;
        };

        handler.on_answer(identity);
        responder.fulfill();
        self.advance(identity, CallPhase::Connecting);
        self.resolve_pending(identity, ActionKind::Answer, Ok(()));
    }

    fn perform_mute(&mut self, identity: CallIdentity, muted: bool, responder: ActionResponder) {
        if !self.is_known(&identity, ActionKind::Mute) {
            self.protocol_mismatch(ActionKind::Mute, identity, "unknown call".to_string(), responder);
            return;
        }

        let Some(handler) = self.handler_for(CallbackKind::Mute) else {
            warn!("No handler for mute of call {}", identity);
            responder.fail();
            self.resolve_pending(
                identity,
                ActionKind::Mute,
                Err(BridgeError::UnhandledCallback {
                    callback: CallbackKind::Mute,
                }),
            );
            return;
        };

        handler.on_mute(identity, muted);
        responder.fulfill();
        self.resolve_pending(identity, ActionKind::Mute, Ok(()));
    }

    fn perform_end(&mut self, identity: CallIdentity, responder: ActionResponder) {
        if !self.is_known(&identity, ActionKind::End) {
            self.protocol_mismatch(ActionKind::End, identity, "unknown call".to_string(), responder);
            return;
        }

        let Some(handler) = self.handler_for(CallbackKind::End) else {
            warn!("No handler for end of call {}", identity);
            responder.fail();
            self.settle_end(
                identity,
                Utc::now(),
                Err(BridgeError::UnhandledCallback {
                    callback: CallbackKind::End,
                }),
            );
            return;
        };

        self.spawn_operation(
            format!("end handler for {}", identity),
            Continuation::EndHandler { identity, responder },
            async move { Completion::Handler(handler.on_end(identity).await) },
        );
    }

    pub(super) fn on_end_handled(&mut self, identity: CallIdentity, responder: ActionResponder, ended: bool) {
        let ended_at = Utc::now();
        if ended {
            responder.fulfill_ended_at(ended_at);
            self.settle_end(identity, ended_at, Ok(()));
        } else {
            warn!("Application failed to end call {}", identity);
            responder.fail();
            self.settle_end(
                identity,
                ended_at,
                Err(BridgeError::HandlerDeclined {
                    kind: ActionKind::End,
                    identity,
                }),
            );
        }
    }

    fn provider_reset(&mut self) {
        let (cleared, change) = self.active.clear();
        info!("Provider reset, dropping {} active calls", cleared.len());

        for identity in &cleared {
            if !self.has_pending(identity) {
                self.identities.remove(identity);
            }
        }
        if let Some(has_active_calls) = change {
            self.emit(BridgeEvent::ActiveCallsChanged { has_active_calls });
        }
        self.emit(BridgeEvent::ProviderReset { cleared });
    }

    fn audio_session_changed(&mut self, active: bool) {
        let changed = if active {
            match self.audio.activate() {
                Some(applied) => {
                    if let Some(mode) = applied {
                        self.emit(BridgeEvent::RouteModeApplied { mode });
                    }
                    true
                }
                None => false,
            }
        } else {
            self.audio.deactivate()
        };
        if !changed {
            return;
        }

        match self.handler_for(CallbackKind::AudioSession) {
            Some(handler) => handler.on_audio_session_changed(active),
            None => warn!("No handler for audio session change to {}, ignoring", active),
        }
        self.emit(BridgeEvent::AudioSessionChanged { active });
    }
}
