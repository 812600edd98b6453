//! Application-originated submissions
//!
//! Start, answer, end and mute requests plus incoming-call reports. Each one
//! creates a pending record, hands the request to the authority off-actor,
//! and is resolved later by the authority's reply or perform callback.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::audio::RouteDisposition;
use crate::authority::{ActionRequest, StartCallInteraction};
use crate::error::{AuthorityError, BridgeError, BridgeResult};
use crate::events::BridgeEvent;
use crate::types::{
    ActionKind, AudioRouteMode, CallEndedReason, CallHandle, CallIdentity, CallPhase, CallRecord, CallUpdate,
    IncomingCallReport, StartCallRequest,
};

use super::actor::{Completion, Continuation, CoordinatorActor, OutcomeSender, PendingAction, StartSlot};

impl CoordinatorActor {
    pub(super) fn submit_start(&mut self, request: StartCallRequest, outcome: OutcomeSender) -> BridgeResult<CallIdentity> {
        if let Some(slot) = &self.current_start {
            warn!("Start requested while call {} is still starting", slot.identity);
            return Err(BridgeError::StartInProgress {
                identity: slot.identity,
            });
        }

        let handle = CallHandle::for_peer(request.peer, request.phone_number.as_deref());
        let identity = self
            .identities
            .allocate(Some(request.peer), &request.display_title, request.is_video);
        self.identities.set_handle(&identity, handle.clone());
        self.current_start = Some(StartSlot {
            identity,
            context: request.context.clone(),
            handler: None,
        });
        self.pending.insert((identity, ActionKind::Start), PendingAction::new(outcome));

        info!("Starting call {} to peer {}", identity, request.peer);
        self.dispatch_request(ActionRequest::start(
            identity,
            handle,
            request.display_title.clone(),
            request.is_video,
        ));

        self.authority.donate_interaction(StartCallInteraction {
            handle: format!("tg{}", request.peer),
            display_title: request.display_title,
            contact_identifier: request.local_contact_id,
        });

        Ok(identity)
    }

    pub(super) fn submit_action(&mut self, request: ActionRequest, outcome: OutcomeSender) -> BridgeResult<()> {
        let (kind, identity) = (request.kind, request.identity);
        if kind == ActionKind::Start {
            return Err(BridgeError::internal("start must be submitted with a start request"));
        }

        let in_flight = self.pending.contains_key(&(identity, kind))
            || (kind == ActionKind::End && self.deferred_ends.contains_key(&identity));
        if in_flight {
            return Err(BridgeError::ActionInFlight { kind, identity });
        }
        if !self.identities.contains(&identity) {
            return Err(BridgeError::CallNotFound { identity });
        }

        if kind == ActionKind::End && self.start_outstanding(&identity) {
            debug!("Holding end for call {} until its start resolves", identity);
            self.deferred_ends.insert(identity, PendingAction::new(outcome));
            return Ok(());
        }

        self.pending.insert((identity, kind), PendingAction::new(outcome));
        self.dispatch_request(request);
        Ok(())
    }

    pub(super) fn dispatch_request(&mut self, request: ActionRequest) {
        let (kind, identity) = (request.kind, request.identity);
        let authority = self.authority.clone();
        self.spawn_operation(
            format!("{} request for {}", kind, identity),
            Continuation::Request { identity, kind },
            async move { Completion::Authority(authority.request_action(request).await) },
        );
    }

    pub(super) fn on_request_completed(
        &mut self,
        identity: CallIdentity,
        kind: ActionKind,
        result: Result<(), AuthorityError>,
    ) {
        match result {
            Ok(()) => {
                debug!("Authority accepted {} for call {}", kind, identity);
                if kind == ActionKind::Start {
                    self.push_call_update(identity);
                }
            }
            Err(e) => {
                warn!("Authority rejected {} for call {}: {}", kind, identity, e);
                let error = BridgeError::rejected(kind, identity, e.reason);
                match kind {
                    ActionKind::Start if self.start_outstanding(&identity) => self.fail_start(identity, error),
                    ActionKind::Start => {
                        // The start was already performed and settled
                        warn!("Ignoring late rejection of the start of call {}", identity);
                        self.emit(BridgeEvent::ProtocolMismatch {
                            kind,
                            identity,
                            details: format!("start already settled: {}", error),
                        });
                    }
                    ActionKind::End => self.settle_end(identity, Utc::now(), Err(error)),
                    _ => self.resolve_pending(identity, kind, Err(error)),
                }
            }
        }
    }

    fn push_call_update(&self, identity: CallIdentity) {
        let Some(record) = self.identities.record(&identity) else {
            return;
        };
        if let Some(handle) = record.handle.clone() {
            let update = CallUpdate::single_call(handle, record.display_title.clone(), record.is_video);
            self.authority.report_call_updated(identity, update);
        }
    }

    /// Settle a start that will never connect
    ///
    /// Releases the start slot, fails the caller's outcome, discards any End
    /// buffered behind it, and forgets the identity. A start handler still
    /// running is cancelled and its responder failed.
    pub(super) fn fail_start(&mut self, identity: CallIdentity, error: BridgeError) {
        let slot = match self.current_start.take() {
            Some(slot) if slot.identity == identity => Some(slot),
            other => {
                self.current_start = other;
                None
            }
        };
        if let Some(operation) = slot.and_then(|slot| slot.handler) {
            match self.operations.cancel(operation) {
                Some(Continuation::StartHandler { responder, .. }) => {
                    debug!("Cancelled start handler of call {}", identity);
                    responder.fail();
                }
                Some(other) => error!("Start slot of call {} pointed at {:?}", identity, other),
                // Handler already finished
                None => {}
            }
        }

        let pending = self.pending.remove(&(identity, ActionKind::Start));

        if let Some(deferred) = self.deferred_ends.remove(&identity) {
            deferred.resolve(Err(BridgeError::Discarded {
                kind: ActionKind::End,
                identity,
                reason: "call never started".to_string(),
            }));
        }

        self.identities.remove(&identity);
        info!("Call {} failed to initiate: {}", identity, error);
        self.emit(BridgeEvent::call_failed(identity, &error));
        if let Some(pending) = pending {
            pending.resolve(Err(error));
        }
    }

    /// Resolve an End and drop the call's bookkeeping, whatever the result
    ///
    /// Bookkeeping goes first so the caller never observes a resolved End
    /// while the call still looks active.
    pub(super) fn settle_end(&mut self, identity: CallIdentity, ended_at: DateTime<Utc>, result: BridgeResult<()>) {
        let pending = self.pending.remove(&(identity, ActionKind::End));
        self.finish_end(identity, ended_at);
        match pending {
            Some(pending) => pending.resolve(result),
            None => debug!("End of call {} was not submitted by the application", identity),
        }
    }

    /// Drop local bookkeeping for a call that is over
    pub(super) fn finish_end(&mut self, identity: CallIdentity, ended_at: DateTime<Utc>) {
        if self.start_outstanding(&identity) {
            self.fail_start(
                identity,
                BridgeError::Discarded {
                    kind: ActionKind::Start,
                    identity,
                    reason: "call ended before it started".to_string(),
                },
            );
        }

        let leftovers: Vec<_> = self
            .pending
            .keys()
            .filter(|(id, _)| *id == identity)
            .copied()
            .collect();
        for (id, kind) in leftovers {
            self.resolve_pending(
                id,
                kind,
                Err(BridgeError::Discarded {
                    kind,
                    identity,
                    reason: "call ended".to_string(),
                }),
            );
        }

        self.deactivate_call(&identity);
        self.advance(identity, CallPhase::Ended);
        if self.identities.remove(&identity).is_some() {
            info!("Call {} ended", identity);
            self.emit(BridgeEvent::CallEnded { identity, ended_at });
        }
    }

    pub(super) fn report_incoming(&mut self, report: IncomingCallReport, outcome: OutcomeSender) {
        let identity = report.identity;
        if !self.identities.mark_reported(identity) {
            debug!("Incoming call {} already reported", identity);
            let _ = outcome.send(Ok(()));
            return;
        }

        let handle = report.call_handle();
        self.identities.insert(
            CallRecord::new(identity, None, report.display_title.clone(), report.is_video).with_handle(handle.clone()),
        );
        self.audio.prepare_call_session();

        info!("Reporting incoming call {} (signaling id {})", identity, report.stable_id);
        let update = CallUpdate::single_call(handle, report.display_title, report.is_video);
        let authority = self.authority.clone();
        self.spawn_operation(
            format!("incoming report for {}", identity),
            Continuation::IncomingReport { identity, outcome },
            async move { Completion::Authority(authority.report_incoming_call(identity, update).await) },
        );
    }

    pub(super) fn on_incoming_report_completed(
        &mut self,
        identity: CallIdentity,
        outcome: OutcomeSender,
        result: Result<(), AuthorityError>,
    ) {
        match result {
            Ok(()) => {
                if self.identities.contains(&identity) {
                    self.activate_call(identity);
                    self.advance(identity, CallPhase::Ringing);
                    self.emit(BridgeEvent::IncomingCallReported { identity });
                } else {
                    debug!("Incoming call {} went away before the authority accepted it", identity);
                }
                let _ = outcome.send(Ok(()));
            }
            Err(e) => {
                // The reported mark stays so retries with this identity short-circuit
                warn!("Authority rejected incoming call {}: {}", identity, e);
                self.identities.remove(&identity);
                let _ = outcome.send(Err(BridgeError::IncomingReportRejected {
                    identity,
                    reason: e.reason,
                }));
            }
        }
    }

    pub(super) fn drop_call(&mut self, identity: CallIdentity) {
        info!("Dropping call {}", identity);
        self.authority
            .report_call_ended(identity, None, CallEndedReason::RemoteEnded);
        self.finish_end(identity, Utc::now());
    }

    pub(super) fn report_outgoing(&mut self, identity: CallIdentity, at: DateTime<Utc>, connected: bool) {
        if !self.identities.contains(&identity) {
            warn!("Ignoring progress report for unknown call {}", identity);
            return;
        }
        if connected {
            self.authority.report_outgoing_connected(identity, at);
            self.advance(identity, CallPhase::Connected);
        } else {
            self.authority.report_outgoing_connecting(identity, at);
            self.advance(identity, CallPhase::Connecting);
        }
    }

    pub(super) fn request_route_mode(&mut self, mode: AudioRouteMode) {
        match self.audio.request_route_mode(mode.clone()) {
            RouteDisposition::Applied => self.emit(BridgeEvent::RouteModeApplied { mode }),
            RouteDisposition::Deferred => debug!("Audio session inactive, deferring route {:?}", mode),
        }
    }
}
