//! Coordinator actor: state and main loop
//!
//! All bridge state lives in [`CoordinatorActor`], owned by a single tokio
//! task. Commands from [`CallCoordinator`](super::CallCoordinator) handles and
//! completions of spawned authority/handler futures are both funneled into
//! that task, so no two mutations ever interleave.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::active::ActiveCallSet;
use crate::audio::{AudioFocusCoordinator, AudioSessionControl};
use crate::authority::{ActionRequest, ActionResponder, AuthorityEvent, TelephonyAuthority};
use crate::config::BridgeConfig;
use crate::error::{AuthorityError, BridgeError, BridgeResult};
use crate::events::BridgeEvent;
use crate::handler::CallHandler;
use crate::identity::CallIdentityMap;
use crate::registry::{OperationId, OperationRegistry};
use crate::types::{
    AccountContext, ActionKind, AudioRouteMode, CallIdentity, CallPhase, CallbackKind, IncomingCallReport,
    StartCallRequest,
};

use super::handle::BridgeSnapshot;

/// Sender half of a caller-visible outcome
pub(crate) type OutcomeSender = oneshot::Sender<BridgeResult<()>>;

/// Messages from coordinator handles into the actor
pub(crate) enum Command {
    SetHandler {
        handler: Option<Arc<dyn CallHandler>>,
        reply: oneshot::Sender<()>,
    },
    SubmitStart {
        request: StartCallRequest,
        outcome: OutcomeSender,
        reply: oneshot::Sender<BridgeResult<CallIdentity>>,
    },
    SubmitAction {
        request: ActionRequest,
        outcome: OutcomeSender,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    ReportIncoming {
        report: IncomingCallReport,
        outcome: OutcomeSender,
    },
    DropCall {
        identity: CallIdentity,
    },
    ReportOutgoing {
        identity: CallIdentity,
        at: DateTime<Utc>,
        connected: bool,
    },
    RequestRouteMode {
        mode: AudioRouteMode,
    },
    Authority(AuthorityEvent),
    Snapshot {
        reply: oneshot::Sender<BridgeSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What to do when a registered operation finishes
#[derive(Debug)]
pub(crate) enum Continuation {
    Request {
        identity: CallIdentity,
        kind: ActionKind,
    },
    IncomingReport {
        identity: CallIdentity,
        outcome: OutcomeSender,
    },
    StartHandler {
        identity: CallIdentity,
        responder: ActionResponder,
    },
    EndHandler {
        identity: CallIdentity,
        responder: ActionResponder,
    },
}

/// Result posted back by a spawned operation
#[derive(Debug)]
pub(crate) enum Completion {
    Authority(Result<(), AuthorityError>),
    Handler(bool),
}

/// One outstanding action the caller is waiting on
pub(crate) struct PendingAction {
    outcome: OutcomeSender,
    submitted_at: Instant,
}

impl PendingAction {
    pub(crate) fn new(outcome: OutcomeSender) -> Self {
        Self {
            outcome,
            submitted_at: Instant::now(),
        }
    }

    pub(crate) fn resolve(self, result: BridgeResult<()>) {
        debug!("Resolving action after {:?}: {:?}", self.submitted_at.elapsed(), result);
        // The caller may have dropped its outcome future
        let _ = self.outcome.send(result);
    }
}

/// The single outgoing start the authority is currently working on
pub(crate) struct StartSlot {
    pub(crate) identity: CallIdentity,
    pub(crate) context: AccountContext,
    /// Start handler operation, once the authority has performed the start
    pub(crate) handler: Option<OperationId>,
}

pub(crate) struct CoordinatorActor {
    pub(crate) config: BridgeConfig,
    pub(crate) authority: Arc<dyn TelephonyAuthority>,
    pub(crate) handler: Option<Arc<dyn CallHandler>>,
    pub(crate) identities: CallIdentityMap,
    pub(crate) active: ActiveCallSet,
    pub(crate) audio: AudioFocusCoordinator,
    pub(crate) pending: HashMap<(CallIdentity, ActionKind), PendingAction>,
    /// End submissions held back until the call's start resolves
    pub(crate) deferred_ends: HashMap<CallIdentity, PendingAction>,
    pub(crate) current_start: Option<StartSlot>,
    pub(crate) operations: OperationRegistry<Continuation>,
    completions_tx: mpsc::UnboundedSender<(OperationId, Completion)>,
    events_tx: broadcast::Sender<BridgeEvent>,
}

impl CoordinatorActor {
    pub(crate) fn new(
        config: BridgeConfig,
        authority: Arc<dyn TelephonyAuthority>,
        handler: Option<Arc<dyn CallHandler>>,
        audio_control: Option<Arc<dyn AudioSessionControl>>,
        completions_tx: mpsc::UnboundedSender<(OperationId, Completion)>,
        events_tx: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            config,
            authority,
            handler,
            identities: CallIdentityMap::new(),
            active: ActiveCallSet::new(),
            audio: AudioFocusCoordinator::new(audio_control),
            pending: HashMap::new(),
            deferred_ends: HashMap::new(),
            current_start: None,
            operations: OperationRegistry::new("call-coordinator"),
            completions_tx,
            events_tx,
        }
    }

    /// Main loop; returns once shut down or once every handle is gone
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<(OperationId, Completion)>,
    ) {
        info!("Starting call coordinator ({})", self.config.provider.localized_name);

        loop {
            tokio::select! {
                biased;

                Some((id, completion)) = completions.recv() => {
                    self.handle_completion(id, completion);
                }

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        // Refuse new commands before the caller hears back
                        commands.close();
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All coordinator handles dropped");
                        self.teardown();
                        break;
                    }
                },
            }
        }

        info!("Call coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetHandler { handler, reply } => {
                debug!("Application handler {}", if handler.is_some() { "set" } else { "cleared" });
                self.handler = handler;
                let _ = reply.send(());
            }
            Command::SubmitStart { request, outcome, reply } => {
                let _ = reply.send(self.submit_start(request, outcome));
            }
            Command::SubmitAction { request, outcome, reply } => {
                let _ = reply.send(self.submit_action(request, outcome));
            }
            Command::ReportIncoming { report, outcome } => self.report_incoming(report, outcome),
            Command::DropCall { identity } => self.drop_call(identity),
            Command::ReportOutgoing { identity, at, connected } => self.report_outgoing(identity, at, connected),
            Command::RequestRouteMode { mode } => self.request_route_mode(mode),
            Command::Authority(event) => self.route(event),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the loop itself
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_completion(&mut self, id: OperationId, completion: Completion) {
        let Some(continuation) = self.operations.resolve(id) else {
            debug!("Ignoring completion of {}, already settled", id);
            return;
        };

        match (continuation, completion) {
            (Continuation::Request { identity, kind }, Completion::Authority(result)) => {
                self.on_request_completed(identity, kind, result);
            }
            (Continuation::IncomingReport { identity, outcome }, Completion::Authority(result)) => {
                self.on_incoming_report_completed(identity, outcome, result);
            }
            (Continuation::StartHandler { identity, responder }, Completion::Handler(started)) => {
                self.on_start_handled(identity, responder, started);
            }
            (Continuation::EndHandler { identity, responder }, Completion::Handler(ended)) => {
                self.on_end_handled(identity, responder, ended);
            }
            (continuation, completion) => {
                error!("Completion {:?} does not fit operation {:?}", completion, continuation);
            }
        }
    }

    /// Run `future` off the actor and post its result back as a completion
    ///
    /// The operation stays in the registry until either its completion is
    /// processed or teardown cancels it.
    pub(crate) fn spawn_operation<F>(&mut self, label: String, continuation: Continuation, future: F) -> OperationId
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let (id, token) = self.operations.register(label, continuation);
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                completion = future => {
                    let _ = completions.send((id, completion));
                }
            }
        });
        id
    }

    pub(crate) fn emit(&self, event: BridgeEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Handler to invoke for `callback`, if one is registered and takes it
    pub(crate) fn handler_for(&self, callback: CallbackKind) -> Option<Arc<dyn CallHandler>> {
        match &self.handler {
            Some(handler) if handler.handles(callback) => Some(handler.clone()),
            _ => None,
        }
    }

    pub(crate) fn resolve_pending(&mut self, identity: CallIdentity, kind: ActionKind, result: BridgeResult<()>) {
        match self.pending.remove(&(identity, kind)) {
            Some(pending) => pending.resolve(result),
            None => debug!("No pending {} for call {} to resolve", kind, identity),
        }
    }

    pub(crate) fn has_pending(&self, identity: &CallIdentity) -> bool {
        self.pending.keys().any(|(id, _)| id == identity) || self.deferred_ends.contains_key(identity)
    }

    pub(crate) fn start_outstanding(&self, identity: &CallIdentity) -> bool {
        self.pending.contains_key(&(*identity, ActionKind::Start))
    }

    pub(crate) fn activate_call(&mut self, identity: CallIdentity) {
        if let Some(has_active_calls) = self.active.insert(identity) {
            self.emit(BridgeEvent::ActiveCallsChanged { has_active_calls });
        }
    }

    pub(crate) fn deactivate_call(&mut self, identity: &CallIdentity) {
        if let Some(has_active_calls) = self.active.remove(identity) {
            self.emit(BridgeEvent::ActiveCallsChanged { has_active_calls });
        }
    }

    pub(crate) fn advance(&mut self, identity: CallIdentity, phase: CallPhase) {
        if let Some(previous) = self.identities.advance_phase(&identity, phase) {
            debug!("Call {} {:?} -> {:?}", identity, previous, phase);
            self.emit(BridgeEvent::PhaseChanged {
                identity,
                previous,
                current: phase,
            });
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        let mut calls: Vec<_> = self.identities.records().cloned().collect();
        calls.sort_by_key(|record| record.created_at);

        BridgeSnapshot {
            active_calls: self.active.identities(),
            calls,
            audio_focus: self.audio.state(),
            pending_route: self.audio.pending_mode().cloned(),
            starting: self.current_start.as_ref().map(|slot| slot.identity),
            outstanding_actions: self.pending.len() + self.deferred_ends.len(),
            outstanding_operations: self.operations.len(),
        }
    }

    /// Cancel every in-flight operation and fail everything still waiting
    fn teardown(&mut self) {
        let continuations = self.operations.cancel_all();
        let actions = self.pending.len() + self.deferred_ends.len();
        if !continuations.is_empty() || actions > 0 {
            warn!(
                "Tearing down with {} operations and {} actions outstanding",
                continuations.len(),
                actions
            );
        }

        for continuation in continuations {
            match continuation {
                // The matching pending action is failed below
                Continuation::Request { .. } => {}
                Continuation::IncomingReport { identity, outcome } => {
                    let _ = outcome.send(Err(BridgeError::Cancelled {
                        identity,
                        operation: "incoming report",
                    }));
                }
                Continuation::StartHandler { responder, .. } | Continuation::EndHandler { responder, .. } => {
                    responder.fail();
                }
            }
        }

        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_by_key(|(_, action)| action.submitted_at);
        for ((identity, kind), action) in pending {
            action.resolve(Err(BridgeError::Cancelled {
                identity,
                operation: kind.as_str(),
            }));
        }
        for (identity, action) in self.deferred_ends.drain() {
            action.resolve(Err(BridgeError::Cancelled {
                identity,
                operation: ActionKind::End.as_str(),
            }));
        }
        self.current_start = None;
    }
}
