//! Cloneable handle onto a running coordinator

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::audio::AudioFocusState;
use crate::authority::{ActionRequest, AuthorityEvent, TelephonyAuthority};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventStream};
use crate::handler::CallHandler;
use crate::types::{AudioRouteMode, CallIdentity, CallRecord, IncomingCallReport, StartCallRequest};

use super::actor::Command;
use super::builder::CoordinatorBuilder;

/// Future resolving to the terminal outcome of one submission
///
/// Dropping it does not cancel anything; the action still runs to completion
/// on the coordinator, its result is just discarded.
#[derive(Debug)]
#[must_use = "an outcome does nothing unless awaited or dropped deliberately"]
pub struct PendingOutcome {
    rx: oneshot::Receiver<BridgeResult<()>>,
}

impl PendingOutcome {
    pub(crate) fn channel() -> (oneshot::Sender<BridgeResult<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Non-blocking check; `None` while still outstanding
    pub fn try_outcome(&mut self) -> Option<BridgeResult<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::CoordinatorStopped)),
        }
    }
}

impl Future for PendingOutcome {
    type Output = BridgeResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|result| result.unwrap_or(Err(BridgeError::CoordinatorStopped)))
    }
}

/// Identity of a freshly submitted outgoing call plus its start outcome
#[derive(Debug)]
pub struct StartedCall {
    pub identity: CallIdentity,
    pub outcome: PendingOutcome,
}

/// Point-in-time view of coordinator state for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSnapshot {
    pub active_calls: Vec<CallIdentity>,
    pub calls: Vec<CallRecord>,
    pub audio_focus: AudioFocusState,
    pub pending_route: Option<AudioRouteMode>,
    /// Outgoing call whose start is outstanding
    pub starting: Option<CallIdentity>,
    pub outstanding_actions: usize,
    pub outstanding_operations: usize,
}

/// Handle used by the application and the authority glue to drive the bridge
///
/// Every method is a message to the coordinator task; handles are cheap to
/// clone and may be used from any task. Once the last handle is dropped the
/// coordinator tears itself down.
#[derive(Clone)]
pub struct CallCoordinator {
    commands: mpsc::Sender<Command>,
    has_active_calls: watch::Receiver<bool>,
    audio_session_active: watch::Receiver<bool>,
    events: broadcast::Sender<BridgeEvent>,
}

impl CallCoordinator {
    /// Start building a coordinator around `authority`
    pub fn builder(authority: Arc<dyn TelephonyAuthority>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(authority)
    }

    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        has_active_calls: watch::Receiver<bool>,
        audio_session_active: watch::Receiver<bool>,
        events: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            commands,
            has_active_calls,
            audio_session_active,
            events,
        }
    }

    async fn send(&self, command: Command) -> BridgeResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::CoordinatorStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> BridgeResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| BridgeError::CoordinatorStopped)
    }

    // ===== Application side =====

    /// Register the application's signaling handler, replacing any previous one
    pub async fn set_handler(&self, handler: Arc<dyn CallHandler>) -> BridgeResult<()> {
        self.request(|reply| Command::SetHandler {
            handler: Some(handler),
            reply,
        })
        .await
    }

    /// Remove the handler; later callbacks are treated as unhandled
    pub async fn clear_handler(&self) -> BridgeResult<()> {
        self.request(|reply| Command::SetHandler { handler: None, reply }).await
    }

    /// Ask the authority to place an outgoing call
    ///
    /// The identity is returned as soon as the request is queued with the
    /// authority. Fails with [`BridgeError::StartInProgress`] while another
    /// start is still outstanding.
    pub async fn submit_start(&self, request: StartCallRequest) -> BridgeResult<StartedCall> {
        let (outcome_tx, outcome) = PendingOutcome::channel();
        let identity = self
            .request(|reply| Command::SubmitStart {
                request,
                outcome: outcome_tx,
                reply,
            })
            .await??;
        Ok(StartedCall { identity, outcome })
    }

    pub async fn submit_answer(&self, identity: CallIdentity) -> BridgeResult<PendingOutcome> {
        self.submit_action(ActionRequest::answer(identity)).await
    }

    /// Ask the authority to end a call
    ///
    /// An end submitted while the call's start is still outstanding is held
    /// back and sent once the start succeeds, or discarded if it fails.
    pub async fn submit_end(&self, identity: CallIdentity) -> BridgeResult<PendingOutcome> {
        self.submit_action(ActionRequest::end(identity)).await
    }

    pub async fn submit_mute(&self, identity: CallIdentity, muted: bool) -> BridgeResult<PendingOutcome> {
        self.submit_action(ActionRequest::mute(identity, muted)).await
    }

    async fn submit_action(&self, request: ActionRequest) -> BridgeResult<PendingOutcome> {
        let (outcome_tx, outcome) = PendingOutcome::channel();
        self.request(|reply| Command::SubmitAction {
            request,
            outcome: outcome_tx,
            reply,
        })
        .await??;
        Ok(outcome)
    }

    /// Ask the authority to surface an incoming call
    ///
    /// Reporting the same identity twice only reaches the authority once; the
    /// repeat resolves successfully straight away.
    pub async fn report_incoming(&self, report: IncomingCallReport) -> BridgeResult<PendingOutcome> {
        let (outcome_tx, outcome) = PendingOutcome::channel();
        self.send(Command::ReportIncoming {
            report,
            outcome: outcome_tx,
        })
        .await?;
        Ok(outcome)
    }

    /// Tell the authority the remote side ended the call and forget it
    pub async fn drop_call(&self, identity: CallIdentity) -> BridgeResult<()> {
        self.send(Command::DropCall { identity }).await
    }

    pub async fn report_outgoing_connecting(&self, identity: CallIdentity, at: DateTime<Utc>) -> BridgeResult<()> {
        self.send(Command::ReportOutgoing {
            identity,
            at,
            connected: false,
        })
        .await
    }

    pub async fn report_outgoing_connected(&self, identity: CallIdentity, at: DateTime<Utc>) -> BridgeResult<()> {
        self.send(Command::ReportOutgoing {
            identity,
            at,
            connected: true,
        })
        .await
    }

    /// Route audio output; deferred until the session is active
    pub async fn request_route_mode(&self, mode: AudioRouteMode) -> BridgeResult<()> {
        self.send(Command::RequestRouteMode { mode }).await
    }

    // ===== Authority side =====

    /// Deliver an authority callback
    pub async fn deliver(&self, event: AuthorityEvent) -> BridgeResult<()> {
        self.send(Command::Authority(event)).await
    }

    pub async fn provider_reset(&self) -> BridgeResult<()> {
        self.deliver(AuthorityEvent::ProviderReset).await
    }

    pub async fn audio_session_activated(&self) -> BridgeResult<()> {
        self.deliver(AuthorityEvent::AudioSessionActivated).await
    }

    pub async fn audio_session_deactivated(&self) -> BridgeResult<()> {
        self.deliver(AuthorityEvent::AudioSessionDeactivated).await
    }

    // ===== Observation =====

    /// Whether any call is live; only changes on actual flips
    pub fn has_active_calls(&self) -> watch::Receiver<bool> {
        self.has_active_calls.clone()
    }

    pub fn audio_session_active(&self) -> watch::Receiver<bool> {
        self.audio_session_active.clone()
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    pub async fn snapshot(&self) -> BridgeResult<BridgeSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop the coordinator
    ///
    /// Cancels every in-flight operation, fails every pending action with
    /// [`BridgeError::Cancelled`] and fails every authority responder still
    /// held. Shutting down an already stopped coordinator is a no-op.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Err(BridgeError::CoordinatorStopped) => {
                debug!("Coordinator already stopped");
                Ok(())
            }
            result => result,
        }
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("running", &self.is_running())
            .field("has_active_calls", &*self.has_active_calls.borrow())
            .finish()
    }
}
