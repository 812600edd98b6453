//! Shared test doubles for coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};

use callbridge_core::prelude::*;

pub const WAIT: Duration = Duration::from_secs(2);

/// Authority that records everything and accepts by default
#[derive(Default)]
pub struct MockAuthority {
    requests_tx: Mutex<Option<mpsc::UnboundedSender<ActionRequest>>>,
    rejected_kinds: Mutex<HashSet<ActionKind>>,
    reject_incoming: AtomicBool,
    incoming_gate: Mutex<Option<Arc<Notify>>>,
    request_gate: Mutex<Option<Arc<Notify>>>,
    pub incoming_reports: AtomicUsize,
    pub registered: Mutex<Option<ProviderConfiguration>>,
    pub updates: Mutex<Vec<(CallIdentity, CallUpdate)>>,
    pub ended: Mutex<Vec<(CallIdentity, CallEndedReason)>>,
    pub interactions: Mutex<Vec<StartCallInteraction>>,
    pub progress: Mutex<Vec<(CallIdentity, &'static str)>>,
}

impl MockAuthority {
    pub fn new() -> (Arc<Self>, RequestProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let authority = Self::default();
        *authority.requests_tx.lock() = Some(tx);
        (Arc::new(authority), RequestProbe { rx })
    }

    pub fn reject(&self, kind: ActionKind) {
        self.rejected_kinds.lock().insert(kind);
    }

    pub fn reject_incoming(&self) {
        self.reject_incoming.store(true, Ordering::SeqCst);
    }

    /// Hold incoming reports until the returned notify is signalled
    pub fn gate_incoming(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.incoming_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold the reply to every action request until the returned notify is
    /// signalled; the request itself still reaches the probe right away
    pub fn gate_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.request_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn incoming_count(&self) -> usize {
        self.incoming_reports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelephonyAuthority for MockAuthority {
    fn register_provider(&self, config: &ProviderConfiguration) {
        *self.registered.lock() = Some(config.clone());
    }

    async fn request_action(&self, request: ActionRequest) -> Result<(), AuthorityError> {
        let kind = request.kind;
        if let Some(tx) = self.requests_tx.lock().as_ref() {
            let _ = tx.send(request);
        }
        let gate = self.request_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.rejected_kinds.lock().contains(&kind) {
            return Err(AuthorityError::new(format!("{} not allowed", kind)));
        }
        Ok(())
    }

    async fn report_incoming_call(&self, _identity: CallIdentity, _update: CallUpdate) -> Result<(), AuthorityError> {
        self.incoming_reports.fetch_add(1, Ordering::SeqCst);
        let gate = self.incoming_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.reject_incoming.load(Ordering::SeqCst) {
            return Err(AuthorityError::new("call blocked"));
        }
        Ok(())
    }

    fn report_call_updated(&self, identity: CallIdentity, update: CallUpdate) {
        self.updates.lock().push((identity, update));
    }

    fn report_call_ended(&self, identity: CallIdentity, _ended_at: Option<DateTime<Utc>>, reason: CallEndedReason) {
        self.ended.lock().push((identity, reason));
    }

    fn report_outgoing_connecting(&self, identity: CallIdentity, _at: DateTime<Utc>) {
        self.progress.lock().push((identity, "connecting"));
    }

    fn report_outgoing_connected(&self, identity: CallIdentity, _at: DateTime<Utc>) {
        self.progress.lock().push((identity, "connected"));
    }

    fn donate_interaction(&self, interaction: StartCallInteraction) {
        self.interactions.lock().push(interaction);
    }
}

/// Receiving end of the requests the mock authority saw
pub struct RequestProbe {
    rx: mpsc::UnboundedReceiver<ActionRequest>,
}

impl RequestProbe {
    pub async fn next_request(&mut self) -> ActionRequest {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an authority request")
            .expect("authority request channel closed")
    }

    pub async fn expect_no_request(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.rx.recv()).await;
        assert!(next.is_err(), "unexpected authority request: {:?}", next);
    }
}

/// Application handler with scripted answers
pub struct MockHandler {
    start_result: AtomicBool,
    end_result: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
    unhandled: Mutex<HashSet<CallbackKind>>,
    pub log: Mutex<Vec<String>>,
    pub audio: Mutex<Vec<bool>>,
}

impl MockHandler {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            start_result: AtomicBool::new(true),
            end_result: AtomicBool::new(true),
            start_gate: Mutex::new(None),
            unhandled: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
        })
    }

    pub fn declining_start() -> Arc<Self> {
        let handler = Self::accepting();
        handler.start_result.store(false, Ordering::SeqCst);
        handler
    }

    pub fn declining_end() -> Arc<Self> {
        let handler = Self::accepting();
        handler.end_result.store(false, Ordering::SeqCst);
        handler
    }

    pub fn without(kind: CallbackKind) -> Arc<Self> {
        let handler = Self::accepting();
        handler.unhandled.lock().insert(kind);
        handler
    }

    /// Block `on_start` until the returned notify is signalled
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl CallHandler for MockHandler {
    async fn on_start(
        &self,
        context: AccountContext,
        identity: CallIdentity,
        peer: Option<PeerId>,
        handle: String,
        is_video: bool,
    ) -> bool {
        self.log.lock().push(format!(
            "start:{}:{}:{:?}:{}:{}",
            context.account_id, identity, peer, handle, is_video
        ));
        let gate = self.start_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.start_result.load(Ordering::SeqCst)
    }

    fn on_answer(&self, identity: CallIdentity) {
        self.log.lock().push(format!("answer:{}", identity));
    }

    async fn on_end(&self, identity: CallIdentity) -> bool {
        self.log.lock().push(format!("end:{}", identity));
        self.end_result.load(Ordering::SeqCst)
    }

    fn on_mute(&self, identity: CallIdentity, muted: bool) {
        self.log.lock().push(format!("mute:{}:{}", identity, muted));
    }

    fn on_audio_session_changed(&self, active: bool) {
        self.audio.lock().push(active);
    }

    fn handles(&self, callback: CallbackKind) -> bool {
        !self.unhandled.lock().contains(&callback)
    }
}

/// Audio session that records applied routes
#[derive(Default)]
pub struct MockAudio {
    pub applied: Mutex<Vec<AudioRouteMode>>,
    pub prepared: AtomicUsize,
}

impl AudioSessionControl for MockAudio {
    fn apply_output_mode(&self, mode: &AudioRouteMode) {
        self.applied.lock().push(mode.clone());
    }

    fn prepare_call_session(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("callbridge_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn coordinator(authority: Arc<MockAuthority>, handler: Option<Arc<MockHandler>>) -> CallCoordinator {
    init_tracing();
    let mut builder = CallCoordinator::builder(authority);
    if let Some(handler) = handler {
        builder = builder.handler(handler);
    }
    builder.build().expect("coordinator should start on a supported platform")
}

pub fn start_request(peer: i64, title: &str) -> StartCallRequest {
    StartCallRequest::new(AccountContext::new("account-1"), PeerId(peer), title)
}

/// Deliver the perform callback the authority would send for `request`
pub async fn perform(coordinator: &CallCoordinator, request: &ActionRequest) -> oneshot::Receiver<ActionResolution> {
    let identity = request.identity;
    let (responder, rx) = ActionResponder::new(request.kind, identity);
    let event = match &request.params {
        ActionParams::Start { handle, is_video, .. } => AuthorityEvent::PerformStart {
            identity,
            handle: handle.clone(),
            is_video: *is_video,
            responder,
        },
        ActionParams::Answer => AuthorityEvent::PerformAnswer { identity, responder },
        ActionParams::End => AuthorityEvent::PerformEnd { identity, responder },
        ActionParams::Mute { muted } => AuthorityEvent::PerformMute {
            identity,
            muted: *muted,
            responder,
        },
    };
    coordinator.deliver(event).await.expect("coordinator running");
    rx
}

pub async fn resolution(rx: oneshot::Receiver<ActionResolution>) -> ActionResolution {
    tokio::time::timeout(WAIT, rx)
        .await
        .expect("timed out waiting for responder")
        .expect("responder dropped without resolving")
}

pub async fn settle<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for outcome")
}

/// Poll `condition` until it holds or the wait budget runs out
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Drain the events already queued on `stream`
pub fn drain(stream: &mut EventStream) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.try_next() {
        events.push(event);
    }
    events
}

/// Start an outgoing call and drive it through a successful start
pub async fn established_call(
    coordinator: &CallCoordinator,
    probe: &mut RequestProbe,
    peer: i64,
) -> CallIdentity {
    let started = coordinator
        .submit_start(start_request(peer, "Established"))
        .await
        .expect("start accepted");
    let request = probe.next_request().await;
    assert_eq!(request.kind, ActionKind::Start);
    let rx = perform(coordinator, &request).await;
    assert!(resolution(rx).await.is_fulfilled());
    settle(started.outcome).await.expect("start succeeds");
    started.identity
}
