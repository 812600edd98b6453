//! In-process stand-in for the host telephony authority
//!
//! Accepted requests are queued to [`drive`], which performs them back into
//! the coordinator after a short latency, the way the host would after
//! showing its call UI. Audio session activation follows a fulfilled start
//! or answer, and deactivation follows a fulfilled end.

use async_trait::async_trait;
use callbridge_core::prelude::*;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct SimulatedAuthority {
    requests: mpsc::UnboundedSender<ActionRequest>,
    reject_incoming: bool,
}

impl SimulatedAuthority {
    /// Authority plus the receiving end to hand to [`drive`]
    pub fn new(reject_incoming: bool) -> (Self, mpsc::UnboundedReceiver<ActionRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                requests,
                reject_incoming,
            },
            rx,
        )
    }
}

#[async_trait]
impl TelephonyAuthority for SimulatedAuthority {
    fn register_provider(&self, config: &ProviderConfiguration) {
        info!(
            "Authority registered provider '{}' (video: {}, handles: {:?})",
            config.localized_name, config.supports_video, config.supported_handle_types
        );
    }

    async fn request_action(&self, request: ActionRequest) -> Result<(), AuthorityError> {
        debug!("Authority accepted {} request for call {}", request.kind, request.identity);
        self.requests
            .send(request)
            .map_err(|_| AuthorityError::new("authority is offline"))
    }

    async fn report_incoming_call(&self, identity: CallIdentity, update: CallUpdate) -> Result<(), AuthorityError> {
        if self.reject_incoming {
            warn!("Authority refused incoming call {}", identity);
            return Err(AuthorityError::new("caller is blocked"));
        }
        info!(
            "Authority ringing for call {} from {}",
            identity,
            update.localized_caller_name.as_deref().unwrap_or("unknown caller")
        );
        Ok(())
    }

    fn report_call_updated(&self, identity: CallIdentity, update: CallUpdate) {
        debug!("Authority updated call {}: {:?}", identity, update);
    }

    fn report_call_ended(&self, identity: CallIdentity, ended_at: Option<DateTime<Utc>>, reason: CallEndedReason) {
        info!("Authority ended call {} ({:?}) at {:?}", identity, reason, ended_at);
    }

    fn report_outgoing_connecting(&self, identity: CallIdentity, at: DateTime<Utc>) {
        debug!("Authority: call {} connecting at {}", identity, at);
    }

    fn report_outgoing_connected(&self, identity: CallIdentity, at: DateTime<Utc>) {
        debug!("Authority: call {} connected at {}", identity, at);
    }

    fn donate_interaction(&self, interaction: StartCallInteraction) {
        debug!("Authority recorded interaction with {}", interaction.handle);
    }
}

/// Perform event carrying `responder` for an accepted request
pub fn perform_event(request: ActionRequest, responder: ActionResponder) -> AuthorityEvent {
    let identity = request.identity;
    match request.params {
        ActionParams::Start { handle, is_video, .. } => AuthorityEvent::PerformStart {
            identity,
            handle,
            is_video,
            responder,
        },
        ActionParams::Answer => AuthorityEvent::PerformAnswer { identity, responder },
        ActionParams::End => AuthorityEvent::PerformEnd { identity, responder },
        ActionParams::Mute { muted } => AuthorityEvent::PerformMute {
            identity,
            muted,
            responder,
        },
    }
}

/// Perform queued requests until the queue or the coordinator goes away
pub async fn drive(coordinator: CallCoordinator, mut requests: mpsc::UnboundedReceiver<ActionRequest>, latency: Duration) {
    while let Some(request) = requests.recv().await {
        tokio::time::sleep(latency).await;

        let kind = request.kind;
        let identity = request.identity;
        let (responder, resolution) = ActionResponder::new(kind, identity);
        if coordinator.deliver(perform_event(request, responder)).await.is_err() {
            debug!("Coordinator stopped, dropping authority queue");
            break;
        }

        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            match resolution.await {
                Ok(resolution) if resolution.is_fulfilled() => {
                    let audio = match kind {
                        ActionKind::Start | ActionKind::Answer => coordinator.audio_session_activated().await,
                        ActionKind::End => coordinator.audio_session_deactivated().await,
                        ActionKind::Mute => Ok(()),
                    };
                    if let Err(e) = audio {
                        debug!("Could not signal audio session change: {}", e);
                    }
                }
                _ => warn!("Authority saw {} for call {} fail", kind, identity),
            }
        });
    }
}
