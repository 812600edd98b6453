//! Application-side stand-ins that report to the terminal

use async_trait::async_trait;
use callbridge_core::prelude::*;
use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::task::JoinHandle;
use tracing::info;

/// Signaling layer that accepts everything unless told to decline starts
pub struct ConsoleHandler {
    decline_start: bool,
}

impl ConsoleHandler {
    pub fn new(decline_start: bool) -> Self {
        Self { decline_start }
    }
}

#[async_trait]
impl CallHandler for ConsoleHandler {
    async fn on_start(
        &self,
        context: AccountContext,
        identity: CallIdentity,
        peer: Option<PeerId>,
        handle: String,
        is_video: bool,
    ) -> bool {
        info!(
            "Signaling: account {} dials {} (peer {:?}, video: {}) for call {}",
            context.account_id, handle, peer, is_video, identity
        );
        !self.decline_start
    }

    fn on_answer(&self, identity: CallIdentity) {
        info!("Signaling: answering call {}", identity);
    }

    async fn on_end(&self, identity: CallIdentity) -> bool {
        info!("Signaling: hanging up call {}", identity);
        true
    }

    fn on_mute(&self, identity: CallIdentity, muted: bool) {
        info!("Signaling: call {} muted: {}", identity, muted);
    }

    fn on_audio_session_changed(&self, active: bool) {
        info!("Signaling: audio session active: {}", active);
    }
}

/// Audio control that only logs what it would do
pub struct ConsoleAudio;

impl AudioSessionControl for ConsoleAudio {
    fn apply_output_mode(&self, mode: &AudioRouteMode) {
        info!("Audio: routing output to {:?}", mode);
    }

    fn prepare_call_session(&self) {
        info!("Audio: configuring session for an incoming call");
    }
}

/// Print bridge events until the coordinator shuts down
pub fn print_events(mut events: EventStream, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Could not encode event: {}", e),
                }
            } else {
                println!("{}", describe(&event));
            }
        }
    })
}

fn describe(event: &BridgeEvent) -> String {
    match event {
        BridgeEvent::CallStarted { identity } => format!("{} {}", "started".green().bold(), identity),
        BridgeEvent::CallFailed { identity, reason } => {
            format!("{} {}: {}", "failed".red().bold(), identity, reason)
        }
        BridgeEvent::IncomingCallReported { identity } => format!("{} {}", "ringing".cyan().bold(), identity),
        BridgeEvent::CallEnded { identity, ended_at } => {
            format!("{} {} at {}", "ended".yellow().bold(), identity, ended_at)
        }
        BridgeEvent::PhaseChanged {
            identity,
            previous,
            current,
        } => format!("{} {} {:?} -> {:?}", "phase".blue(), identity, previous, current),
        BridgeEvent::ActiveCallsChanged { has_active_calls } => {
            format!("{} {}", "active calls".blue(), has_active_calls)
        }
        BridgeEvent::AudioSessionChanged { active } => format!("{} {}", "audio session".magenta(), active),
        BridgeEvent::RouteModeApplied { mode } => format!("{} {:?}", "route".magenta(), mode),
        BridgeEvent::ProtocolMismatch {
            kind,
            identity,
            details,
        } => format!("{} {} {}: {}", "mismatch".red(), kind, identity, details),
        BridgeEvent::ProviderReset { cleared } => {
            format!("{} {} call(s) cleared", "provider reset".red().bold(), cleared.len())
        }
    }
}

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "Call")]
    identity: String,
    #[tabled(rename = "Peer")]
    peer: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Handle")]
    handle: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Video")]
    video: bool,
}

impl From<&CallRecord> for CallRow {
    fn from(record: &CallRecord) -> Self {
        Self {
            identity: record.identity.to_string(),
            peer: record.peer.map(|peer| peer.to_string()).unwrap_or_else(|| "-".to_string()),
            title: record.display_title.clone(),
            handle: record
                .handle
                .as_ref()
                .map(|handle| format!("{} ({:?})", handle.value, handle.kind))
                .unwrap_or_else(|| "-".to_string()),
            phase: format!("{:?}", record.phase),
            video: record.is_video,
        }
    }
}

/// Render the calls in a snapshot plus a one-line summary
pub fn render_snapshot(snapshot: &BridgeSnapshot) -> String {
    let mut table = Table::new(snapshot.calls.iter().map(CallRow::from));
    table.with(Style::rounded());
    format!(
        "{}\nactive: {}  audio: {:?}  pending route: {:?}  outstanding actions: {}",
        table,
        snapshot.active_calls.len(),
        snapshot.audio_focus,
        snapshot.pending_route,
        snapshot.outstanding_actions
    )
}
