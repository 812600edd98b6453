//! Scripted call flows run against the simulated authority

use anyhow::{Context, Result};
use callbridge_core::prelude::*;
use callbridge_recorder::CallRecorder;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::authority::{self, SimulatedAuthority};
use crate::console::{self, ConsoleAudio, ConsoleHandler};
use crate::settings::Settings;

/// One 20 ms frame at the recording rate
const FRAME_SAMPLES: usize = 960;
const TONE_HZ: f32 = 440.0;
const PRINTER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct OutgoingScenario {
    pub peer: i64,
    pub title: String,
    pub phone_number: Option<String>,
    pub video: bool,
    pub decline: bool,
    pub mute: bool,
    pub speaker: bool,
}

#[derive(Debug, Clone)]
pub struct IncomingScenario {
    pub handle: String,
    pub title: String,
    pub stable_id: Option<i64>,
    pub video: bool,
    pub reject: bool,
    pub remote_hangup: bool,
}

/// Output options shared by every scenario
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub json_events: bool,
    pub record_dir: Option<PathBuf>,
}

struct Harness {
    coordinator: CallCoordinator,
    printer: tokio::task::JoinHandle<()>,
    hold: Duration,
}

impl Harness {
    fn start(settings: &Settings, options: &RunOptions, reject_incoming: bool, decline_start: bool) -> Result<Self> {
        let (authority, requests) = SimulatedAuthority::new(reject_incoming);
        let coordinator = CallCoordinator::builder(Arc::new(authority))
            .config(settings.bridge.clone())
            .handler(Arc::new(ConsoleHandler::new(decline_start)))
            .audio_control(Arc::new(ConsoleAudio))
            .build()
            .context("call integration is unavailable on this platform or the bridge config is invalid")?;

        let printer = console::print_events(coordinator.subscribe_events(), options.json_events);
        let latency = Duration::from_millis(settings.simulation.authority_latency_ms);
        tokio::spawn(authority::drive(coordinator.clone(), requests, latency));

        Ok(Self {
            coordinator,
            printer,
            hold: Duration::from_millis(settings.simulation.hold_ms),
        })
    }

    async fn show_snapshot(&self) -> Result<()> {
        let snapshot = self.coordinator.snapshot().await?;
        println!("{}", console::render_snapshot(&snapshot));
        Ok(())
    }

    /// Hold the call, recording a test tone when asked
    async fn hold_call(&self, call_id: i64, record_dir: Option<&PathBuf>) -> Result<()> {
        let Some(dir) = record_dir else {
            tokio::time::sleep(self.hold).await;
            return Ok(());
        };

        let mut recorder = CallRecorder::new(dir)?;
        recorder.start(call_id)?;
        let frames = (self.hold.as_millis() / 20).max(1) as usize;
        for frame in 0..frames {
            let samples = tone(frame);
            recorder.write_input(&samples)?;
            recorder.write_output(&samples)?;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if let Some(done) = recorder.stop()? {
            println!(
                "recorded {} and {}",
                done.input_path.display(),
                done.output_path.display()
            );
        }
        Ok(())
    }

    async fn finish(self) -> Result<()> {
        self.coordinator.shutdown().await?;
        drop(self.coordinator);
        match tokio::time::timeout(PRINTER_GRACE, self.printer).await {
            Ok(Err(e)) => warn!("Event printer stopped abnormally: {}", e),
            Err(_) => warn!("Event stream still open after shutdown"),
            Ok(Ok(())) => {}
        }
        Ok(())
    }
}

fn tone(frame: usize) -> Vec<i16> {
    let rate = callbridge_recorder::SAMPLE_RATE as f32;
    (0..FRAME_SAMPLES)
        .map(|i| {
            let t = (frame * FRAME_SAMPLES + i) as f32 / rate;
            ((t * TONE_HZ * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.25) as i16
        })
        .collect()
}

/// Place a call, hold it, then hang up from the app
pub async fn run_outgoing(settings: &Settings, scenario: OutgoingScenario, options: RunOptions) -> Result<()> {
    let harness = Harness::start(settings, &options, false, scenario.decline)?;
    let coordinator = &harness.coordinator;

    if scenario.speaker {
        coordinator.request_route_mode(AudioRouteMode::Speaker).await?;
    }

    let mut request = StartCallRequest::new(
        AccountContext::new(settings.simulation.account_id.as_str()),
        PeerId(scenario.peer),
        scenario.title.as_str(),
    )
    .with_video(scenario.video);
    if let Some(number) = &scenario.phone_number {
        request = request.with_phone_number(number.as_str());
    }

    let started = coordinator.submit_start(request).await?;
    let identity = started.identity;
    if let Err(e) = started.outcome.await {
        warn!("Call {} did not start: {}", identity, e);
        return harness.finish().await;
    }

    coordinator.report_outgoing_connecting(identity, Utc::now()).await?;
    coordinator.report_outgoing_connected(identity, Utc::now()).await?;
    harness.show_snapshot().await?;

    if scenario.mute {
        coordinator.submit_mute(identity, true).await?.await?;
    }
    harness.hold_call(scenario.peer, options.record_dir.as_ref()).await?;

    coordinator.submit_end(identity).await?.await?;
    info!("Call {} finished", identity);
    harness.show_snapshot().await?;
    harness.finish().await
}

/// Surface an incoming call, answer it, then hang up
pub async fn run_incoming(settings: &Settings, scenario: IncomingScenario, options: RunOptions) -> Result<()> {
    let harness = Harness::start(settings, &options, scenario.reject, false)?;
    let coordinator = &harness.coordinator;
    let identity = CallIdentity::new();

    let mut report = IncomingCallReport::new(identity, scenario.handle.as_str(), scenario.title.as_str())
        .with_video(scenario.video);
    if let Some(stable_id) = scenario.stable_id {
        report = report.with_stable_id(stable_id);
    }

    if let Err(e) = coordinator.report_incoming(report).await?.await {
        warn!("Incoming call {} was not surfaced: {}", identity, e);
        return harness.finish().await;
    }

    coordinator.submit_answer(identity).await?.await?;
    harness.show_snapshot().await?;
    harness
        .hold_call(scenario.stable_id.unwrap_or_default(), options.record_dir.as_ref())
        .await?;

    if scenario.remote_hangup {
        coordinator.drop_call(identity).await?;
        coordinator.audio_session_deactivated().await?;
    } else {
        coordinator.submit_end(identity).await?.await?;
    }
    info!("Call {} finished", identity);
    harness.show_snapshot().await?;
    harness.finish().await
}
