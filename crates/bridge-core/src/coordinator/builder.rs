//! Coordinator construction

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::audio::AudioSessionControl;
use crate::authority::TelephonyAuthority;
use crate::config::BridgeConfig;
use crate::handler::CallHandler;

use super::actor::CoordinatorActor;
use super::handle::CallCoordinator;

/// Builder for a [`CallCoordinator`]
///
/// Collects the authority, configuration, and optional collaborators, then
/// spawns the coordinator task on the current tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use callbridge_core::prelude::*;
/// use chrono::{DateTime, Utc};
/// use std::sync::Arc;
///
/// struct Host;
///
/// #[async_trait]
/// impl TelephonyAuthority for Host {
///     async fn request_action(&self, _request: ActionRequest) -> Result<(), AuthorityError> {
///         Ok(())
///     }
///     async fn report_incoming_call(&self, _id: CallIdentity, _update: CallUpdate) -> Result<(), AuthorityError> {
///         Ok(())
///     }
///     fn report_call_updated(&self, _id: CallIdentity, _update: CallUpdate) {}
///     fn report_call_ended(&self, _id: CallIdentity, _at: Option<DateTime<Utc>>, _reason: CallEndedReason) {}
/// }
///
/// # tokio_test::block_on(async {
/// let coordinator = CallCoordinator::builder(Arc::new(Host))
///     .config(BridgeConfig::new().with_localized_name("Calls"))
///     .build()
///     .expect("telephony integration available");
///
/// let mut active = coordinator.has_active_calls();
/// assert!(!*active.borrow_and_update());
/// # })
/// ```
///
/// On an unsupported platform `build` returns `None` and the application
/// falls back to its own in-app call UI:
///
/// ```rust,no_run
/// # use callbridge_core::prelude::*;
/// # use std::sync::Arc;
/// # fn host() -> Arc<dyn TelephonyAuthority> { unimplemented!() }
/// # tokio_test::block_on(async {
/// let coordinator = CallCoordinator::builder(host())
///     .config(BridgeConfig::new().with_availability(PlatformAvailability::simulator()))
///     .build();
/// assert!(coordinator.is_none());
/// # })
/// ```
pub struct CoordinatorBuilder {
    authority: Arc<dyn TelephonyAuthority>,
    config: BridgeConfig,
    audio_control: Option<Arc<dyn AudioSessionControl>>,
    handler: Option<Arc<dyn CallHandler>>,
}

impl CoordinatorBuilder {
    pub fn new(authority: Arc<dyn TelephonyAuthority>) -> Self {
        Self {
            authority,
            config: BridgeConfig::default(),
            audio_control: None,
            handler: None,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Host audio session used for route changes and incoming-call setup
    pub fn audio_control(mut self, control: Arc<dyn AudioSessionControl>) -> Self {
        self.audio_control = Some(control);
        self
    }

    /// Application handler to install from the start
    ///
    /// Can also be set later with [`CallCoordinator::set_handler`].
    pub fn handler(mut self, handler: Arc<dyn CallHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Spawn the coordinator
    ///
    /// Returns `None` when telephony integration is unavailable on this
    /// platform or the configuration is invalid. Must be called from within
    /// a tokio runtime.
    pub fn build(self) -> Option<CallCoordinator> {
        if !self.config.availability.is_available() {
            info!(
                "Telephony integration unavailable (simulator: {}, region: {:?})",
                self.config.availability.is_simulator, self.config.availability.region_code
            );
            return None;
        }
        if let Err(e) = self.config.validate() {
            error!("Refusing to start call coordinator: {}", e);
            return None;
        }

        self.authority.register_provider(&self.config.provider);

        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(self.config.event_buffer);

        let actor = CoordinatorActor::new(
            self.config,
            self.authority,
            self.handler,
            self.audio_control,
            completion_tx,
            event_tx.clone(),
        );
        let has_active_calls = actor.active.subscribe();
        let audio_session_active = actor.audio.subscribe();

        tokio::spawn(actor.run(command_rx, completion_rx));

        Some(CallCoordinator::new(
            command_tx,
            has_active_calls,
            audio_session_active,
            event_tx,
        ))
    }
}
