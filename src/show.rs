//! Show control context
//!
//! [`ShowControl`] owns everything with a lifecycle: the configuration, the
//! coordinator (and with it the connection cache), the input device driver
//! and the running pipeline. Create it at startup and call
//! [`ShowControl::shutdown`] before exit; nothing in the crate keeps
//! process-wide state.

use crate::actuation::{
    ActuationError, ActuationReport, ActuationRequest, Coordinator, ProbeResult, SessionPolicy,
};
use crate::config::AppConfig;
use crate::midi::{DeviceDriver, DeviceError};
use crate::pipeline::{CoordinatorSink, PipelineError, PipelineHandle};
use crate::remote::{Action, Connector};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct ShowControl {
    config: AppConfig,
    coordinator: Coordinator,
    driver: Arc<dyn DeviceDriver>,
    pipeline: PipelineHandle,
}

impl ShowControl {
    pub fn new(
        mut config: AppConfig,
        connector: Arc<dyn Connector>,
        driver: Arc<dyn DeviceDriver>,
    ) -> Self {
        config.normalize();
        info!(
            "Show control ready with {} connection(s)",
            config.connections.len()
        );
        warn_mixed_credentials(&config);
        Self {
            config,
            coordinator: Coordinator::new(connector),
            driver,
            pipeline: PipelineHandle::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Replaces the configuration. A running listener keeps its settings
    /// until the next [`ShowControl::midi_start`].
    pub fn update_config(&mut self, mut config: AppConfig) {
        config.normalize();
        if self.pipeline.is_listening() {
            info!("Config updated; restart MIDI to apply it to the listener");
        }
        warn_mixed_credentials(&config);
        self.config = config;
    }

    /// Switches every enabled connection to `scene` in the background.
    ///
    /// Returns once the request is validated; the outcome is logged.
    pub fn trigger_scene(&self, scene: &str) -> Result<JoinHandle<()>, ActuationError> {
        let request = ActuationRequest::immediate(
            self.config.targets(),
            Action::scene(scene.trim()),
            self.config.call_timeout(),
        );
        info!("Switching to scene '{}'", scene.trim());
        self.coordinator.spawn_detached(request)
    }

    /// Issues `action` to every enabled connection at `fire_time` over fresh
    /// sessions, using the configured trigger timing.
    pub async fn trigger(
        &self,
        action: Action,
        fire_time: DateTime<Local>,
    ) -> Result<ActuationReport, ActuationError> {
        self.coordinator
            .actuate(ActuationRequest {
                targets: self.config.targets(),
                action,
                fire_time,
                timing: self.config.timing(),
                policy: SessionPolicy::Ephemeral,
            })
            .await
    }

    pub async fn test_connections(&self) -> Result<Vec<ProbeResult>, ActuationError> {
        if self.config.connections.is_empty() {
            return Err(ActuationError::InvalidRequest(
                "no connections configured".to_string(),
            ));
        }
        Ok(self
            .coordinator
            .probe(&self.config.targets(), self.config.call_timeout())
            .await)
    }

    /// Scenes present on every enabled connection.
    pub async fn list_scenes(&self) -> Result<Vec<String>, ActuationError> {
        self.coordinator
            .list_common_scenes(&self.config.targets(), self.config.call_timeout())
            .await
    }

    pub async fn list_scenes_for(&self, name: &str) -> Result<Vec<String>, ActuationError> {
        self.coordinator
            .list_scenes_for(&self.config.targets(), name, self.config.call_timeout())
            .await
    }

    pub fn midi_list_devices(&self) -> Result<Vec<String>, DeviceError> {
        self.driver.list_inputs()
    }

    /// Starts listening on the configured device, stopping any running
    /// listener first.
    pub async fn midi_start(&mut self) -> Result<(), PipelineError> {
        let midi = &self.config.midi;
        if midi.device.trim().is_empty() {
            return Err(PipelineError::NoDevice);
        }
        let table = midi.mapping_table();
        if table.is_empty() {
            warn!("No note mappings configured, events will be ignored");
        }
        warn_mixed_credentials(&self.config);
        let sink = Arc::new(CoordinatorSink::new(
            self.coordinator.clone(),
            self.config.targets(),
            self.config.call_timeout(),
        ));
        self.pipeline
            .start(
                self.driver.as_ref(),
                midi.device.trim(),
                midi.filter_settings(),
                table,
                sink,
            )
            .await
    }

    pub async fn midi_stop(&mut self) {
        self.pipeline.stop().await;
    }

    pub fn is_listening(&self) -> bool {
        self.pipeline.is_listening()
    }

    /// Stops the listener and closes every cached session.
    pub async fn shutdown(&mut self) {
        info!("Shutting down show control");
        self.pipeline.stop().await;
        self.coordinator.shutdown().await;
    }
}

fn warn_mixed_credentials(config: &AppConfig) {
    if config.has_mixed_credentials() {
        warn!(
            "Enabled connections use different passwords; MIDI triggers and scene switches \
             will be rejected until they match"
        );
    }
}
