//! Device playback supervisor
//!
//! One supervisor owns one device: its control connection, its receiver
//! session and its [`DeviceRecord`]. It connects, launches the receiver
//! application, loads the assigned room and then polls on a fixed cadence,
//! restarting playback when it stalls.
//!
//! Failure policy:
//! - setup failure (connect, launch, initial load) ends supervision with
//!   [`SupervisionEnd::SetupFailed`];
//! - a failed poll on an existing connection discards it and retries once
//!   with a fresh one; if that fails too, supervision pauses until
//!   [`DeviceHandle::reset`];
//! - a connection-level fault ends supervision with [`SupervisionEnd::Lost`].

use dashcast_core::config::CastConfig;
use dashcast_core::{guard, guard_result, Subscribers, TimeoutConfig};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceEvent, DeviceRecord, DeviceState, PlaybackMonitor, PlaybackVerdict, StallReason};
use crate::error::CastError;
use crate::sdk::{CastConnection, CastConnector, MediaDescriptor, PlayerState, PlayerStatus, ReceiverSession};

/// Tunables for one supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub app_id: String,
    pub poll_interval: Duration,
    pub timeouts: TimeoutConfig,
    pub max_buffering_polls: u32,
}

impl SupervisorSettings {
    #[must_use]
    pub fn from_config(cast: &CastConfig) -> Self {
        Self {
            app_id: cast.app_id.clone(),
            poll_interval: cast.poll_interval(),
            timeouts: TimeoutConfig::new()
                .with_remote_op_timeout(cast.op_timeout())
                .with_stop_timeout(cast.stop_timeout()),
            max_buffering_polls: cast.max_buffering_polls,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&CastConfig::default())
    }
}

/// How a supervision run ended
#[derive(Debug)]
pub enum SupervisionEnd {
    /// Connect, launch or the initial load failed
    SetupFailed(CastError),
    /// The control connection reported a connection-level error
    Lost(CastError),
    Cancelled,
}

/// Shared view of a running supervisor
#[derive(Clone)]
pub struct DeviceHandle {
    record: Arc<RwLock<DeviceRecord>>,
    reset: Arc<Notify>,
    cancel: CancellationToken,
}

impl DeviceHandle {
    #[must_use]
    pub fn snapshot(&self) -> DeviceRecord {
        self.record.read().clone()
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.record.read().state
    }

    /// Resume a paused supervisor. Returns false when it is not paused.
    pub fn reset(&self) -> bool {
        if self.state() != DeviceState::Error {
            return false;
        }
        self.reset.notify_one();
        true
    }

    /// Stop supervising; the supervisor closes its connection and returns
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn same_device(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}

enum Wake {
    Tick,
    Fault(CastError),
    Cancelled,
}

pub struct DeviceSupervisor {
    host: String,
    media: MediaDescriptor,
    settings: SupervisorSettings,
    connector: Arc<dyn CastConnector>,
    events: Arc<Subscribers<DeviceEvent>>,
    handle: DeviceHandle,
    monitor: PlaybackMonitor,
    connection: Option<Box<dyn CastConnection>>,
    session: Option<Box<dyn ReceiverSession>>,
    last_player_state: Option<PlayerState>,
}

impl DeviceSupervisor {
    pub fn new(
        record: DeviceRecord,
        media: MediaDescriptor,
        settings: SupervisorSettings,
        connector: Arc<dyn CastConnector>,
        events: Arc<Subscribers<DeviceEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host: record.host.clone(),
            media,
            monitor: PlaybackMonitor::new(settings.max_buffering_polls),
            settings,
            connector,
            events,
            handle: DeviceHandle {
                record: Arc::new(RwLock::new(record)),
                reset: Arc::new(Notify::new()),
                cancel,
            },
            connection: None,
            session: None,
            last_player_state: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }

    /// Supervise the device until setup fails, the connection is lost or the
    /// handle is cancelled.
    pub async fn run(mut self) -> SupervisionEnd {
        let cancel = self.handle.cancel.clone();

        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.start() => Some(result),
        };
        match started {
            None => {
                self.discard_connection().await;
                return SupervisionEnd::Cancelled;
            }
            Some(Err(error)) => {
                error!(host = %self.host, error = %error, "Fatal error while setting up device");
                self.fail(&error);
                self.discard_connection().await;
                return SupervisionEnd::SetupFailed(error);
            }
            Some(Ok(())) => {}
        }

        let mut poll_now = false;
        loop {
            if !poll_now {
                match self.wait(&cancel, self.settings.poll_interval).await {
                    Wake::Tick => {}
                    Wake::Cancelled => {
                        self.discard_connection().await;
                        return SupervisionEnd::Cancelled;
                    }
                    Wake::Fault(error) => {
                        warn!(host = %self.host, error = %error, "Control connection failed, stopping status checks");
                        self.fail(&error);
                        self.events.emit(&DeviceEvent::Lost {
                            host: self.host.clone(),
                            error: error.to_string(),
                        });
                        self.discard_connection().await;
                        return SupervisionEnd::Lost(error);
                    }
                }
            }
            poll_now = false;

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.poll_with_retry() => Some(result),
            };
            let Some(result) = polled else {
                self.discard_connection().await;
                return SupervisionEnd::Cancelled;
            };

            if let Err(error) = result {
                error!(host = %self.host, error = %error, "Status check failed, pausing supervision until reset");
                self.fail(&error);
                self.discard_connection().await;
                self.events.emit(&DeviceEvent::Paused {
                    host: self.host.clone(),
                    error: error.to_string(),
                });

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return SupervisionEnd::Cancelled,
                    () = self.handle.reset.notified() => {
                        info!(host = %self.host, "Supervision resumed by reset");
                        self.set_state(DeviceState::Disconnected);
                        poll_now = true;
                    }
                }
            }
        }
    }

    async fn start(&mut self) -> Result<(), CastError> {
        info!(host = %self.host, "Connecting to device");
        self.open_connection().await?;
        info!(host = %self.host, room = %self.media.room, "Connected, launching receiver application");
        self.launch_and_load().await
    }

    async fn wait(&self, cancel: &CancellationToken, period: Duration) -> Wake {
        let fault = async {
            match self.connection.as_deref() {
                Some(connection) => connection.fault().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Wake::Cancelled,
            error = fault => Wake::Fault(error),
            () = tokio::time::sleep(period) => Wake::Tick,
        }
    }

    async fn poll_with_retry(&mut self) -> Result<(), CastError> {
        let had_connection = self.connection.is_some();
        match self.poll().await {
            Ok(()) => Ok(()),
            Err(error) if had_connection => {
                warn!(host = %self.host, error = %error, "Status check failed, retrying with a new connection");
                self.discard_connection().await;
                self.poll().await
            }
            Err(error) => Err(error),
        }
    }

    async fn poll(&mut self) -> Result<(), CastError> {
        if self.connection.is_none() {
            self.open_connection().await?;
        }

        debug!(host = %self.host, "Checking status");
        let status = guard_result(
            self.connection()?.receiver_status(),
            self.settings.timeouts.remote_op,
            "receiver status",
        )
        .await?;

        let running = status.is_running(&self.settings.app_id);
        self.update(|record| {
            record.last_status = Some(status.clone());
            record.status_updated_at = Some(chrono::Utc::now());
        });
        self.events.emit(&DeviceEvent::ReceiverStatus {
            host: self.host.clone(),
            status,
        });

        if !running {
            warn!(host = %self.host, app_id = %self.settings.app_id, "Receiver application not in foreground, relaunching");
            return self.launch_and_load().await;
        }

        // Fresh connection: join the running application
        if self.session.is_none() {
            self.launch().await?;
        }

        let player = guard_result(
            self.session()?.player_status(),
            self.settings.timeouts.remote_op,
            "player status",
        )
        .await?;
        self.observe_player(player);

        let verdict = self.monitor.observe(&player);
        let buffering_count = self.monitor.buffering_count();
        self.update(|record| record.buffering_count = buffering_count);

        match verdict {
            PlaybackVerdict::Healthy => self.set_state(DeviceState::Playing),
            PlaybackVerdict::Buffering => {
                debug!(host = %self.host, buffering_count, "Player buffering");
                self.set_state(DeviceState::Buffering);
            }
            PlaybackVerdict::Stalled(reason) => self.resume_playback(reason).await?,
        }
        Ok(())
    }

    async fn open_connection(&mut self) -> Result<(), CastError> {
        self.set_state(DeviceState::Connecting);
        let connection = guard_result(
            self.connector.connect(&self.host),
            self.settings.timeouts.remote_op,
            "connect",
        )
        .await
        .map_err(|error| error.into_connect(&self.host))?;

        self.connection = Some(connection);
        self.session = None;
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), CastError> {
        let session = guard_result(
            self.connection()?.launch(&self.settings.app_id),
            self.settings.timeouts.remote_op,
            "launch",
        )
        .await
        .map_err(|error| error.into_launch(&self.settings.app_id))?;

        self.session = Some(session);
        Ok(())
    }

    async fn launch_and_load(&mut self) -> Result<(), CastError> {
        self.launch().await?;
        let status = self.load().await?;
        info!(
            host = %self.host,
            room = %self.media.room,
            player_state = %status.player_state,
            "Media loaded"
        );
        self.set_state(DeviceState::Launched);
        Ok(())
    }

    async fn load(&self) -> Result<PlayerStatus, CastError> {
        guard_result(
            self.session()?.load(&self.media),
            self.settings.timeouts.remote_op,
            "load media",
        )
        .await
    }

    async fn resume_playback(&mut self, reason: StallReason) -> Result<(), CastError> {
        warn!(host = %self.host, reason = ?reason, "Playback stalled, resuming");
        self.set_state(DeviceState::Stalled);
        self.events.emit(&DeviceEvent::Recovering {
            host: self.host.clone(),
            reason,
        });

        if let Err(error) = guard_result(
            self.session()?.stop(),
            self.settings.timeouts.stop,
            "stop playback",
        )
        .await
        {
            warn!(host = %self.host, error = %error, "Stopping playback failed, ignoring");
        }

        let status = self.load().await?;
        info!(
            host = %self.host,
            room = %self.media.room,
            player_state = %status.player_state,
            "Playback resumed"
        );
        self.set_state(DeviceState::Launched);
        self.events.emit(&DeviceEvent::Resumed { host: self.host.clone() });
        Ok(())
    }

    fn observe_player(&mut self, status: PlayerStatus) {
        if self.last_player_state != Some(status.player_state) {
            info!(host = %self.host, player_state = %status.player_state, "Player status changed");
            self.last_player_state = Some(status.player_state);
        }
        self.update(|record| record.player_state = Some(status.player_state));
        self.events.emit(&DeviceEvent::PlayerStatus {
            host: self.host.clone(),
            status,
        });
    }

    async fn discard_connection(&mut self) {
        self.session = None;
        if let Some(connection) = self.connection.take() {
            if guard(connection.close(), self.settings.timeouts.stop, "close connection")
                .await
                .is_err()
            {
                debug!(host = %self.host, "Closing connection timed out, ignoring");
            }
        }
    }

    fn connection(&self) -> Result<&dyn CastConnection, CastError> {
        self.connection
            .as_deref()
            .ok_or_else(|| CastError::Transport("no control connection".to_string()))
    }

    fn session(&self) -> Result<&dyn ReceiverSession, CastError> {
        self.session
            .as_deref()
            .ok_or_else(|| CastError::Transport("receiver application not launched".to_string()))
    }

    fn fail(&self, error: &CastError) {
        self.update(|record| record.last_error = Some(error.to_string()));
        self.set_state(DeviceState::Error);
    }

    fn set_state(&self, state: DeviceState) {
        let previous = {
            let mut record = self.handle.record.write();
            std::mem::replace(&mut record.state, state)
        };
        if previous != state {
            debug!(host = %self.host, from = %previous, to = %state, "Device state changed");
            self.events.emit(&DeviceEvent::StateChanged {
                host: self.host.clone(),
                state,
            });
        }
    }

    fn update(&self, f: impl FnOnce(&mut DeviceRecord)) {
        f(&mut self.handle.record.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl CastConnector for Unreachable {
        async fn connect(&self, host: &str) -> Result<Box<dyn CastConnection>, CastError> {
            Err(CastError::Transport(format!("{host} refused the connection")))
        }
    }

    fn supervisor(connector: Arc<dyn CastConnector>) -> DeviceSupervisor {
        DeviceSupervisor::new(
            DeviceRecord::new("10.0.0.5", "Lobby TV", "lobby"),
            MediaDescriptor::new("lobby", "http://10.0.0.2:8000"),
            SupervisorSettings::default(),
            connector,
            Arc::new(Subscribers::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_settings_follow_config() {
        let cast = CastConfig {
            poll_interval_secs: 30,
            stop_timeout_secs: 2,
            ..CastConfig::default()
        };
        let settings = SupervisorSettings::from_config(&cast);
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.timeouts.stop, Duration::from_secs(2));
        assert_eq!(settings.timeouts.remote_op, Duration::from_secs(60));
        assert_eq!(settings.app_id, "14E2E176");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_device_is_a_setup_failure() {
        let supervisor = supervisor(Arc::new(Unreachable));
        let handle = supervisor.handle();

        let end = supervisor.run().await;
        assert!(matches!(end, SupervisionEnd::SetupFailed(ref e) if e.is_setup_failure()));

        let record = handle.snapshot();
        assert_eq!(record.state, DeviceState::Error);
        assert!(record.last_error.unwrap().contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_only_applies_when_paused() {
        let supervisor = supervisor(Arc::new(Unreachable));
        let handle = supervisor.handle();
        assert!(!handle.reset());

        handle.cancel();
        assert!(matches!(supervisor.run().await, SupervisionEnd::Cancelled));
    }
}
