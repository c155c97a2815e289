//! Stream liveness watchdog
//!
//! One watchdog per captured screen. It opens the screen's page, starts the
//! capture, then pings the stream's broadcaster every interval. A check one
//! interval after each ping restarts the capture when no pong arrived within
//! two intervals. Restarts retry forever: a failed attempt closes the page,
//! waits the restart delay, opens a fresh page and tries again.

use dashcast_core::config::{CaptureConfig, ScreenConfig};
use dashcast_core::{guard, guard_result, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureProvider, PingTransport, TargetId};
use crate::error::CaptureError;
use crate::table::Liveness;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogSettings {
    pub ping_interval: Duration,
    pub restart_delay: Duration,
    pub op_timeout: Duration,
    pub zoom: f64,
}

impl WatchdogSettings {
    #[must_use]
    pub fn from_config(capture: &CaptureConfig) -> Self {
        Self {
            ping_interval: capture.ping_interval(),
            restart_delay: capture.restart_delay(),
            op_timeout: capture.op_timeout(),
            zoom: capture.zoom,
        }
    }

    /// Pong age after which a stream counts as dead
    #[must_use]
    pub fn silence_window(&self) -> Duration {
        self.ping_interval * 2
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

pub struct StreamWatchdog {
    screen: ScreenConfig,
    room: RoomId,
    provider: Arc<dyn CaptureProvider>,
    transport: Arc<dyn PingTransport>,
    liveness: Arc<Liveness>,
    settings: WatchdogSettings,
    cancel: CancellationToken,
    target: Option<TargetId>,
}

impl StreamWatchdog {
    pub fn new(
        screen: ScreenConfig,
        provider: Arc<dyn CaptureProvider>,
        transport: Arc<dyn PingTransport>,
        liveness: Arc<Liveness>,
        settings: WatchdogSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            room: RoomId::from_string(screen.name.clone()),
            screen,
            provider,
            transport,
            liveness,
            settings,
            cancel,
            target: None,
        }
    }

    /// Run until cancelled, then close the page
    pub async fn run(mut self) {
        if self.start_capture_with_retry().await {
            self.heartbeat().await;
        }
        self.close_target().await;
        debug!(screen = %self.screen.name, "Watchdog stopped");
    }

    async fn heartbeat(&mut self) {
        let window = self.settings.silence_window();
        loop {
            debug!(screen = %self.screen.name, "Pinging stream");
            if !self.transport.ping(&self.room) {
                debug!(screen = %self.screen.name, "No broadcaster received the ping");
            }
            self.liveness.record_ping();

            if !self.pause(self.settings.ping_interval).await {
                return;
            }

            if self.liveness.is_silent(Instant::now(), window) {
                let restarts = self.liveness.count_restart();
                warn!(screen = %self.screen.name, restarts, "Got no pong from stream, restarting");
                if !self.start_capture_with_retry().await {
                    return;
                }
            } else {
                debug!(screen = %self.screen.name, "Ping/pong all good");
            }
        }
    }

    /// Start (or restart) the capture, reopening the page after each failure.
    /// Returns false only when cancelled.
    async fn start_capture_with_retry(&mut self) -> bool {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return false;
            }

            match self.try_start_capture().await {
                Ok(()) => {
                    info!(screen = %self.screen.name, attempt, "Stream started");
                    return true;
                }
                Err(error) => {
                    warn!(
                        screen = %self.screen.name,
                        attempt,
                        error = %error,
                        delay_ms = self.settings.restart_delay.as_millis() as u64,
                        "Stream failed, retrying"
                    );
                    self.close_target().await;
                    if !self.pause(self.settings.restart_delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn try_start_capture(&mut self) -> Result<(), CaptureError> {
        let target = match &self.target {
            Some(target) => target.clone(),
            None => {
                let target = guard_result(
                    self.provider.open_target(&self.screen),
                    self.settings.op_timeout,
                    "open page",
                )
                .await?;
                self.target = Some(target.clone());
                target
            }
        };

        let zoom = self.screen.zoom.unwrap_or(self.settings.zoom);
        guard_result(
            self.provider.start_capture(&target, &self.room, zoom),
            self.settings.op_timeout,
            "start capture",
        )
        .await
    }

    async fn close_target(&mut self) {
        if let Some(target) = self.target.take() {
            if guard(self.provider.close_target(&target), self.settings.op_timeout, "close page")
                .await
                .is_err()
            {
                debug!(screen = %self.screen.name, target = %target, "Closing page timed out");
            }
        }
    }

    /// Sleep unless cancelled first. Returns false when cancelled.
    async fn pause(&self, period: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }
}
