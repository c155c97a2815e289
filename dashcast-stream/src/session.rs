//! Screen sessions
//!
//! One browser session hosts every configured screen, each with its own
//! watchdog. When the browser goes away the whole session is torn down and
//! rebuilt; a failed browser launch is retried after the relaunch delay.

use dashcast_core::config::{CaptureConfig, ScreenConfig};
use dashcast_core::{guard, guard_result, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::capture::{CaptureBackend, CaptureProvider, PingTransport};
use crate::table::StreamTable;
use crate::watchdog::{StreamWatchdog, WatchdogSettings};

pub struct ScreenSessionManager {
    screens: Vec<ScreenConfig>,
    backend: Arc<dyn CaptureBackend>,
    transport: Arc<dyn PingTransport>,
    table: Arc<StreamTable>,
    settings: WatchdogSettings,
    relaunch_delay: Duration,
    cancel: CancellationToken,
}

impl ScreenSessionManager {
    pub fn new(
        screens: Vec<ScreenConfig>,
        capture: &CaptureConfig,
        backend: Arc<dyn CaptureBackend>,
        transport: Arc<dyn PingTransport>,
        table: Arc<StreamTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            screens,
            backend,
            transport,
            table,
            settings: WatchdogSettings::from_config(capture),
            relaunch_delay: capture.relaunch_delay(),
            cancel,
        }
    }

    #[must_use]
    pub fn table(&self) -> Arc<StreamTable> {
        Arc::clone(&self.table)
    }

    /// Keep a browser session with every screen running until cancelled
    pub async fn run(self) {
        if self.screens.is_empty() {
            info!("No screens configured, capture disabled");
            return;
        }

        let mut generation: u64 = 0;
        loop {
            generation += 1;
            info!(generation, screens = self.screens.len(), "Launching browser");

            let launched = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                launched = guard_result(self.backend.launch(), self.settings.op_timeout, "launch browser") => launched,
            };

            let provider = match launched {
                Ok(provider) => provider,
                Err(error) => {
                    error!(
                        error = %error,
                        delay_secs = self.relaunch_delay.as_secs(),
                        "Setting up screens failed, retrying"
                    );
                    if !self.pause(self.relaunch_delay).await {
                        return;
                    }
                    continue;
                }
            };

            info!(generation, "Browser started");
            let browser_gone = self.run_session(&provider).await;

            if guard(provider.shutdown(), self.settings.op_timeout, "close browser")
                .await
                .is_err()
            {
                warn!("Closing browser timed out, ignoring");
            }
            if !browser_gone {
                info!("Screen sessions stopped");
                return;
            }
        }
    }

    /// Run one watchdog per screen until the browser goes away (true) or the
    /// manager is cancelled (false). Streams are torn down either way.
    async fn run_session(&self, provider: &Arc<dyn CaptureProvider>) -> bool {
        let session = self.cancel.child_token();
        let mut watchdogs = JoinSet::new();
        let mut streams = Vec::with_capacity(self.screens.len());

        for screen in &self.screens {
            let liveness = self
                .table
                .insert(&screen.name, RoomId::from_string(screen.name.clone()));
            streams.push(Arc::clone(&liveness));

            let span = tracing::info_span!("stream", screen = %screen.name);
            let watchdog = StreamWatchdog::new(
                screen.clone(),
                Arc::clone(provider),
                Arc::clone(&self.transport),
                liveness,
                self.settings,
                session.clone(),
            );
            watchdogs.spawn(watchdog.run().instrument(span));
        }

        let browser_gone = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = provider.closed() => true,
        };
        if browser_gone {
            warn!("Browser exited, restarting");
        }

        session.cancel();
        while let Some(joined) = watchdogs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Watchdog task failed");
            }
        }
        for liveness in &streams {
            self.table.remove(liveness);
        }
        browser_gone
    }

    async fn pause(&self, period: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }
}
