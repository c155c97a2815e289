//! Server wiring
//!
//! Builds the relay, the capture side and the device side from
//! configuration, serves HTTP, and tears everything down on shutdown.

use anyhow::Result;
use dashcast_api::{create_router, net::local_ipv4, AppState};
use dashcast_cast::{DeviceRegistry, Discovery, HttpCastConnector, MdnsDiscovery, StaticDiscovery};
use dashcast_core::config::{CastConfig, DiscoveryMode};
use dashcast_core::{guard, Config};
use dashcast_relay::SignalingRelay;
use dashcast_stream::{HttpCaptureBackend, PingTransport, ScreenSessionManager, StreamTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DashCastServer {
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl DashCastServer {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let relay = Arc::new(SignalingRelay::new(config.relay.outbound_buffer));
        let streams = Arc::new(StreamTable::new());
        let _pong_observer = streams.observe(&relay);

        let mut background = JoinSet::new();
        self.start_capture(&relay, &streams, &mut background)?;
        let registry = self.start_devices()?;

        let router = create_router(AppState {
            relay,
            registry,
            streams,
            config: Arc::clone(config),
        });

        let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        tokio::spawn({
            let cancel = self.cancel.clone();
            async move {
                shutdown_signal().await;
                info!("Shutdown signal received, starting graceful shutdown...");
                cancel.cancel();
            }
        });

        let cancel = self.cancel.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = &served {
            error!("HTTP server error: {}", e);
        }

        self.cancel.cancel();
        let drained = guard(
            async {
                while let Some(joined) = background.join_next().await {
                    if let Err(e) = joined {
                        error!(error = %e, "Background task failed");
                    }
                }
            },
            DRAIN_TIMEOUT,
            "drain background tasks",
        )
        .await;
        if drained.is_err() {
            warn!("Background tasks did not stop in time");
        }

        info!("DashCast stopped");
        Ok(served?)
    }

    fn start_capture(
        &self,
        relay: &Arc<SignalingRelay>,
        streams: &Arc<StreamTable>,
        background: &mut JoinSet<()>,
    ) -> Result<()> {
        let Some(endpoint) = &self.config.capture.endpoint else {
            if !self.config.screens.is_empty() {
                warn!("capture.endpoint not set, screens will not be captured");
            }
            return Ok(());
        };

        let backend = HttpCaptureBackend::new(endpoint)?;
        let transport: Arc<dyn PingTransport> = relay.clone();
        let manager = ScreenSessionManager::new(
            self.config.screens.clone(),
            &self.config.capture,
            Arc::new(backend),
            transport,
            Arc::clone(streams),
            self.cancel.child_token(),
        );
        background.spawn(manager.run().instrument(tracing::info_span!("screens")));
        info!(endpoint = %endpoint, screens = self.config.screens.len(), "Screen capture enabled");
        Ok(())
    }

    fn start_devices(&self) -> Result<Option<Arc<DeviceRegistry>>> {
        let Some(bridge_url) = &self.config.cast.bridge_url else {
            info!("cast.bridge_url not set, device supervision disabled");
            return Ok(None);
        };

        let connector = HttpCastConnector::new(bridge_url)?;
        let discovery = discovery(&self.config.cast);
        let signal_host = signal_host(&self.config);
        info!(bridge = %bridge_url, signal_host = %signal_host, "Device supervision enabled");

        let registry = DeviceRegistry::new(
            self.config.cast.clone(),
            signal_host,
            Arc::new(connector),
            discovery,
            self.cancel.child_token(),
        );
        registry.start();
        Ok(Some(registry))
    }
}

/// mDNS with the configured devices as fallback, or the configured devices alone
fn discovery(cast: &CastConfig) -> Arc<dyn Discovery> {
    let configured = StaticDiscovery::new(&cast.devices);
    match cast.discovery {
        DiscoveryMode::Static => Arc::new(configured),
        DiscoveryMode::Mdns => match MdnsDiscovery::new(cast.network_interface.as_deref(), configured.clone()) {
            Ok(mdns) => Arc::new(mdns),
            Err(e) => {
                warn!(error = %e, devices = cast.devices.len(), "mDNS unavailable, using configured devices only");
                Arc::new(configured)
            }
        },
    }
}

/// Address receivers use to reach the signaling server
fn signal_host(config: &Config) -> String {
    if let Some(public_url) = &config.server.public_url {
        return public_url.trim_end_matches('/').to_string();
    }
    let host = local_ipv4().map_or_else(|| config.server.host.clone(), |ip| ip.to_string());
    format!("http://{host}:{}", config.server.port)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
