mod server;

use anyhow::Result;
use dashcast_core::{bootstrap::load_config, logging};
use tracing::info;

use server::DashCastServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    logging::init_logging(&config.logging)?;
    info!("DashCast starting...");
    info!("HTTP address: {}", config.http_address());

    DashCastServer::new(config).run().await
}
