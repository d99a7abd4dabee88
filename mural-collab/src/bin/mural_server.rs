//! Standalone board server.
//!
//! Configuration via environment:
//! - `MURAL_ADDR` — bind address (default `127.0.0.1:9090`)
//! - `MURAL_EXPORT_DIR` — round artifact directory (default: export disabled)
//! - `RUST_LOG` — log filter (env_logger)

use log::info;
use mural_collab::server::{BoardServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("MURAL_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(dir) = std::env::var("MURAL_EXPORT_DIR") {
        config.export_dir = Some(dir.into());
    }

    info!(
        "starting mural server on {} ({} grids, {}s active / {}s rest)",
        config.bind_addr,
        config.specs.len(),
        config.round.active_ms / 1000,
        config.round.rest_ms / 1000,
    );

    BoardServer::new(config).run().await
}
