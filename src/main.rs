//! Dify Relay server
//!
//! Entry point for the chat relay.

use std::sync::Arc;

use mimalloc::MiMalloc;

use dify_relay::config::AppConfig;
use dify_relay::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenvy::dotenv();

    let config = match AppConfig::load().and_then(|config| config.validate().map(|()| config)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    // Initialize tracing (M-LOG-STRUCTURED)
    telemetry::init(config.server.debug);

    tracing::info!(
        name: "relay.starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Dify relay"
    );

    server::start_server(Arc::new(config)).await
}
