// packages/engine/src/main.rs
//! PortSniffer Capture Engine
//!
//! Hosts the capture engine and serves the control channel over TCP. Devices
//! listed under `devices.attach` are attached at start-up on loopback
//! transports.

use anyhow::Result;
use portsniffer_engine::interception::LoopbackTransport;
use portsniffer_engine::observability::{init_metrics, init_tracing};
use portsniffer_engine::utils::config::EngineConfig;
use portsniffer_engine::CaptureEngine;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting PortSniffer capture engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let mut engine = CaptureEngine::new(&config)?;

    let mut ports = Vec::new();
    for name in &config.devices.attach {
        match engine.attach(name, LoopbackTransport::echo()) {
            Ok(port) => ports.push(port),
            Err(e) => warn!("Could not attach to {}: {}", name, e),
        }
    }

    let addr = config.control.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let served = engine.control_server().serve(listener, shutdown_signal).await;

    drop(ports);
    engine.shutdown();

    match served {
        Ok(()) => {
            info!("Engine stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Control server error: {}", e);
            Err(e.into())
        }
    }
}
