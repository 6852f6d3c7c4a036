// packages/engine/src/control/server.rs
//! Control channel server
//!
//! Exposes the control protocol over TCP. A connection holds the exclusive
//! control session for its whole lifetime; request handling runs on the
//! blocking pool since it takes the registry and log locks.

use crate::control::frame::{self, RequestFrame};
use crate::control::handler::Completion;
use crate::control::protocol::Status;
use crate::control::session::ControlSession;
use crate::monitor::registry::DeviceRegistry;
use crate::utils::errors::{EngineError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// How long a rejected connection is kept around so the peer can read why
const REJECT_LINGER: Duration = Duration::from_secs(1);

pub struct ControlServer {
    registry: Arc<DeviceRegistry>,
}

impl ControlServer {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn run<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Control channel listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Control channel shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);

                        tokio::spawn(async move {
                            debug!("Accepted control connection from {}", peer);

                            if let Err(e) = handle_connection(registry, stream, peer).await {
                                warn!("Control connection {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    registry: Arc<DeviceRegistry>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    stream.set_nodelay(true)?;

    let session = match ControlSession::open(registry) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            debug!("Rejecting control connection from {}: {}", peer, e);
            return reject(stream, Status::from(&e)).await;
        }
    };

    while let Some(request) = frame::read_request(&mut stream).await? {
        let (result, output) = execute(Arc::clone(&session), request).await?;

        match result {
            Ok(completion) => {
                frame::write_response(&mut stream, completion.status, &output[..completion.information])
                    .await?;
            }
            Err(e) => {
                frame::write_response(&mut stream, Status::from(&e), &[]).await?;

                if matches!(e, EngineError::ChannelClosed) {
                    info!("Control channel gone, closing connection from {}", peer);
                    break;
                }
            }
        }
    }

    debug!("Control connection from {} closed", peer);
    Ok(())
}

async fn execute(
    session: Arc<ControlSession>,
    request: RequestFrame,
) -> Result<(Result<Completion>, Vec<u8>)> {
    tokio::task::spawn_blocking(move || {
        let mut output = vec![0u8; request.output_capacity];
        let result = session.call(request.code, &request.input, &mut output);
        (result, output)
    })
    .await
    .map_err(|e| EngineError::Protocol(format!("Request handler failed: {}", e)))
}

/// Answer with a single status frame and close
async fn reject(mut stream: TcpStream, status: Status) -> Result<()> {
    frame::write_response(&mut stream, status, &[]).await?;
    stream.shutdown().await?;

    // Drain until the peer hangs up; closing with unread input resets the
    // connection and can discard the status frame
    let mut sink = [0u8; 512];
    let _ = tokio::time::timeout(REJECT_LINGER, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;

    Ok(())
}
