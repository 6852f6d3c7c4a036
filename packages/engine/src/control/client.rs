// packages/engine/src/control/client.rs
//! Consumer side of the control channel

use crate::capture::record::{MonitorMask, ENTRY_RECORD_SIZE};
use crate::control::frame;
use crate::control::protocol::{
    attached_devices_retry_len, decode_attached_devices, decode_pop_response, AttachedDevices,
    Compatible, PopLogEntryRequest, PoppedEntry, RequestCode, ResetMonitoringRequest, Status,
    VersionInfo, ATTACHED_DEVICES_HEADER_LEN, VERSION_RESPONSE_LEN,
};
use crate::utils::errors::{EngineError, Result};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Pause between polls once a device's log is drained
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const ATTACHED_DEVICES_INITIAL_LEN: usize = 256;

pub struct ControlClient {
    stream: TcpStream,
}

impl ControlClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send a raw request and wait for its response
    pub async fn call(
        &mut self,
        code: u32,
        input: &[u8],
        output_capacity: usize,
    ) -> Result<(Status, Vec<u8>)> {
        frame::write_request(&mut self.stream, code, input, output_capacity).await?;
        frame::read_response(&mut self.stream).await
    }

    pub async fn get_version(&mut self) -> Result<VersionInfo> {
        let (status, output) = self
            .call(RequestCode::GetVersion.as_u32(), &[], VERSION_RESPONSE_LEN)
            .await?;
        status.check("")?;
        VersionInfo::decode(&output)
    }

    /// Fetch the server version and compare it with ours
    pub async fn check_version(&mut self) -> Result<Compatible> {
        let server = self.get_version().await?;
        let compatibility = VersionInfo::CURRENT.compatibility(&server);

        match compatibility {
            Compatible::Full => debug!("Server version {} matches", server),
            Compatible::Major => warn!(
                "Server version {} differs from client version {} in the minor version",
                server,
                VersionInfo::CURRENT
            ),
            Compatible::Incompatible => warn!(
                "Server version {} is incompatible with client version {}",
                server,
                VersionInfo::CURRENT
            ),
        }

        Ok(compatibility)
    }

    pub async fn get_attached_devices(&mut self) -> Result<Vec<String>> {
        let mut capacity = ATTACHED_DEVICES_INITIAL_LEN;

        loop {
            let offered = capacity.max(ATTACHED_DEVICES_HEADER_LEN);
            let (status, output) = self
                .call(RequestCode::GetAttachedDevices.as_u32(), &[], offered)
                .await?;

            match decode_attached_devices(status, &output)? {
                AttachedDevices::Complete(names) => return Ok(names),
                AttachedDevices::Overflow { required } if required > frame::MAX_FRAME_PAYLOAD => {
                    return Err(EngineError::Overflow { required });
                }
                AttachedDevices::Overflow { required } => {
                    capacity = attached_devices_retry_len(offered, required)?;
                }
            }
        }
    }

    pub async fn reset_monitoring(&mut self, device: &str, mask: MonitorMask) -> Result<()> {
        let input = ResetMonitoringRequest {
            device: device.to_string(),
            mask,
        }
        .encode()?;

        let (status, _) = self
            .call(RequestCode::ResetMonitoring.as_u32(), &input, 0)
            .await?;
        status.check(device)
    }

    pub async fn pop_log_entry(&mut self, device: &str) -> Result<Option<PoppedEntry>> {
        let input = PopLogEntryRequest {
            device: device.to_string(),
        }
        .encode()?;

        let (status, output) = self
            .call(RequestCode::PopLogEntry.as_u32(), &input, ENTRY_RECORD_SIZE)
            .await?;
        decode_pop_response(status, &output, device)
    }

    /// Monitor `device` with `mask` and hand every entry to `on_entry` until
    /// `shutdown` turns true (or its sender goes away).
    ///
    /// Fails with `NotFound` once the device is detached. Monitoring is reset
    /// to nothing before returning either way. Returns the number of entries.
    pub async fn poll_entries<F>(
        &mut self,
        device: &str,
        mask: MonitorMask,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_entry: F,
    ) -> Result<u64>
    where
        F: FnMut(PoppedEntry),
    {
        self.reset_monitoring(device, mask).await?;
        info!("Monitoring {} ({:?})", device, mask);

        let mut count = 0u64;
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            match self.pop_log_entry(device).await {
                Ok(Some(entry)) => {
                    count += 1;
                    on_entry(entry);
                }
                Ok(None) => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break Ok(());
                            }
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.reset_monitoring(device, MonitorMask::NONE).await {
            debug!("Could not stop monitoring {}: {}", device, e);
        }

        info!("Stopped monitoring {} after {} entries", device, count);
        result.map(|_| count)
    }
}
