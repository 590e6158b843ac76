//! Camera command channel: start anchor and stop sentinel
//!
//! The host opens one short-lived TCP connection per camera per command.
//! The wire bytes are fixed by the camera firmware:
//!
//! - **Start anchor**: exactly 8 bytes, little-endian u64, wall-clock
//!   nanoseconds (`CLOCK_REALTIME` epoch) at which every camera captures
//!   its first frame on the shared grid. Sent as `now + 1s` so the
//!   broadcast completes before the grid starts.
//! - **Stop**: exactly the 4 ASCII bytes `STOP`, no terminator.
//!
//! Internally commands are a typed enum; the sentinel string only exists
//! at the encoding boundary.

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Lead time between broadcasting the anchor and the first grid tick
pub const START_ANCHOR_DELAY: Duration = Duration::from_secs(1);

const STOP_BYTES: &[u8; 4] = b"STOP";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Command sent to every camera over its command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    /// Begin capturing, first frame at `anchor_ns` on the shared grid
    Start { anchor_ns: u64 },
    /// Cease transmission
    Stop,
}

impl CameraCommand {
    /// Encode to the exact bytes the camera firmware expects
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CameraCommand::Start { anchor_ns } => anchor_ns.to_le_bytes().to_vec(),
            CameraCommand::Stop => STOP_BYTES.to_vec(),
        }
    }
}

/// Compute the start anchor: wall-clock nanoseconds now, plus the lead
/// time
pub fn start_anchor_ns() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (now + START_ANCHOR_DELAY).as_nanos() as u64
}

/// Send a command to every camera's command endpoint
///
/// Attempts all cameras even after a failure, then reports every
/// unreachable camera in one error. The caller treats that as fatal at
/// startup and as fire-and-forget at shutdown.
pub fn broadcast(cameras: &[CameraConfig], command: &CameraCommand) -> Result<()> {
    let bytes = command.encode();
    let mut failures = Vec::new();

    for cam in cameras {
        if let Err(e) = send_to_camera(cam, &bytes) {
            log::warn!("Failed to reach camera {}: {}", cam.name, e);
            failures.push(cam.name.clone());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Network(format!(
            "Command {:?} undeliverable to: {}",
            command,
            failures.join(", ")
        )))
    }
}

fn send_to_camera(cam: &CameraConfig, bytes: &[u8]) -> Result<()> {
    let addr = (cam.address.as_str(), cam.command_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            Error::Network(format!(
                "Camera {} address {} did not resolve",
                cam.name, cam.address
            ))
        })?;

    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.write_all(bytes)?;
    Ok(())
}
