//! Frame stream wire format
//!
//! Each camera holds one TCP connection to its ingest worker and sends
//! timestamped frames with a fixed 12-byte header:
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬────────────────────┐
//! │ Timestamp (8 bytes)  │ Length (4 bytes) │ Payload (variable) │
//! │ Little-endian u64 ns │ Little-endian    │ Encoded frame      │
//! └──────────────────────┴──────────────────┴────────────────────┘
//! ```
//!
//! ## Framing
//!
//! - **Timestamp**: capture time in nanoseconds on the shared grid, same
//!   epoch and byte order as the broadcast start anchor
//! - **Length**: payload size in bytes
//! - **Maximum payload**: 8 MiB; larger lengths are a protocol violation
//! - **Byte order**: little-endian throughout, matching the anchor
//!   encoding the camera firmware already implements
//!
//! Reads are timeout-aware so a worker blocked on an idle stream can
//! observe shutdown: an idle timeout surfaces as `Ok(None)`, a closed
//! connection as [`Error::Disconnected`].

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};

/// Bytes preceding each payload: u64 timestamp + u32 length
pub const FRAME_HEADER_BYTES: usize = 12;

/// Sanity bound on a single encoded payload
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Consecutive read timeouts tolerated mid-frame before giving up
///
/// A timeout before the first header byte just means the camera is
/// idle; a stall in the middle of a frame means the stream is dying.
const MAX_MID_FRAME_STALLS: u32 = 25;

/// Write one frame to the wire
///
/// Used by the camera side of the protocol; in this repo that is the
/// test harness standing in for camera firmware.
pub fn write_frame<W: Write>(writer: &mut W, timestamp_ns: u64, payload: &[u8]) -> Result<()> {
    let mut header = [0u8; FRAME_HEADER_BYTES];
    header[..8].copy_from_slice(&timestamp_ns.to_le_bytes());
    header[8..].copy_from_slice(&(payload.len() as u32).to_le_bytes());

    writer.write_all(&header)?;
    writer.write_all(payload)?;
    Ok(())
}

/// Incremental frame reader with a reusable payload buffer
///
/// One instance per connection; the payload buffer grows to the frame
/// size on the first frame and is reused for every frame after, so the
/// receive path does not allocate in steady state.
pub struct FrameReader {
    payload: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Read the next frame, if one is available
    ///
    /// Returns `Ok(None)` when the read timed out with the stream idle
    /// (no header byte yet), `Err(Error::Disconnected)` when the peer
    /// closed the connection, and the borrowed `(timestamp, payload)`
    /// pair otherwise. The payload borrow is valid until the next call.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<(u64, &[u8])>> {
        let mut header = [0u8; FRAME_HEADER_BYTES];
        let mut filled = 0;
        let mut stalls = 0;

        while filled < FRAME_HEADER_BYTES {
            match reader.read(&mut header[filled..]) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => {
                    filled += n;
                    stalls = 0;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    if filled == 0 {
                        return Ok(None);
                    }
                    stalls += 1;
                    if stalls >= MAX_MID_FRAME_STALLS {
                        return Err(Error::Network(
                            "Frame header stalled mid-transfer".to_string(),
                        ));
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let timestamp = u64::from_le_bytes(header[..8].try_into().unwrap());
        let len = u32::from_le_bytes(header[8..].try_into().unwrap()) as usize;

        if len > MAX_PAYLOAD_BYTES {
            return Err(Error::Protocol(format!(
                "Frame payload too large: {} bytes",
                len
            )));
        }

        self.payload.clear();
        self.payload.resize(len, 0);
        read_body(reader, &mut self.payload)?;

        Ok(Some((timestamp, &self.payload)))
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a full payload, riding out bounded mid-frame stalls
fn read_body<R: Read>(reader: &mut R, mut buf: &mut [u8]) -> Result<()> {
    let mut stalls = 0;
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => {
                buf = &mut buf[n..];
                stalls = 0;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => {
                stalls += 1;
                if stalls >= MAX_MID_FRAME_STALLS {
                    return Err(Error::Network(
                        "Frame payload stalled mid-transfer".to_string(),
                    ));
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

// Read timeouts surface as WouldBlock on Unix and TimedOut on Windows.
fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 1_000_000_123, &[7u8; 32]).unwrap();
        write_frame(&mut wire, 1_000_033_456, &[9u8; 32]).unwrap();

        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(wire);

        let (ts, payload) = reader.read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(ts, 1_000_000_123);
        assert_eq!(payload, &[7u8; 32]);

        let (ts, payload) = reader.read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(ts, 1_000_033_456);
        assert_eq!(payload, &[9u8; 32]);
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x0102_0304_0506_0708, &[0xAA]).unwrap();
        assert_eq!(
            &wire[..8],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(&wire[8..12], &[1, 0, 0, 0]);
        assert_eq!(wire[12], 0xAA);
    }

    #[test]
    fn empty_payload_is_valid() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 55, &[]).unwrap();
        let mut reader = FrameReader::new();
        let (ts, payload) = reader
            .read_frame(&mut Cursor::new(wire))
            .unwrap()
            .unwrap();
        assert_eq!(ts, 55);
        assert!(payload.is_empty());
    }

    #[test]
    fn eof_is_disconnected() {
        let mut reader = FrameReader::new();
        let err = reader.read_frame(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[test]
    fn oversize_length_is_protocol_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&123u64.to_le_bytes());
        wire.extend_from_slice(&(MAX_PAYLOAD_BYTES as u32 + 1).to_le_bytes());

        let mut reader = FrameReader::new();
        let err = reader.read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn truncated_body_is_disconnected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 77, &[1u8; 64]).unwrap();
        wire.truncate(FRAME_HEADER_BYTES + 10);

        let mut reader = FrameReader::new();
        let err = reader.read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }
}
