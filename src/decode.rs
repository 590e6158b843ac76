//! Decoder seam between the network payload and the pixel buffer
//!
//! The actual video decoder (hardware or software) is an external
//! collaborator; this module only fixes the seam: encoded bytes in, one
//! planar YUV 4:2:0 frame of exactly `frame_bytes` out. Cameras
//! configured with the `raw` codec stream planar frames directly and go
//! through [`RawYuvDecoder`], which is also what the test harness uses.

use crate::error::{Error, Result};

/// Transforms one encoded network payload into one decoded frame
///
/// `out` is always exactly the configured frame size; implementations
/// must fill it completely or fail.
pub trait FrameDecoder: Send + std::fmt::Debug {
    fn decode(&mut self, encoded: &[u8], out: &mut [u8]) -> Result<()>;
}

/// Pass-through decoder for cameras streaming raw planar YUV 4:2:0
///
/// The payload must already be a complete frame; any other length is a
/// stream contract violation, not a decode failure.
#[derive(Debug)]
pub struct RawYuvDecoder {
    frame_bytes: usize,
}

impl RawYuvDecoder {
    pub fn new(frame_bytes: usize) -> Self {
        Self { frame_bytes }
    }
}

impl FrameDecoder for RawYuvDecoder {
    fn decode(&mut self, encoded: &[u8], out: &mut [u8]) -> Result<()> {
        if encoded.len() != self.frame_bytes {
            return Err(Error::Protocol(format!(
                "Frame size mismatch: got {} bytes, expected {}",
                encoded.len(),
                self.frame_bytes
            )));
        }
        out.copy_from_slice(encoded);
        Ok(())
    }
}

/// Construct the decoder for a configured codec name
pub fn for_codec(codec: &str, frame_bytes: usize) -> Result<Box<dyn FrameDecoder>> {
    match codec {
        "raw" => Ok(Box::new(RawYuvDecoder::new(frame_bytes))),
        other => Err(Error::Config(format!("Unknown codec: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_copies_exact_frame() {
        let mut decoder = RawYuvDecoder::new(6);
        let mut out = [0u8; 6];
        decoder.decode(&[1, 2, 3, 4, 5, 6], &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn raw_rejects_size_mismatch() {
        let mut decoder = RawYuvDecoder::new(6);
        let mut out = [0u8; 6];
        let err = decoder.decode(&[1, 2, 3], &mut out).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn unknown_codec_fails_at_construction() {
        assert!(matches!(
            for_codec("h264", 64).unwrap_err(),
            Error::Config(_)
        ));
        assert!(for_codec("raw", 64).is_ok());
    }
}
