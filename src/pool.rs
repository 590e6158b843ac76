//! Pre-allocated frame buffer pools
//!
//! Each camera gets K fixed-size frame buffers and a pair of SPSC
//! queues: `filled` carries decoded frames from the ingest worker to the
//! synchronizer, `empty` carries spent buffers back. All pixel storage
//! is allocated here, once; after that, frames move through the pipeline
//! by queue ownership transfer and nothing on the hot path allocates.
//!
//! Pool conservation invariant, per camera:
//!
//! ```text
//! |filled| + |empty| + in-flight(worker) + in-flight(synchronizer) = K
//! ```
//!
//! A buffer is owned by exactly one of those four places at any instant.

use crate::spsc::{self, Consumer, Producer};

/// Timestamp value reserved to mark a failed ingest worker
///
/// A worker that hits a fatal stream error publishes one buffer carrying
/// this timestamp so the synchronizer can observe the failure. Real
/// capture timestamps are anchored at least one second past the epoch,
/// so zero is never a valid grid tick.
pub const SENTINEL_TIMESTAMP: u64 = 0;

/// One decoded frame: capture timestamp plus owned pixel storage
///
/// The pixel region holds a planar YUV 4:2:0 frame of `W * H * 3/2`
/// bytes, sized once at pool construction. Moving a `FrameBuf` through a
/// queue moves the heap pointer, never the pixels.
pub struct FrameBuf {
    /// Capture timestamp in nanoseconds on the shared grid
    pub timestamp: u64,
    pixels: Box<[u8]>,
}

impl FrameBuf {
    fn new(frame_bytes: usize) -> Self {
        Self {
            timestamp: 0,
            pixels: vec![0u8; frame_bytes].into_boxed_slice(),
        }
    }

    /// Decoded pixel data
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel data, written by the decoder
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Whether this buffer marks a failed worker rather than a frame
    pub fn is_sentinel(&self) -> bool {
        self.timestamp == SENTINEL_TIMESTAMP
    }
}

/// Queue endpoints owned by a camera's ingest worker
pub struct WorkerQueues {
    /// Publish decoded frames to the synchronizer
    pub filled: Producer<FrameBuf>,
    /// Reclaim spent buffers
    pub empty: Consumer<FrameBuf>,
}

/// Queue endpoints owned by the synchronizer, one per camera
pub struct SyncQueues {
    /// Drain decoded frames from the camera's worker
    pub filled: Consumer<FrameBuf>,
    /// Return spent buffers to the camera's worker
    pub empty: Producer<FrameBuf>,
}

/// Build the per-camera pools and queue pairs
///
/// Allocates `cam_count * bufs_per_camera` frame buffers of
/// `frame_bytes` each and primes every camera's `empty` queue with its
/// full complement, so workers can start ingesting immediately.
pub fn build(
    cam_count: usize,
    bufs_per_camera: usize,
    frame_bytes: usize,
) -> (Vec<WorkerQueues>, Vec<SyncQueues>) {
    let mut worker_side = Vec::with_capacity(cam_count);
    let mut sync_side = Vec::with_capacity(cam_count);

    for _ in 0..cam_count {
        let (filled_tx, filled_rx) = spsc::channel(bufs_per_camera);
        let (mut empty_tx, empty_rx) = spsc::channel(bufs_per_camera);

        for _ in 0..bufs_per_camera {
            // Cannot fail: the queue capacity equals the buffer count.
            let _ = empty_tx.push(FrameBuf::new(frame_bytes));
        }

        worker_side.push(WorkerQueues {
            filled: filled_tx,
            empty: empty_rx,
        });
        sync_side.push(SyncQueues {
            filled: filled_rx,
            empty: empty_tx,
        });
    }

    (worker_side, sync_side)
}
