//! Cross-camera frame synchronizer
//!
//! Runs on the bootstrap thread and assembles aligned framesets: one
//! frame per camera, all carrying the same capture timestamp. The
//! algorithm relies on every camera publishing non-decreasing timestamps
//! on one shared grid:
//!
//! 1. Fill every empty slot from that camera's `filled` queue.
//! 2. Find the newest timestamp across the slots.
//! 3. Recycle every older frame — it belongs to a grid tick some other
//!    camera has already moved past, so that slot refetches.
//! 4. When all N timestamps are equal, hand the set to the consumer
//!    callback and release every buffer.
//!
//! Repeated discarding below the maximum converges because the laggard
//! queues only ever produce newer frames.

use crate::pool::{FrameBuf, SyncQueues};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Sleep while any filled queue is empty, to avoid a hard busy-wait
const EMPTY_QUEUE_WAIT: Duration = Duration::from_micros(10);

/// Cadence of the runtime statistics log line
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Counters reported when the synchronizer stops
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Aligned framesets emitted
    pub framesets: u64,
    /// Frames recycled for arriving behind the grid
    pub recycled: u64,
    /// Ids of cameras whose workers published a failure sentinel
    pub failed_cameras: Vec<u32>,
}

pub struct FrameSynchronizer {
    queues: Vec<SyncQueues>,
    camera_ids: Vec<u32>,
    current: Vec<Option<FrameBuf>>,
    shutdown: Arc<AtomicBool>,
    /// Stop after this many framesets; 0 means run until shutdown
    target: u64,
}

impl FrameSynchronizer {
    pub fn new(
        queues: Vec<SyncQueues>,
        camera_ids: Vec<u32>,
        shutdown: Arc<AtomicBool>,
        target: u64,
    ) -> Self {
        debug_assert_eq!(queues.len(), camera_ids.len());
        let cam_count = queues.len();
        Self {
            queues,
            camera_ids,
            current: (0..cam_count).map(|_| None).collect(),
            shutdown,
            target,
        }
    }

    /// Run until the target frameset count is reached or shutdown is
    /// requested
    ///
    /// `on_set` borrows each aligned set for the duration of the call;
    /// the buffers are recycled as soon as it returns.
    pub fn run<F>(mut self, mut on_set: F) -> SyncStats
    where
        F: FnMut(u64, &[FrameBuf]),
    {
        let cam_count = self.queues.len();
        let mut stats = SyncStats::default();
        let mut scratch: Vec<FrameBuf> = Vec::with_capacity(cam_count);
        let mut last_emitted = 0u64;
        let mut last_stats = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed)
            && (self.target == 0 || stats.framesets < self.target)
        {
            if last_stats.elapsed() >= STATS_INTERVAL {
                log::info!(
                    "Synchronizer: {} framesets emitted, {} frames recycled",
                    stats.framesets,
                    stats.recycled
                );
                last_stats = Instant::now();
            }

            // Fill every empty slot.
            let mut full_set = true;
            for i in 0..cam_count {
                if self.current[i].is_some() {
                    continue;
                }
                match self.queues[i].filled.pop() {
                    Some(buf) if buf.is_sentinel() => {
                        log::error!(
                            "Camera {} failed; winding the run down",
                            self.camera_ids[i]
                        );
                        stats.failed_cameras.push(self.camera_ids[i]);
                        self.release(i, buf);
                        self.shutdown.store(true, Ordering::Relaxed);
                        full_set = false;
                    }
                    Some(buf) => self.current[i] = Some(buf),
                    None => full_set = false,
                }
            }

            if !full_set {
                thread::sleep(EMPTY_QUEUE_WAIT);
                continue;
            }

            // All slots hold a frame; align on the newest timestamp.
            let t_max = self
                .current
                .iter()
                .map(|slot| slot.as_ref().map(|b| b.timestamp).unwrap_or(0))
                .max()
                .unwrap_or(0);

            let mut all_equal = true;
            for i in 0..cam_count {
                let behind = self.current[i]
                    .as_ref()
                    .is_some_and(|buf| buf.timestamp < t_max);
                if behind {
                    let buf = self.current[i].take().unwrap();
                    log::debug!(
                        "Camera {}: recycling frame at {} behind grid tick {}",
                        self.camera_ids[i],
                        buf.timestamp,
                        t_max
                    );
                    self.release(i, buf);
                    stats.recycled += 1;
                    all_equal = false;
                }
            }

            if !all_equal {
                continue;
            }

            if t_max <= last_emitted {
                // Cannot happen while workers enforce per-camera
                // monotonicity; do not emit out of order.
                log::warn!(
                    "Frameset at {} not after previous {}, discarding",
                    t_max,
                    last_emitted
                );
                for i in 0..cam_count {
                    let buf = self.current[i].take().unwrap();
                    self.release(i, buf);
                    stats.recycled += 1;
                }
                continue;
            }

            for slot in &mut self.current {
                scratch.push(slot.take().unwrap());
            }

            on_set(t_max, &scratch);

            for (i, buf) in scratch.drain(..).enumerate() {
                self.release(i, buf);
            }

            last_emitted = t_max;
            stats.framesets += 1;
            log::debug!("Emitted frameset {} at {}", stats.framesets, t_max);
        }

        // Hand every held buffer back before the pool winds down.
        for i in 0..cam_count {
            if let Some(buf) = self.current[i].take() {
                self.release(i, buf);
            }
        }

        stats
    }

    fn release(&mut self, cam: usize, buf: FrameBuf) {
        // Cannot fail while conservation holds: the empty queue has room
        // for the camera's entire pool.
        if self.queues[cam].empty.push(buf).is_err() {
            log::error!(
                "Camera {}: empty queue full, pool invariant violated",
                self.camera_ids[cam]
            );
        }
    }
}
