//! Per-camera ingest worker
//!
//! One named thread per camera: accept the camera's stream connection,
//! then loop receive → decode → timestamp → publish until stopped. The
//! worker owns the producer half of its `filled` queue and the consumer
//! half of its `empty` queue; buffers enter the worker only by popping
//! `empty` and leave only by pushing `filled`.
//!
//! Backpressure is structural: when the synchronizer falls behind, the
//! `empty` queue drains and the worker spins (with yields) waiting for a
//! buffer instead of reading, so unread frames back up in the kernel
//! socket buffer and ultimately at the camera. The worker never drops a
//! received frame.
//!
//! A read timeout is installed on the stream so a worker blocked on an
//! idle camera still observes shutdown between reads.

use crate::config::CameraConfig;
use crate::decode::FrameDecoder;
use crate::error::{Error, Result};
use crate::pool::{FrameBuf, WorkerQueues, SENTINEL_TIMESTAMP};
use crate::{affinity, streaming::wire::FrameReader};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Stream read timeout; bounds shutdown latency for an idle worker
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval while waiting for the camera to connect
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Transient receive errors tolerated back-to-back before the worker
/// declares the stream dead
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Base delay for the receive retry backoff, doubled per attempt
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Attempts to grab an empty buffer for the failure sentinel before
/// giving up (the synchronizer may be holding the whole pool)
const SENTINEL_ACQUIRE_ATTEMPTS: u32 = 1_000;

pub struct IngestWorker {
    conf: CameraConfig,
    listener: TcpListener,
    queues: WorkerQueues,
    decoder: Box<dyn FrameDecoder>,
    shutdown: Arc<AtomicBool>,
    core: Option<usize>,
    /// Buffer acquired but not yet published (decode retry reuse)
    in_flight: Option<FrameBuf>,
}

impl IngestWorker {
    pub fn new(
        conf: CameraConfig,
        listener: TcpListener,
        queues: WorkerQueues,
        decoder: Box<dyn FrameDecoder>,
        shutdown: Arc<AtomicBool>,
        core: Option<usize>,
    ) -> Self {
        Self {
            conf,
            listener,
            queues,
            decoder,
            shutdown,
            core,
            in_flight: None,
        }
    }

    /// Spawn the worker on its own named thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("ingest-{}", self.conf.name);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|e| Error::Resource(format!("Failed to spawn {}: {}", name, e)))
    }

    fn run(mut self) {
        if let Some(core) = self.core {
            if let Err(e) = affinity::pin_current_thread(core) {
                log::warn!("Camera {}: {}", self.conf.name, e);
            }
        }

        match self.ingest_loop() {
            Ok(frames) => {
                log::info!("Camera {}: worker exiting, {} frames ingested", self.conf.name, frames)
            }
            Err(e) => {
                log::error!("Camera {}: worker failed: {}", self.conf.name, e);
                self.publish_sentinel();
            }
        }
    }

    fn ingest_loop(&mut self) -> Result<u64> {
        let mut stream = match self.accept()? {
            Some(stream) => stream,
            None => return Ok(0), // shutdown before the camera connected
        };
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut reader = FrameReader::new();
        let mut frames = 0u64;
        let mut last_timestamp = 0u64;
        let mut consecutive_errors = 0u32;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(frames);
            }

            match reader.read_frame(&mut stream) {
                Ok(None) => {} // idle timeout, poll shutdown again
                Ok(Some((timestamp, payload))) => {
                    consecutive_errors = 0;

                    if timestamp <= last_timestamp {
                        return Err(Error::Protocol(format!(
                            "Timestamp regression: {} after {}",
                            timestamp, last_timestamp
                        )));
                    }

                    let mut buf = match self.in_flight.take() {
                        Some(buf) => buf,
                        None => match acquire_empty(&mut self.queues, &self.shutdown) {
                            Some(buf) => buf,
                            None => return Ok(frames), // shutdown during backpressure
                        },
                    };

                    match self.decoder.decode(payload, buf.pixels_mut()) {
                        Ok(()) => {
                            last_timestamp = timestamp;
                            buf.timestamp = timestamp;
                            frames += 1;
                            self.publish(buf);
                        }
                        Err(e @ Error::Protocol(_)) => {
                            // Wrong-size frame: the stream contract is
                            // broken, not one corrupt frame.
                            self.in_flight = Some(buf);
                            return Err(e);
                        }
                        Err(e) => {
                            // Keep the buffer for the next frame; it never
                            // left the worker so pool conservation holds.
                            log::warn!(
                                "Camera {}: dropped undecodable frame at {}: {}",
                                self.conf.name,
                                timestamp,
                                e
                            );
                            self.in_flight = Some(buf);
                        }
                    }
                }
                Err(Error::Disconnected) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        log::debug!("Camera {}: stream closed after stop", self.conf.name);
                        return Ok(frames);
                    }
                    return Err(Error::Network(format!(
                        "Camera {} closed its stream mid-run",
                        self.conf.name
                    )));
                }
                Err(Error::Io(e)) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(Error::Network(format!(
                            "Camera {} receive failed after {} retries: {}",
                            self.conf.name, consecutive_errors, e
                        )));
                    }
                    let backoff = RETRY_BACKOFF_BASE * 2u32.pow(consecutive_errors - 1);
                    log::warn!(
                        "Camera {}: transient receive error ({}), retrying in {:?}",
                        self.conf.name,
                        e,
                        backoff
                    );
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e), // protocol violations are not retryable
            }
        }
    }

    /// Wait for the camera to connect, polling the shutdown flag
    fn accept(&self) -> Result<Option<TcpStream>> {
        self.listener.set_nonblocking(true)?;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(None);
            }

            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("Camera {} connected from {}", self.conf.name, addr);
                    stream.set_nonblocking(false)?;
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn publish(&mut self, buf: FrameBuf) {
        // Cannot fail while conservation holds: the worker owns at most
        // K buffers and the filled queue has room for all of them.
        if let Err(buf) = self.queues.filled.push(buf) {
            log::error!(
                "Camera {}: filled queue full, pool invariant violated",
                self.conf.name
            );
            self.in_flight = Some(buf);
        }
    }

    /// Publish a timestamp-0 buffer so the synchronizer observes the
    /// failure instead of waiting forever on this camera
    fn publish_sentinel(&mut self) {
        let mut buf = match self.in_flight.take() {
            Some(buf) => buf,
            None => {
                let mut attempts = 0;
                loop {
                    if let Some(buf) = self.queues.empty.pop() {
                        break buf;
                    }
                    attempts += 1;
                    if attempts >= SENTINEL_ACQUIRE_ATTEMPTS {
                        log::error!(
                            "Camera {}: no buffer available for failure sentinel",
                            self.conf.name
                        );
                        return;
                    }
                    thread::yield_now();
                }
            }
        };

        buf.timestamp = SENTINEL_TIMESTAMP;
        if self.queues.filled.push(buf).is_err() {
            log::error!(
                "Camera {}: could not publish failure sentinel",
                self.conf.name
            );
        }
    }
}

/// Dequeue an empty buffer, spinning with yields until one is recycled
/// or shutdown is requested
fn acquire_empty(queues: &mut WorkerQueues, shutdown: &AtomicBool) -> Option<FrameBuf> {
    loop {
        if let Some(buf) = queues.empty.pop() {
            return Some(buf);
        }
        if shutdown.load(Ordering::Relaxed) {
            return None;
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawYuvDecoder;
    use crate::pool;
    use crate::streaming::wire::write_frame;
    use std::io::Write;

    const FRAME_BYTES: usize = 64;

    struct Harness {
        worker: JoinHandle<()>,
        stream: TcpStream,
        sync_side: Vec<pool::SyncQueues>,
        shutdown: Arc<AtomicBool>,
    }

    fn start_worker(bufs: usize) -> Harness {
        start_worker_with(bufs, Box::new(RawYuvDecoder::new(FRAME_BYTES)))
    }

    fn start_worker_with(bufs: usize, decoder: Box<dyn FrameDecoder>) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (mut workers, sync_side) = pool::build(1, bufs, FRAME_BYTES);
        let shutdown = Arc::new(AtomicBool::new(false));

        let conf = CameraConfig {
            id: 0,
            name: "unittest".to_string(),
            address: "127.0.0.1".to_string(),
            command_port: 0,
            stream_port: port,
            codec: "raw".to_string(),
        };

        let worker = IngestWorker::new(
            conf,
            listener,
            workers.remove(0),
            decoder,
            Arc::clone(&shutdown),
            None,
        )
        .spawn()
        .unwrap();

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();

        Harness {
            worker,
            stream,
            sync_side,
            shutdown,
        }
    }

    fn pop_filled(queues: &mut pool::SyncQueues) -> FrameBuf {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(buf) = queues.filled.pop() {
                return buf;
            }
            assert!(std::time::Instant::now() < deadline, "no frame published");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn stop(h: Harness) {
        h.shutdown.store(true, Ordering::Relaxed);
        drop(h.stream);
        h.worker.join().unwrap();
    }

    #[test]
    fn publishes_decoded_frames_in_order() {
        let mut h = start_worker(4);

        for tick in 1..=3u64 {
            let payload = vec![tick as u8; FRAME_BYTES];
            write_frame(&mut h.stream, tick * 1_000, &payload).unwrap();
        }
        h.stream.flush().unwrap();

        for tick in 1..=3u64 {
            let buf = pop_filled(&mut h.sync_side[0]);
            assert_eq!(buf.timestamp, tick * 1_000);
            assert_eq!(buf.pixels()[0], tick as u8);
            h.sync_side[0].empty.push(buf).map_err(|_| ()).unwrap();
        }

        stop(h);
    }

    /// Fails like a real codec on a corrupt bitstream: recoverable,
    /// signalled by the first payload byte
    #[derive(Debug)]
    struct FlakyDecoder;

    impl FrameDecoder for FlakyDecoder {
        fn decode(&mut self, encoded: &[u8], out: &mut [u8]) -> crate::error::Result<()> {
            if encoded.first() == Some(&0xFF) {
                return Err(Error::Decode("corrupt bitstream".to_string()));
            }
            out.copy_from_slice(encoded);
            Ok(())
        }
    }

    #[test]
    fn undecodable_frame_is_skipped_not_fatal() {
        let mut h = start_worker_with(4, Box::new(FlakyDecoder));

        write_frame(&mut h.stream, 1_000, &[0xFF; FRAME_BYTES]).unwrap();
        write_frame(&mut h.stream, 2_000, &[2u8; FRAME_BYTES]).unwrap();
        h.stream.flush().unwrap();

        let buf = pop_filled(&mut h.sync_side[0]);
        assert_eq!(buf.timestamp, 2_000);
        h.sync_side[0].empty.push(buf).map_err(|_| ()).unwrap();

        stop(h);
    }

    #[test]
    fn wrong_frame_size_is_fatal() {
        let mut h = start_worker(4);

        // Half a frame violates the stream contract outright.
        write_frame(&mut h.stream, 1_000, &[1u8; FRAME_BYTES / 2]).unwrap();
        h.stream.flush().unwrap();

        let sentinel = pop_filled(&mut h.sync_side[0]);
        assert!(sentinel.is_sentinel());

        h.worker.join().unwrap();
    }

    #[test]
    fn timestamp_regression_publishes_sentinel() {
        let mut h = start_worker(4);

        write_frame(&mut h.stream, 2_000, &[1u8; FRAME_BYTES]).unwrap();
        write_frame(&mut h.stream, 1_000, &[2u8; FRAME_BYTES]).unwrap();
        h.stream.flush().unwrap();

        let good = pop_filled(&mut h.sync_side[0]);
        assert_eq!(good.timestamp, 2_000);

        let sentinel = pop_filled(&mut h.sync_side[0]);
        assert!(sentinel.is_sentinel());

        h.worker.join().unwrap();
    }

    #[test]
    fn peer_disconnect_mid_run_publishes_sentinel() {
        let mut h = start_worker(4);

        write_frame(&mut h.stream, 1_000, &[1u8; FRAME_BYTES]).unwrap();
        h.stream.flush().unwrap();
        let good = pop_filled(&mut h.sync_side[0]);
        assert_eq!(good.timestamp, 1_000);

        drop(h.stream);

        let sentinel = pop_filled(&mut h.sync_side[0]);
        assert!(sentinel.is_sentinel());

        h.worker.join().unwrap();
    }

    #[test]
    fn shutdown_while_waiting_for_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (mut workers, _sync) = pool::build(1, 2, FRAME_BYTES);
        let shutdown = Arc::new(AtomicBool::new(false));

        let conf = CameraConfig {
            id: 0,
            name: "noshow".to_string(),
            address: "127.0.0.1".to_string(),
            command_port: 0,
            stream_port: 0,
            codec: "raw".to_string(),
        };

        let handle = IngestWorker::new(
            conf,
            listener,
            workers.remove(0),
            Box::new(RawYuvDecoder::new(FRAME_BYTES)),
            Arc::clone(&shutdown),
            None,
        )
        .spawn()
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
