//! Application orchestration for the Triveni daemon
//!
//! Owns the linear startup and shutdown sequence: bind per-camera
//! listeners, allocate the buffer pools, spawn the ingest workers,
//! broadcast the start anchor, run the synchronizer on this thread,
//! broadcast STOP, join the workers. Any startup failure after workers
//! exist still signals shutdown and joins them before the pool is torn
//! down.

use crate::config::Config;
use crate::decode::{self, FrameDecoder};
use crate::error::{Error, Result};
use crate::ingest::IngestWorker;
use crate::pool::{self, FrameBuf};
use crate::streaming::command::{self, CameraCommand};
use crate::sync::{FrameSynchronizer, SyncStats};
use crate::affinity;
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Main application structure that manages all components
pub struct App {
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared shutdown flag; setting it stops the run
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Install a SIGINT/SIGTERM listener that requests shutdown
    pub fn install_signal_handler(&self) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        let mut signals = Signals::new([SIGINT, SIGTERM])
            .map_err(|e| Error::Resource(format!("Failed to register signal handlers: {}", e)))?;

        thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!("Received signal {:?}, initiating shutdown...", sig);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })
            .map_err(|e| Error::Resource(format!("Failed to spawn signal handler: {}", e)))?;

        Ok(())
    }

    /// Run the full pipeline, delivering every aligned frameset to
    /// `on_set`
    ///
    /// Returns once the configured frameset target is reached, shutdown
    /// is requested, or a camera fails.
    pub fn run<F>(&mut self, on_set: F) -> Result<SyncStats>
    where
        F: FnMut(u64, &[FrameBuf]),
    {
        let cam_count = self.config.cameras.len();
        let frame_bytes = self.config.stream.frame_bytes();
        let bufs_per_camera = self.config.runtime.frame_bufs_per_camera;

        info!(
            "Starting pipeline: {} cameras, {}x{} @ {} fps, {} buffers per camera",
            cam_count,
            self.config.stream.width,
            self.config.stream.height,
            self.config.stream.fps,
            bufs_per_camera
        );

        // Keep the synchronizer off the worker cores until the complex
        // saturates.
        if self.config.runtime.pin_cores {
            affinity::pin_current_thread(cam_count % self.config.runtime.cores_per_complex)?;
        }

        // Everything that can fail cheaply happens before any thread
        // starts: decoders, listeners, pools.
        let mut decoders: Vec<Box<dyn FrameDecoder>> = Vec::with_capacity(cam_count);
        for cam in &self.config.cameras {
            decoders.push(decode::for_codec(&cam.codec, frame_bytes)?);
        }

        // Listeners are bound before the anchor broadcast so every
        // camera finds its port open the moment it starts streaming.
        let mut listeners = Vec::with_capacity(cam_count);
        for cam in &self.config.cameras {
            let listener = TcpListener::bind(("0.0.0.0", cam.stream_port)).map_err(|e| {
                Error::Network(format!(
                    "Failed to bind stream port {} for camera {}: {}",
                    cam.stream_port, cam.name, e
                ))
            })?;
            listeners.push(listener);
        }

        let (worker_queues, sync_queues) = pool::build(cam_count, bufs_per_camera, frame_bytes);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(cam_count);
        let worker_iter = self
            .config
            .cameras
            .iter()
            .zip(listeners)
            .zip(worker_queues)
            .zip(decoders)
            .enumerate();

        for (i, (((cam, listener), queues), decoder)) in worker_iter {
            let core = self
                .config
                .runtime
                .pin_cores
                .then(|| i % self.config.runtime.cores_per_complex);

            let worker = IngestWorker::new(
                cam.clone(),
                listener,
                queues,
                decoder,
                Arc::clone(&self.shutdown),
                core,
            );

            match worker.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to start worker for camera {}: {}", cam.name, e);
                    self.stop_workers(handles);
                    return Err(e);
                }
            }
        }

        let anchor_ns = command::start_anchor_ns();
        if let Err(e) = command::broadcast(
            &self.config.cameras,
            &CameraCommand::Start { anchor_ns },
        ) {
            error!("Start anchor broadcast failed: {}", e);
            self.stop_workers(handles);
            return Err(e);
        }
        info!(
            "Broadcast start anchor {} ns to {} cameras",
            anchor_ns, cam_count
        );

        let synchronizer = FrameSynchronizer::new(
            sync_queues,
            self.config.cameras.iter().map(|c| c.id).collect(),
            Arc::clone(&self.shutdown),
            self.config.runtime.target_framesets,
        );
        let stats = synchronizer.run(on_set);

        info!(
            "Synchronizer stopped: {} framesets, {} recycled",
            stats.framesets, stats.recycled
        );

        // Stop the camera devices; best-effort at this point.
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = command::broadcast(&self.config.cameras, &CameraCommand::Stop) {
            warn!("Stop broadcast failed: {}", e);
        }
        self.join_workers(handles);

        if !stats.failed_cameras.is_empty() {
            return Err(Error::Network(format!(
                "Cameras failed during the run: {:?}",
                stats.failed_cameras
            )));
        }
        Ok(stats)
    }

    /// Abort path: signal shutdown, attempt STOP, and join whatever
    /// workers already exist before resources are dropped
    fn stop_workers(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = command::broadcast(&self.config.cameras, &CameraCommand::Stop) {
            warn!("Stop broadcast failed: {}", e);
        }
        self.join_workers(handles);
    }

    fn join_workers(&self, handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            if handle.join().is_err() {
                error!("Ingest worker panicked");
            }
        }
        info!("All ingest workers joined");
    }
}
