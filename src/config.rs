//! Configuration loading from the camera YAML file
//!
//! # Configuration File Format
//!
//! The configuration file is YAML-formatted with the following structure:
//!
//! ```yaml
//! stream:
//!   width: 1280
//!   height: 720
//!   fps: 30
//!
//! cameras:
//!   - id: 0
//!     name: rpicam01
//!     address: 192.168.1.101
//!     command_port: 12000
//!     stream_port: 12800
//!   - id: 1
//!     name: rpicam02
//!     address: 192.168.1.102
//!     command_port: 12000
//!     stream_port: 12801
//!
//! # Optional, defaults shown
//! runtime:
//!   frame_bufs_per_camera: 32
//!   target_framesets: 0        # 0 = run until SIGINT/SIGTERM
//!   pin_cores: false
//!   cores_per_complex: 8
//! ```
//!
//! All cameras capture on one shared grid, so the stream geometry is
//! global: every frame in a run is `width * height * 3/2` bytes of
//! planar YUV 4:2:0.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default camera configuration path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mocap-toolkit/cams.yaml";

/// Shared capture geometry for all cameras
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Frame width in pixels (must be even for 4:2:0 subsampling)
    pub width: u32,

    /// Frame height in pixels (must be even for 4:2:0 subsampling)
    pub height: u32,

    /// Capture rate in frames per second
    pub fps: u32,
}

impl StreamConfig {
    /// Size of one decoded planar YUV 4:2:0 frame in bytes
    pub fn frame_bytes(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 3 / 2
    }

    /// Nanoseconds between grid ticks
    pub fn frame_duration_ns(&self) -> u64 {
        1_000_000_000 / self.fps as u64
    }
}

/// Per-camera configuration
///
/// One record per remote camera. The host connects out to
/// `address:command_port` to deliver the start anchor and stop sentinel;
/// the camera connects in to the host's `stream_port` to deliver frames.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Stable camera id, unique within the run
    pub id: u32,

    /// Human-readable name (used for logging and thread names)
    pub name: String,

    /// Camera host address for the command channel
    pub address: String,

    /// Command channel port on the camera
    pub command_port: u16,

    /// Local listening port for this camera's frame stream
    pub stream_port: u16,

    /// Stream codec; `raw` streams planar YUV 4:2:0 directly
    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_codec() -> String {
    "raw".to_string()
}

/// Runtime tuning knobs, all optional
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Frame buffers pre-allocated per camera
    ///
    /// Bounds how far a camera can run ahead of the synchronizer before
    /// backpressure reaches it.
    #[serde(default = "default_frame_bufs")]
    pub frame_bufs_per_camera: usize,

    /// Stop after emitting this many aligned framesets; 0 runs until
    /// SIGINT/SIGTERM
    #[serde(default)]
    pub target_framesets: u64,

    /// Pin the synchronizer and worker threads to cores
    ///
    /// Keeps all threads on one cache complex: synchronizer on
    /// `cam_count % cores_per_complex`, worker i on
    /// `i % cores_per_complex`.
    #[serde(default)]
    pub pin_cores: bool,

    /// Core count of the preferred cache complex
    #[serde(default = "default_cores_per_complex")]
    pub cores_per_complex: usize,
}

fn default_frame_bufs() -> usize {
    32
}

fn default_cores_per_complex() -> usize {
    8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_bufs_per_camera: default_frame_bufs(),
            target_framesets: 0,
            pin_cores: false,
            cores_per_complex: default_cores_per_complex(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the parsed configuration
    ///
    /// Checks everything the pipeline assumes before any resource is
    /// allocated: at least one camera, unique ids and stream ports, even
    /// geometry, nonzero rates and buffer counts.
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(Error::Config("No cameras configured".to_string()));
        }

        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(Error::Config("Frame geometry must be nonzero".to_string()));
        }
        if self.stream.width % 2 != 0 || self.stream.height % 2 != 0 {
            return Err(Error::Config(format!(
                "Frame geometry must be even for YUV 4:2:0 (got {}x{})",
                self.stream.width, self.stream.height
            )));
        }
        if self.stream.fps == 0 {
            return Err(Error::Config("fps must be nonzero".to_string()));
        }

        if self.runtime.frame_bufs_per_camera < 2 {
            return Err(Error::Config(format!(
                "frame_bufs_per_camera must be at least 2 (got {})",
                self.runtime.frame_bufs_per_camera
            )));
        }
        if self.runtime.pin_cores && self.runtime.cores_per_complex == 0 {
            return Err(Error::Config(
                "cores_per_complex must be nonzero when pin_cores is set".to_string(),
            ));
        }

        for (i, cam) in self.cameras.iter().enumerate() {
            if cam.name.is_empty() {
                return Err(Error::Config(format!("Camera {} has an empty name", i)));
            }
            if cam.address.is_empty() {
                return Err(Error::Config(format!(
                    "Camera {} has an empty address",
                    cam.name
                )));
            }
            for other in &self.cameras[i + 1..] {
                if other.id == cam.id {
                    return Err(Error::Config(format!("Duplicate camera id {}", cam.id)));
                }
                if other.stream_port == cam.stream_port {
                    return Err(Error::Config(format!(
                        "Cameras {} and {} share stream port {}",
                        cam.name, other.name, cam.stream_port
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = "\
stream:
  width: 1280
  height: 720
  fps: 30
cameras:
  - id: 0
    name: rpicam01
    address: 192.168.1.101
    command_port: 12000
    stream_port: 12800
  - id: 1
    name: rpicam02
    address: 192.168.1.102
    command_port: 12000
    stream_port: 12801
";

    #[test]
    fn parses_valid_config() {
        let config: Config = serde_yaml::from_str(VALID).unwrap();
        config.validate().unwrap();

        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.stream.frame_bytes(), 1280 * 720 * 3 / 2);
        assert_eq!(config.cameras[0].codec, "raw");
        assert_eq!(config.runtime.frame_bufs_per_camera, 32);
        assert_eq!(config.runtime.target_framesets, 0);
        assert!(!config.runtime.pin_cores);
    }

    #[test]
    fn parses_runtime_overrides() {
        let yaml = format!(
            "{}runtime:\n  frame_bufs_per_camera: 8\n  target_framesets: 100\n",
            VALID
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.runtime.frame_bufs_per_camera, 8);
        assert_eq!(config.runtime.target_framesets, 100);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cameras[1].name, "rpicam02");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load("/nonexistent/cams.yaml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_cameras() {
        let yaml = "stream:\n  width: 1280\n  height: 720\n  fps: 30\ncameras: []\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_odd_geometry() {
        let yaml = VALID.replace("width: 1280", "width: 1279");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = VALID.replace("id: 1", "id: 0");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shared_stream_ports() {
        let yaml = VALID.replace("stream_port: 12801", "stream_port: 12800");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
