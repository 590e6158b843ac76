//! Network protocol: frame stream codec and camera command channel

pub mod command;
pub mod wire;

pub use command::{broadcast, start_anchor_ns, CameraCommand};
pub use wire::{write_frame, FrameReader};
