//! Error types for Triveni
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors (Abort Startup)
//!
//! - **`Config`**: The camera configuration file is missing or invalid.
//!   Fix the configuration and restart.
//!
//! - **`Resource`**: Buffer allocation, thread spawn, or CPU pinning
//!   failed. The host is misconfigured or out of resources; restart
//!   after fixing the environment.
//!
//! ## Per-Camera Errors (Worker-Fatal)
//!
//! - **`Network`**: Persistent stream failure after retries, or a camera
//!   closing its stream mid-run. The worker publishes a failure sentinel
//!   and exits; the synchronizer observes it and winds the run down.
//!
//! - **`Protocol`**: The camera violated the stream contract (timestamp
//!   regression, wrong frame size). Not retryable; treated like a
//!   persistent network failure.
//!
//! ## Per-Frame Errors (Log and Continue)
//!
//! - **`Decode`**: One frame failed to decode. The worker logs it, keeps
//!   the destination buffer for the next frame, and continues.
//!
//! ## Transport States
//!
//! - **`Io`**: Generic I/O error. Usually retryable after a brief delay.
//! - **`Disconnected`**: The peer closed the connection. Clean when it
//!   follows a STOP broadcast, worker-fatal otherwise.

use thiserror::Error;

/// Errors that can occur in Triveni
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;
