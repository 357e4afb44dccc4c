//! Error type shared by every camera backend and the backend selector.

use thiserror::Error;

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The capture device could not be acquired.
    #[error("failed to open camera: {0}")]
    Open(String),
    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid camera state: {0}")]
    State(String),
    /// No frame was produced within the allowed time.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The backend selector could not resolve or validate a backend.
    #[error("configuration error: {0}")]
    Config(String),
    /// Writing a captured frame to disk failed.
    #[error("failed to persist frame: {0}")]
    Persist(#[from] image::ImageError),
}

impl CameraError {
    pub(crate) fn not_open() -> Self {
        Self::State("camera is not open".to_owned())
    }

    pub(crate) fn not_streaming() -> Self {
        Self::State("camera is not streaming".to_owned())
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
