//! Audio output error types.

use std::path::PathBuf;

/// Errors that can occur while opening or driving an audio backend.
///
/// A stop request is *not* an error: feed and play calls interrupted by
/// [`AudioBackend::stop`](crate::backend::AudioBackend::stop) return
/// `Ok(FeedOutcome::Stopped)`.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// The backend could not be opened (bad device name, connection refused,
    /// missing parameter). The caller may try another backend.
    #[error("Audio backend '{backend}' unavailable: {reason}")]
    Unavailable {
        backend: String,
        reason: String,
    },

    /// No backend with this name is registered.
    #[error("Unknown audio backend '{0}'")]
    UnknownBackend(String),

    /// The track format cannot be played by this backend.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The backend does not implement the requested operation.
    #[error("Audio backend '{backend}' does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// A feed call was made without a preceding `begin`, or with a format
    /// different from the one passed to `begin`.
    #[error("Stream not configured for this track: {0}")]
    StreamMismatch(String),

    /// Unrecoverable device failure (disconnected, player exited, reset
    /// failed). The session should be closed and reopened.
    #[error("Audio device failure: {0}")]
    Device(String),

    /// The session was already closed.
    #[error("Audio session is closed")]
    NotOpen,

    /// The thread owning the platform stream died.
    #[error("Audio thread died unexpectedly")]
    ThreadDied,

    /// A sound file could not be decoded.
    #[error("Failed to decode sound file {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// IO error (device nodes, FIFOs, player pipes).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Whether this error means the session is unusable and must be
    /// closed and reopened before the next utterance.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_) | Self::NotOpen | Self::ThreadDied | Self::Io(_))
    }

    pub(crate) fn unavailable(backend: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }
}
