//! Speak queue error types.

use std::io;

use spd_audio::AudioError;
use thiserror::Error;

use crate::state::SpeakState;

/// Errors returned by the speak queue and the module adapter.
///
/// `Busy` and `Stopped` are runtime conditions a module handles routinely.
/// `InvalidTransition` means the caller broke the call order and points at
/// a bug in the module, not in the device.
#[derive(Debug, Error)]
pub enum SpeakQueueError {
    /// Another utterance is in flight or still unwinding.
    #[error("Speak queue is busy ({state})")]
    Busy { state: SpeakState },

    /// The utterance was stopped; the producer must stop synthesizing.
    #[error("Utterance was stopped")]
    Stopped,

    /// The queue has been terminated.
    #[error("Speak queue is closed")]
    Closed,

    /// Operation called from a state it is not valid in.
    #[error("{operation} is not valid while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SpeakState,
    },

    /// A worker thread could not be started.
    #[error("Failed to spawn speak queue thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The synthesis engine failed.
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl SpeakQueueError {
    /// `true` for the condition a producer treats as "stop now".
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped | Self::Closed)
    }
}
