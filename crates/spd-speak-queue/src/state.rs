//! Utterance state machine values.

use std::fmt;

use serde::Serialize;

/// Where the current utterance is in its life.
///
/// `Idle → BeforeSynth → BeforePlay → Speaking → Idle`. Ordering follows the
/// lifecycle so "at least `BeforePlay`" is a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakState {
    /// No utterance in flight.
    #[default]
    Idle,
    /// Synthesis requested, nothing produced yet.
    BeforeSynth,
    /// Synthesis running, playback not started.
    BeforePlay,
    /// The playback thread is emitting audio and marks.
    Speaking,
}

impl fmt::Display for SpeakState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::BeforeSynth => "before-synth",
            Self::BeforePlay => "before-play",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// Pause sub-state, orthogonal to [`SpeakState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    #[default]
    Off,
    /// Pause at the next boundary mark.
    Requested,
    /// A boundary mark was reached; the unwind reports `Pause`.
    MarkReported,
}
