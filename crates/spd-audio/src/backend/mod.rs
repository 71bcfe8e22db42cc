//! Audio backend trait: the device contract every sound system implements.
//!
//! Backends are driven by one thread at a time for `begin`/feed/`play`/`end`,
//! while [`AudioBackend::stop`] may arrive from any other thread at any time.
//! All methods take `&self`; each backend serializes access to its device
//! state internally and never holds that lock across a blocking wait.
//!
//! ## Backends
//!
//! | Name(s)                              | Module          | Mode          | Feature |
//! |--------------------------------------|-----------------|---------------|---------|
//! | `null`, `fifo`                       | [`timed`]       | `FeedSync`    |         |
//! | `pipe`, `alsa`, `pulse`, `pipewire`  | [`pipe`]        | `FeedOverlap` | (unix)  |
//! | `cpal`                               | [`cpal_ring`]   | `FeedOverlap` | `cpal`  |
//! | `rodio`                              | [`rodio_play`]  | `Play`        | `rodio` |

#[cfg(feature = "cpal")]
pub mod cpal_ring;
pub mod pcm;
#[cfg(unix)]
pub mod pipe;
#[cfg(feature = "rodio")]
pub mod rodio_play;
pub mod timed;

use crate::error::AudioError;
use crate::params::AudioParams;
use crate::track::{AudioTrack, TrackFormat};

// ── Shared types ───────────────────────────────────────────────────

/// How much pipelining a backend supports, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaybackMode {
    /// Whole track in one blocking call.
    Play,
    /// `begin`, then chunks that each block until played, then `end`.
    FeedSync,
    /// Like `FeedSync`, but each chunk returns while the device still has
    /// enough buffered to cover preparation of the next one.
    FeedOverlap,
}

impl std::fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Play => "play",
            Self::FeedSync => "feed-sync",
            Self::FeedOverlap => "feed-overlap",
        })
    }
}

/// What a backend can do, queried instead of probing for missing methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub mode: PlaybackMode,
    /// `set_volume` adjusts gain on the device; otherwise callers scale
    /// samples in software.
    pub hardware_volume: bool,
}

impl Capabilities {
    pub const fn new(mode: PlaybackMode) -> Self {
        Self {
            mode,
            hardware_volume: false,
        }
    }

    pub const fn with_hardware_volume(mut self) -> Self {
        self.hardware_volume = true;
        self
    }

    /// Whether the backend accepts `begin`/feed/`end` streams.
    pub const fn streams(&self) -> bool {
        !matches!(self.mode, PlaybackMode::Play)
    }
}

/// Result of a feed or play call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The chunk was accepted (and, for sync calls, played).
    Completed,
    /// A concurrent `stop` cut the call short.
    Stopped,
}

impl FeedOutcome {
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Constructor stored in the registry.
pub type OpenFn = fn(&AudioParams) -> Result<Box<dyn AudioBackend>, AudioError>;

// ── Backend trait ──────────────────────────────────────────────────

/// One open device session.
///
/// Streaming backends reset their stop flag in [`begin`](Self::begin);
/// play-only backends reset it at the start of [`play`](Self::play). After
/// a stop, every further feed of the same stream returns
/// [`FeedOutcome::Stopped`] without touching the device.
pub trait AudioBackend: Send + Sync {
    /// Registry name this session was opened under.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Play a whole track, blocking until it finished or was stopped.
    fn play(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError>;

    /// Configure the stream for `format` before the first feed.
    fn begin(&self, format: &TrackFormat) -> Result<(), AudioError> {
        let _ = format;
        Ok(())
    }

    /// Feed one chunk and block until it has been played.
    fn feed_sync(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        let _ = track;
        Err(AudioError::Unsupported {
            backend: "backend",
            operation: "feed_sync",
        })
    }

    /// Feed one chunk and block only until the device is close to running dry.
    fn feed_sync_overlap(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.feed_sync(track)
    }

    /// Drain buffered audio and release per-stream state.
    fn end(&self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Abort any in-flight play or feed. Safe to call from any thread.
    fn stop(&self) -> Result<(), AudioError>;

    /// Release the device. Further calls fail with [`AudioError::NotOpen`].
    fn close(&self) -> Result<(), AudioError>;

    /// Set device gain in [-100, 100].
    fn set_volume(&self, volume: i32) -> Result<(), AudioError> {
        let _ = volume;
        Err(AudioError::Unsupported {
            backend: "backend",
            operation: "set_volume",
        })
    }

    /// Shell command external players can use to reach the same device.
    fn play_command(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_order_by_pipelining() {
        assert!(PlaybackMode::FeedOverlap > PlaybackMode::FeedSync);
        assert!(PlaybackMode::FeedSync > PlaybackMode::Play);
    }

    #[test]
    fn play_only_backends_do_not_stream() {
        assert!(!Capabilities::new(PlaybackMode::Play).streams());
        assert!(Capabilities::new(PlaybackMode::FeedSync).streams());
        assert!(
            Capabilities::new(PlaybackMode::Play)
                .with_hardware_volume()
                .hardware_volume
        );
    }
}
