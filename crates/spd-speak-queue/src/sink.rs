//! Where the playback thread sends an utterance.

use std::path::Path;

use spd_audio::{AudioError, AudioOutput, AudioTrack, FeedOutcome};

/// Playback side of the speak queue.
///
/// `play_audio`, `play_sound_icon` and `finish` are only called from the
/// playback thread. `stop` is called from the stop-or-pause thread while
/// one of them may be blocked, and must make it return promptly.
pub trait PlaybackSink: Send + Sync {
    /// Play one chunk, returning once the next one can follow.
    fn play_audio(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError>;

    fn play_sound_icon(&self, path: &Path) -> Result<FeedOutcome, AudioError>;

    /// The utterance is over (completed or interrupted); drain and release
    /// the stream.
    fn finish(&self) -> Result<(), AudioError>;

    fn stop(&self) -> Result<(), AudioError>;
}

impl PlaybackSink for AudioOutput {
    fn play_audio(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.output(track)
    }

    fn play_sound_icon(&self, path: &Path) -> Result<FeedOutcome, AudioError> {
        // An icon gets a stream of its own
        self.end_stream()?;
        self.play_file(path)
    }

    fn finish(&self) -> Result<(), AudioError> {
        self.end_stream()
    }

    fn stop(&self) -> Result<(), AudioError> {
        AudioOutput::stop(self)
    }
}
