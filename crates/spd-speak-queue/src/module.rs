//! Module adapter: runs a synthesis engine against a [`SpeakQueue`].
//!
//! The engine only sees an [`Utterance`]: it pushes audio, marks and sound
//! icons, and stops as soon as a push returns an error.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SpeakQueueConfig;
use crate::controller::SpeakQueue;
use crate::entry::IndexMark;
use crate::error::SpeakQueueError;
use crate::events::{EventReporter, SpeechEvent};
use crate::sink::PlaybackSink;
use crate::state::SpeakState;

/// A speech synthesizer driven by [`SpeechModule`].
pub trait SynthesisEngine: Send + Sync + 'static {
    /// Synthesize `text` into `out` on the calling thread.
    ///
    /// Must return promptly once a push fails; propagating the error with
    /// `?` is enough.
    fn synthesize(&self, text: &str, out: &mut Utterance<'_>) -> Result<(), SpeakQueueError>;

    /// Abort a running `synthesize` from another thread.
    fn cancel(&self) {}
}

/// Producer handle for one utterance.
///
/// Playback is set up lazily on the first push, so an engine never calls
/// `before_play` itself.
pub struct Utterance<'a> {
    queue: &'a SpeakQueue,
    began: bool,
    ended: bool,
}

impl<'a> Utterance<'a> {
    const fn new(queue: &'a SpeakQueue) -> Self {
        Self {
            queue,
            began: false,
            ended: false,
        }
    }

    fn begin(&mut self) -> Result<(), SpeakQueueError> {
        if !self.began {
            self.queue.before_play()?;
            self.began = true;
        }
        Ok(())
    }

    pub fn add_audio(&mut self, samples: &[i16]) -> Result<(), SpeakQueueError> {
        self.begin()?;
        self.queue.add_audio(samples)
    }

    pub fn add_mark(&mut self, mark: impl Into<IndexMark>) -> Result<(), SpeakQueueError> {
        self.begin()?;
        self.queue.add_mark(mark)
    }

    pub fn add_sound_icon(&mut self, path: impl Into<PathBuf>) -> Result<(), SpeakQueueError> {
        self.begin()?;
        self.queue.add_sound_icon(path)
    }

    /// Close the utterance. Called by the adapter if the engine does not.
    pub fn add_end(&mut self) -> Result<(), SpeakQueueError> {
        if self.ended {
            return Ok(());
        }
        self.begin()?;
        self.queue.add_end()?;
        self.ended = true;
        Ok(())
    }

    pub fn stop_requested(&self) -> bool {
        self.queue.stop_requested()
    }

    /// Sample format the queue expects.
    pub fn config(&self) -> &SpeakQueueConfig {
        self.queue.config()
    }
}

/// A speech output module: one engine, one speak queue.
pub struct SpeechModule<E: SynthesisEngine> {
    engine: Arc<E>,
    queue: SpeakQueue,
}

impl<E: SynthesisEngine> SpeechModule<E> {
    /// Start the speak queue with the engine's `cancel` as its
    /// cancellation hook.
    pub fn new(
        engine: E,
        config: SpeakQueueConfig,
        sink: Arc<dyn PlaybackSink>,
        reporter: impl EventReporter + 'static,
    ) -> Result<Self, SpeakQueueError> {
        let engine = Arc::new(engine);
        let canceller = Arc::clone(&engine);
        let queue = SpeakQueue::start(config, sink, reporter, move || canceller.cancel())?;
        Ok(Self { engine, queue })
    }

    /// Synthesize `text` on the calling thread; playback continues in the
    /// background after this returns.
    ///
    /// Returns `Stopped` if the utterance was stopped or paused while
    /// synthesizing. Any other engine error is reported as an `Error`
    /// event and the utterance is stopped, so the queue returns to idle.
    pub fn speak(&self, text: &str) -> Result<(), SpeakQueueError> {
        self.queue.before_synth()?;
        tracing::debug!(chars = text.chars().count(), "Synthesizing");

        let mut utterance = Utterance::new(&self.queue);
        let result = self
            .engine
            .synthesize(text, &mut utterance)
            .and_then(|()| utterance.add_end());

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_stopped() => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Synthesis failed");
                self.queue.report(SpeechEvent::Error(e.to_string()));
                self.queue.stop();
                Err(e)
            }
        }
    }

    pub fn stop(&self) -> bool {
        self.queue.stop()
    }

    pub fn pause(&self) -> bool {
        self.queue.pause()
    }

    pub fn state(&self) -> SpeakState {
        self.queue.state()
    }

    pub fn queue(&self) -> &SpeakQueue {
        &self.queue
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Stop everything and shut the queue down.
    pub fn close(&self) {
        self.queue.stop();
        self.queue.terminate();
    }
}
