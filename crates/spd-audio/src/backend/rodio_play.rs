//! One-shot playback via `rodio` sinks.
//!
//! Each `play` gets a fresh sink from the session's audio thread, appends
//! the whole track and sleeps until the sink drains. `stop` stops the
//! current sink, which makes the sleeping `play` return at once. Gain is
//! applied by the sink, so callers do not scale samples.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rodio::buffer::SamplesBuffer;
use rodio::Sink;

use super::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
use crate::audio_thread::{AudioThreadHandle, Output};
use crate::error::AudioError;
use crate::params::AudioParams;
use crate::stop::StopSignal;
use crate::track::{clamp_volume, volume_gain, AudioTrack, Samples};

/// Play-only backend on the default rodio output.
pub struct RodioBackend {
    thread: AudioThreadHandle,
    /// Sink of the play in progress, if any.
    sink: Mutex<Option<Arc<Sink>>>,
    stop: StopSignal,
    volume: AtomicI32,
    closed: AtomicBool,
}

impl RodioBackend {
    pub fn open(_params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        let thread = AudioThreadHandle::spawn(Output::Sink)?;
        tracing::info!(backend = "rodio", "Audio playback initialized on default output device");
        Ok(Box::new(Self {
            thread,
            sink: Mutex::new(None),
            stop: StopSignal::new(),
            volume: AtomicI32::new(100),
            closed: AtomicBool::new(false),
        }))
    }

    fn sink(&self) -> MutexGuard<'_, Option<Arc<Sink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Widen to the i16 samples rodio buffers carry.
fn to_i16(track: &AudioTrack<'_>) -> Vec<i16> {
    match track.samples {
        Samples::S16(s) => s.to_vec(),
        Samples::S8(s) => s.iter().map(|&v| i16::from(v) << 8).collect(),
    }
}

impl AudioBackend for RodioBackend {
    fn name(&self) -> &str {
        "rodio"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new(PlaybackMode::Play).with_hardware_volume()
    }

    fn play(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::NotOpen);
        }
        track.validate()?;
        self.stop.reset();
        if track.is_empty() {
            return Ok(FeedOutcome::Completed);
        }

        let sink = Arc::new(self.thread.new_sink()?);
        sink.set_volume(volume_gain(self.volume.load(Ordering::SeqCst)));
        sink.append(SamplesBuffer::new(
            track.format.channels,
            track.format.sample_rate,
            to_i16(track),
        ));
        *self.sink() = Some(Arc::clone(&sink));

        // A stop that landed before the sink was published.
        if self.stop.is_raised() {
            sink.stop();
        }

        tracing::debug!(samples = track.num_samples(), rate = track.format.sample_rate, "Playback started");
        sink.sleep_until_end();
        self.sink().take();

        if self.stop.is_raised() {
            Ok(FeedOutcome::Stopped)
        } else {
            tracing::debug!("Playback finished naturally");
            Ok(FeedOutcome::Completed)
        }
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stop.raise();
        if let Some(sink) = self.sink().as_ref() {
            sink.stop();
            tracing::debug!("Audio playback stopped");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AudioError::NotOpen);
        }
        self.stop()?;
        self.thread.shutdown();
        tracing::info!(backend = "rodio", "Closed audio output");
        Ok(())
    }

    fn set_volume(&self, volume: i32) -> Result<(), AudioError> {
        let volume = clamp_volume(volume);
        self.volume.store(volume, Ordering::SeqCst);
        if let Some(sink) = self.sink().as_ref() {
            sink.set_volume(volume_gain(volume));
        }
        Ok(())
    }
}
