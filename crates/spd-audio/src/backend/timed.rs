//! Polling-timed backend: write bytes, then sleep for their playback time.
//!
//! The writer never blocks long (a null sink, a FIFO, a plain file), so the
//! device clock is simulated: after each chunk the feeding thread waits the
//! chunk's duration on the session's [`StopSignal`]. The first wait is cut
//! short by [`EARLY_RETURN`] so the device is fed ahead of time; the slack is
//! waited after the last chunk.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
use crate::error::AudioError;
use crate::params::AudioParams;
use crate::stop::StopSignal;
use crate::track::{AudioTrack, ByteOrder, TrackFormat};

/// Largest single write.
const MAX_CHUNK_BYTES: usize = 32 * 1024;

/// How much earlier than real time the first wait ends.
const EARLY_RETURN: Duration = Duration::from_millis(10);

type Writer = Box<dyn Write + Send>;

/// Backend that paces writes to an arbitrary byte sink.
pub struct TimedBackend {
    name: &'static str,
    writer: Mutex<Option<Writer>>,
    stream: Mutex<Option<TrackFormat>>,
    byte_order: ByteOrder,
    stop: StopSignal,
}

impl TimedBackend {
    pub fn new(name: &'static str, writer: Writer, byte_order: ByteOrder) -> Self {
        Self {
            name,
            writer: Mutex::new(Some(writer)),
            stream: Mutex::new(None),
            byte_order,
            stop: StopSignal::new(),
        }
    }

    /// Discard audio, keeping real-time pacing. Always opens.
    pub fn open_null(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        tracing::info!(backend = "null", "Opened null audio output");
        Ok(Box::new(Self::new("null", Box::new(io::sink()), params.byte_order)))
    }

    /// Write raw PCM to `params.device` (a FIFO or a file).
    ///
    /// Opening a FIFO blocks until a reader attaches.
    pub fn open_fifo(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        let path = params
            .device
            .as_deref()
            .ok_or_else(|| AudioError::unavailable("fifo", "no device path configured"))?;
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| AudioError::unavailable("fifo", format!("{path}: {e}")))?;
        tracing::info!(backend = "fifo", path, "Opened FIFO audio output");
        Ok(Box::new(Self::new("fifo", Box::new(file), params.byte_order)))
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), AudioError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = writer.as_mut().ok_or(AudioError::NotOpen)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Write in chunks, waiting each chunk's playback time.
    fn write_paced(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        track.validate()?;
        if self.stop.is_raised() {
            return Ok(FeedOutcome::Stopped);
        }
        let bytes = track.to_bytes(self.byte_order);
        let frame_bytes = track.format.frame_bytes();
        // whole frames per chunk
        let chunk_bytes = (MAX_CHUNK_BYTES / frame_bytes).max(1) * frame_bytes;
        let mut slack = Duration::ZERO;

        for chunk in bytes.chunks(chunk_bytes) {
            self.write_all(chunk)?;

            let mut wait = track.format.duration_of(chunk.len() / frame_bytes);
            if slack.is_zero() && wait > EARLY_RETURN {
                wait -= EARLY_RETURN;
                slack = EARLY_RETURN;
            }
            if self.stop.wait_timeout(wait) {
                tracing::debug!(backend = self.name, "Timed write interrupted by stop");
                return Ok(FeedOutcome::Stopped);
            }
        }

        if !slack.is_zero() && self.stop.wait_timeout(slack) {
            return Ok(FeedOutcome::Stopped);
        }
        Ok(FeedOutcome::Completed)
    }

    fn check_stream(&self, track: &AudioTrack<'_>) -> Result<(), AudioError> {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match *stream {
            Some(format) if format == track.format => Ok(()),
            Some(format) => Err(AudioError::StreamMismatch(format!(
                "stream begun as {format:?}, fed {:?}",
                track.format
            ))),
            None => Err(AudioError::StreamMismatch("feed without begin".into())),
        }
    }
}

impl AudioBackend for TimedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new(PlaybackMode::FeedSync)
    }

    fn play(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.stop.reset();
        self.write_paced(track)
    }

    fn begin(&self, format: &TrackFormat) -> Result<(), AudioError> {
        format.validate()?;
        self.stop.reset();
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(*format);
        tracing::debug!(backend = self.name, ?format, "Stream begun");
        Ok(())
    }

    fn feed_sync(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.check_stream(track)?;
        self.write_paced(track)
    }

    fn end(&self) -> Result<(), AudioError> {
        // Each feed already waited out its own audio; nothing is buffered.
        self.stream.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stop.raise();
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stop.raise();
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match writer {
            Some(mut w) => {
                w.flush()?;
                tracing::info!(backend = self.name, "Closed audio output");
                Ok(())
            }
            None => Err(AudioError::NotOpen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn tone(len: usize) -> Vec<i16> {
        (0..len).map(|i| (i % 100) as i16).collect()
    }

    #[test]
    fn feed_blocks_for_playback_time() {
        let backend = TimedBackend::new("null", Box::new(io::sink()), ByteOrder::Little);
        let samples = tone(1600); // 100 ms at 16 kHz
        let track = AudioTrack::s16(1, 16_000, &samples);

        backend.begin(&track.format).unwrap();
        let start = Instant::now();
        assert_eq!(backend.feed_sync(&track).unwrap(), FeedOutcome::Completed);
        assert!(start.elapsed() >= Duration::from_millis(90));
        backend.end().unwrap();
    }

    #[test]
    fn feed_without_begin_is_rejected() {
        let backend = TimedBackend::new("null", Box::new(io::sink()), ByteOrder::Little);
        let samples = tone(16);
        let track = AudioTrack::s16(1, 16_000, &samples);
        assert!(matches!(backend.feed_sync(&track), Err(AudioError::StreamMismatch(_))));
    }

    #[test]
    fn stop_interrupts_long_play() {
        let backend = Arc::new(TimedBackend::new("null", Box::new(io::sink()), ByteOrder::Little));
        let player = Arc::clone(&backend);

        let handle = thread::spawn(move || {
            let samples = tone(16_000 * 10); // 10 s
            player.play(&AudioTrack::s16(1, 16_000, &samples))
        });
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        backend.stop().unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), FeedOutcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn feeds_after_stop_return_stopped_until_next_begin() {
        let backend = TimedBackend::new("null", Box::new(io::sink()), ByteOrder::Little);
        let samples = tone(160);
        let track = AudioTrack::s16(1, 16_000, &samples);

        backend.begin(&track.format).unwrap();
        backend.stop().unwrap();
        assert_eq!(backend.feed_sync(&track).unwrap(), FeedOutcome::Stopped);

        backend.end().unwrap();
        backend.begin(&track.format).unwrap();
        assert_eq!(backend.feed_sync(&track).unwrap(), FeedOutcome::Completed);
    }

    #[test]
    fn fifo_writes_serialized_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let params = AudioParams::with_device(path.to_string_lossy());
        let backend = TimedBackend::open_fifo(&params).unwrap();

        let samples = [1i16, -2, 3, -4];
        backend.play(&AudioTrack::s16(1, 8_000, &samples)).unwrap();
        backend.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let expected = AudioTrack::s16(1, 8_000, &samples).to_bytes(ByteOrder::default());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn fifo_requires_device() {
        let err = TimedBackend::open_fifo(&AudioParams::default()).err().unwrap();
        assert!(matches!(err, AudioError::Unavailable { .. }));
    }

    #[test]
    fn close_twice_reports_not_open() {
        let backend = TimedBackend::new("null", Box::new(io::sink()), ByteOrder::Little);
        backend.close().unwrap();
        assert!(matches!(backend.close(), Err(AudioError::NotOpen)));
    }
}
