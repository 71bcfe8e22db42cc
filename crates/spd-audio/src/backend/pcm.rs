//! Blocking direct-PCM backend, generic over the device.
//!
//! [`BlockingPcmBackend`] implements the streaming contract on top of any
//! [`PcmDevice`]: a handle that accepts non-blocking interleaved writes and
//! reports an ALSA-like state. The device mutex is taken only around each
//! non-blocking call (state check, configure, write, drop), so
//! [`AudioBackend::stop`] can always get in between two writes; every wait
//! happens outside the lock on the session's [`StopSignal`].
//!
//! Writes are period aligned. Partial periods left over from an overlapped
//! feed are carried into the next one, and padded with silence at
//! `feed_sync` or `end`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
use crate::error::AudioError;
use crate::params::AudioParams;
use crate::stop::StopSignal;
use crate::track::{pad_to_period, AudioTrack, ByteOrder, TrackFormat};

/// Longest single poll sleep while the device is full or draining.
const MAX_POLL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for a previous drain before reconfiguring.
const DRAIN_WAIT_LIMIT: Duration = Duration::from_secs(2);

const DRAIN_POLL: Duration = Duration::from_millis(1);

// ── Device abstraction ─────────────────────────────────────────────

/// Device state as seen by the write loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    /// Opened but not configured.
    Open,
    /// Configured, not yet prepared (also the state after a drop).
    Setup,
    Prepared,
    Running,
    Draining,
    /// Buffer ran dry; needs `prepare` before the next write.
    Xrun,
    /// The device went away. Fatal.
    Disconnected,
}

/// Result of one non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// This many whole frames were accepted.
    Written(usize),
    /// The device buffer is full.
    WouldBlock,
    /// The device underran; nothing was written.
    Underrun,
}

/// Result of one non-blocking drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    Done,
    Pending,
}

/// Non-blocking interleaved PCM device.
pub trait PcmDevice: Send {
    /// Configure for `format`, returning the transfer period in frames.
    fn configure(&mut self, format: &TrackFormat, order: ByteOrder) -> Result<usize, AudioError>;

    fn state(&self) -> PcmState;

    /// Make the device ready to accept writes (recovers from xrun).
    fn prepare(&mut self) -> Result<(), AudioError>;

    /// Write as many whole frames of `bytes` as fit without blocking.
    fn write_frames(&mut self, bytes: &[u8]) -> Result<WriteStatus, AudioError>;

    /// Frames written but not yet played.
    fn queued_frames(&self) -> usize;

    /// Discard queued frames immediately.
    fn drop_pending(&mut self) -> Result<(), AudioError>;

    /// Let queued frames play out. Called repeatedly until `Done`.
    fn drain(&mut self) -> Result<DrainStatus, AudioError>;

    fn close(&mut self) -> Result<(), AudioError>;

    /// Command that writes to the same device, for external players.
    fn play_command(&self) -> Option<String> {
        None
    }
}

// ── Playback clock ─────────────────────────────────────────────────

/// Estimates device occupancy for sinks that do not report it (pipes).
#[derive(Debug, Clone, Default)]
pub(crate) struct PlaybackClock {
    rate: u32,
    started: Option<Instant>,
    written: u64,
}

impl PlaybackClock {
    pub(crate) const fn new(rate: u32) -> Self {
        Self {
            rate,
            started: None,
            written: 0,
        }
    }

    pub(crate) fn record(&mut self, frames: usize) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.written += frames as u64;
    }

    pub(crate) fn queued(&self) -> usize {
        let Some(started) = self.started else {
            return 0;
        };
        let played = (started.elapsed().as_secs_f64() * f64::from(self.rate)) as u64;
        self.written.saturating_sub(played) as usize
    }

    pub(crate) fn reset(&mut self) {
        self.started = None;
        self.written = 0;
    }
}

// ── Backend ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Stream {
    format: Option<TrackFormat>,
    period_bytes: usize,
    /// Bytes of an incomplete period carried to the next feed.
    remainder: Vec<u8>,
    frames_written: usize,
}

/// Streaming backend over a [`PcmDevice`].
pub struct BlockingPcmBackend<D: PcmDevice> {
    name: String,
    device: Mutex<Option<D>>,
    stream: Mutex<Stream>,
    stop: StopSignal,
    byte_order: ByteOrder,
    target: Duration,
    min_audio_length: Duration,
}

impl<D: PcmDevice> BlockingPcmBackend<D> {
    pub fn new(name: impl Into<String>, device: D, params: &AudioParams) -> Self {
        Self {
            name: name.into(),
            device: Mutex::new(Some(device)),
            stream: Mutex::new(Stream::default()),
            stop: StopSignal::new(),
            byte_order: params.byte_order,
            target: Duration::from_millis(u64::from(params.buffering.target_length_ms)),
            min_audio_length: Duration::from_millis(u64::from(params.min_audio_length_ms)),
        }
    }

    fn device(&self) -> MutexGuard<'_, Option<D>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream(&self) -> MutexGuard<'_, Stream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the open device under the PCM lock.
    fn with_device<T>(&self, f: impl FnOnce(&mut D) -> Result<T, AudioError>) -> Result<T, AudioError> {
        let mut guard = self.device();
        let device = guard.as_mut().ok_or(AudioError::NotOpen)?;
        f(device)
    }

    fn poll_interval(format: &TrackFormat, period_bytes: usize) -> Duration {
        let period_frames = period_bytes / format.frame_bytes().max(1);
        (format.duration_of(period_frames) / 2).clamp(Duration::from_millis(1), MAX_POLL)
    }

    /// Write `bytes` (whole frames), sleeping outside the lock while full.
    fn write_loop(&self, bytes: &[u8], format: &TrackFormat, poll: Duration) -> Result<FeedOutcome, AudioError> {
        let frame_bytes = format.frame_bytes();
        let mut offset = 0;

        while offset < bytes.len() {
            if self.stop.is_raised() {
                return Ok(FeedOutcome::Stopped);
            }

            let status = self.with_device(|dev| match dev.state() {
                PcmState::Running | PcmState::Prepared => dev.write_frames(&bytes[offset..]).map(Some),
                PcmState::Xrun => Ok(Some(WriteStatus::Underrun)),
                PcmState::Disconnected => Err(AudioError::Device("device disconnected".into())),
                // dropped by a concurrent stop
                _ => Ok(None),
            })?;

            match status {
                None => return Ok(FeedOutcome::Stopped),
                Some(WriteStatus::Written(frames)) => offset += frames * frame_bytes,
                Some(WriteStatus::WouldBlock) => {
                    if self.stop.wait_timeout(poll) {
                        return Ok(FeedOutcome::Stopped);
                    }
                }
                Some(WriteStatus::Underrun) => {
                    tracing::warn!(backend = %self.name, "Underrun, preparing device");
                    self.with_device(PcmDevice::prepare)
                        .map_err(|e| AudioError::Device(format!("xrun recovery failed: {e}")))?;
                }
            }
        }
        Ok(FeedOutcome::Completed)
    }

    /// Wait until at most `frames` remain queued.
    fn wait_queued_at_most(&self, frames: usize, poll: Duration) -> Result<FeedOutcome, AudioError> {
        loop {
            let queued = self.with_device(|dev| Ok(dev.queued_frames()))?;
            if queued <= frames {
                return Ok(FeedOutcome::Completed);
            }
            if self.stop.wait_timeout(poll) {
                return Ok(FeedOutcome::Stopped);
            }
        }
    }

    /// Take the stream format and the bytes to write for `track`, keeping
    /// any trailing partial period when `carry` is set.
    fn prepare_feed(&self, track: &AudioTrack<'_>, carry: bool) -> Result<(TrackFormat, Vec<u8>, Duration), AudioError> {
        track.validate()?;
        let mut stream = self.stream();
        let format = match stream.format {
            Some(format) if format == track.format => format,
            Some(format) => {
                return Err(AudioError::StreamMismatch(format!(
                    "stream begun as {format:?}, fed {:?}",
                    track.format
                )));
            }
            None => return Err(AudioError::StreamMismatch("feed without begin".into())),
        };

        let mut bytes = std::mem::take(&mut stream.remainder);
        bytes.extend_from_slice(&track.to_bytes(self.byte_order));
        let period = stream.period_bytes;
        if carry {
            let whole = bytes.len() - bytes.len() % period;
            stream.remainder = bytes.split_off(whole);
        } else {
            pad_to_period(&mut bytes, period);
        }
        stream.frames_written += bytes.len() / format.frame_bytes();
        Ok((format, bytes, Self::poll_interval(&format, period)))
    }
}

impl<D: PcmDevice> AudioBackend for BlockingPcmBackend<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new(PlaybackMode::FeedOverlap)
    }

    fn play(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.begin(&track.format)?;
        let outcome = self.feed_sync(track);
        self.end()?;
        outcome
    }

    fn begin(&self, format: &TrackFormat) -> Result<(), AudioError> {
        format.validate()?;
        self.stop.reset();

        // A drain after a previous stream may still be under way.
        let deadline = Instant::now() + DRAIN_WAIT_LIMIT;
        while self.with_device(|dev| Ok(dev.state() == PcmState::Draining))? {
            if Instant::now() >= deadline {
                return Err(AudioError::Device("device stuck draining".into()));
            }
            if self.stop.wait_timeout(DRAIN_POLL) {
                // The stream exists but refuses audio until the next begin.
                tracing::debug!(backend = %self.name, "Stopped while waiting for drain");
                *self.stream() = Stream {
                    format: Some(*format),
                    period_bytes: format.frame_bytes(),
                    ..Stream::default()
                };
                return Ok(());
            }
        }

        let period_frames = self.with_device(|dev| {
            let period = dev.configure(format, self.byte_order)?;
            dev.prepare()?;
            Ok(period)
        })?;

        let mut stream = self.stream();
        *stream = Stream {
            format: Some(*format),
            period_bytes: period_frames.max(1) * format.frame_bytes(),
            remainder: Vec::new(),
            frames_written: 0,
        };
        tracing::debug!(backend = %self.name, ?format, period_frames, "Stream begun");
        Ok(())
    }

    fn feed_sync(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        let (format, bytes, poll) = self.prepare_feed(track, false)?;
        if self.write_loop(&bytes, &format, poll)?.is_stopped() {
            return Ok(FeedOutcome::Stopped);
        }
        self.wait_queued_at_most(0, poll)
    }

    fn feed_sync_overlap(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        let (format, bytes, poll) = self.prepare_feed(track, true)?;
        if self.write_loop(&bytes, &format, poll)?.is_stopped() {
            return Ok(FeedOutcome::Stopped);
        }
        self.wait_queued_at_most(format.frames_in(self.target), poll)
    }

    fn end(&self) -> Result<(), AudioError> {
        let (format, tail, poll) = {
            let mut stream = self.stream();
            let Some(format) = stream.format.take() else {
                return Ok(());
            };
            let mut tail = std::mem::take(&mut stream.remainder);
            let min_frames = format.frames_in(self.min_audio_length);
            let written = stream.frames_written + tail.len() / format.frame_bytes();
            if written < min_frames {
                tail.resize(tail.len() + (min_frames - written) * format.frame_bytes(), 0);
            }
            pad_to_period(&mut tail, stream.period_bytes);
            let poll = Self::poll_interval(&format, stream.period_bytes);
            (format, tail, poll)
        };

        if !tail.is_empty() && self.write_loop(&tail, &format, poll)?.is_stopped() {
            return Ok(());
        }

        loop {
            if self.stop.is_raised() {
                return self.with_device(PcmDevice::drop_pending);
            }
            match self.with_device(PcmDevice::drain)? {
                DrainStatus::Done => return Ok(()),
                DrainStatus::Pending => {
                    self.stop.wait_timeout(poll);
                }
            }
        }
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stop.raise();
        let mut guard = self.device();
        match guard.as_mut() {
            Some(dev) => dev.drop_pending(),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stop.raise();
        let device = self.device().take();
        match device {
            Some(mut dev) => {
                dev.close()?;
                tracing::info!(backend = %self.name, "Closed audio output");
                Ok(())
            }
            None => Err(AudioError::NotOpen),
        }
    }

    fn play_command(&self) -> Option<String> {
        self.device().as_ref().and_then(PcmDevice::play_command)
    }
}
