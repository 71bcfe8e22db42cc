//! Callback ring-buffer backend on the platform audio host (cpal).
//!
//! Feeds push `f32` samples into a `ringbuf` ring; the cpal data callback
//! pulls from it and fills any shortfall with silence. Every callback
//! notifies the session's [`StopSignal`] so a feeder waiting for room (or
//! for the ring to drain) re-checks promptly.
//!
//! The stream itself is `!Send` and lives on the session's audio thread.
//! `stop` never touches it: it raises the stop signal and asks the callback
//! to flush the ring on its next run.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
use crate::audio_thread::{AudioThreadHandle, Output};
use crate::error::AudioError;
use crate::params::{AudioParams, BufferingParams};
use crate::stop::StopSignal;
use crate::track::{AudioTrack, TrackFormat};

/// Feeder poll slice while waiting on the callback.
const POLL: Duration = Duration::from_millis(10);

/// How long `begin` waits for a pending flush before rebuilding the ring.
const FLUSH_WAIT: Duration = Duration::from_millis(100);

/// The ring stops moving for this long: the stream is dead.
const STALL_LIMIT: Duration = Duration::from_secs(3);

// ── Callback side ──────────────────────────────────────────────────

/// Flags shared between the feeder and the data callback.
pub(crate) struct RingShared {
    /// Set by `stop`; the callback empties the ring and clears it.
    flush: AtomicBool,
    /// Output silence until `prebuffer_samples` are queued.
    prebuffering: AtomicBool,
    prebuffer_samples: AtomicUsize,
    /// Set by the stream error callback.
    failed: AtomicBool,
    wake: StopSignal,
}

impl RingShared {
    fn new(wake: StopSignal) -> Self {
        Self {
            flush: AtomicBool::new(false),
            prebuffering: AtomicBool::new(true),
            prebuffer_samples: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            wake,
        }
    }

    /// Body of the data callback.
    fn pull<T>(&self, consumer: &mut HeapCons<f32>, scratch: &mut Vec<f32>, data: &mut [T])
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        if self.flush.swap(false, Ordering::SeqCst) {
            consumer.clear();
        }
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }

        let holding = self.prebuffering.load(Ordering::SeqCst)
            && consumer.occupied_len() < self.prebuffer_samples.load(Ordering::SeqCst);
        let popped = if holding {
            0
        } else {
            self.prebuffering.store(false, Ordering::SeqCst);
            consumer.pop_slice(&mut scratch[..data.len()])
        };

        for (out, &sample) in data.iter_mut().zip(&scratch[..popped]) {
            *out = T::from_sample(sample);
        }
        data[popped..].fill(T::EQUILIBRIUM);

        self.wake.notify();
    }
}

/// Consumer half handed to the audio thread when a stream is built.
pub(crate) struct RingEnd {
    consumer: HeapCons<f32>,
    shared: Arc<RingShared>,
}

/// Output device by name, or the host default.
pub(crate) fn find_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::unavailable("cpal", "no default output device")),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::unavailable("cpal", e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| AudioError::unavailable("cpal", format!("no output device named '{name}'"))),
    }
}

fn build_typed<T>(device: &cpal::Device, config: &cpal::StreamConfig, ring: RingEnd) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let RingEnd { mut consumer, shared } = ring;
    let on_error = Arc::clone(&shared);
    let mut scratch = vec![0.0_f32; 4096];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                shared.pull(&mut consumer, &mut scratch, data);
            },
            move |err| {
                tracing::error!(error = %err, "Audio stream error");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    on_error.failed.store(true, Ordering::SeqCst);
                    on_error.wake.notify();
                }
            },
            None,
        )
        .map_err(|e| AudioError::Device(format!("failed to build output stream: {e}")))
}

/// Build and start a stream for `format`. Runs on the audio thread.
pub(crate) fn build_stream(device: &cpal::Device, format: &TrackFormat, ring: RingEnd) -> Result<cpal::Stream, AudioError> {
    let sample_format = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .sample_format();
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(device, &config, ring)?,
        cpal::SampleFormat::I16 => build_typed::<i16>(device, &config, ring)?,
        cpal::SampleFormat::U16 => build_typed::<u16>(device, &config, ring)?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!("device sample format {other:?}")));
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start output stream: {e}")))?;

    tracing::debug!(?format, ?sample_format, "Ring output stream started");
    Ok(stream)
}

// ── Backend ────────────────────────────────────────────────────────

struct RingStream {
    format: TrackFormat,
    producer: HeapProd<f32>,
}

/// Streaming backend writing into a ring drained by the device callback.
pub struct CpalRingBackend {
    thread: AudioThreadHandle,
    stream: Mutex<Option<RingStream>>,
    shared: Arc<RingShared>,
    stop: StopSignal,
    buffering: BufferingParams,
    closed: AtomicBool,
}

impl CpalRingBackend {
    pub fn open(params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        let thread = AudioThreadHandle::spawn(Output::Ring {
            device: params.device.clone(),
        })?;
        let stop = StopSignal::new();
        tracing::info!(backend = "cpal", device = ?params.device, "Opened ring audio output");
        Ok(Box::new(Self {
            thread,
            stream: Mutex::new(None),
            shared: Arc::new(RingShared::new(stop.clone())),
            stop,
            buffering: params.buffering.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn stream(&self) -> MutexGuard<'_, Option<RingStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ms(ms: u32) -> Duration {
        Duration::from_millis(u64::from(ms))
    }

    /// Give the callback a chance to apply a pending flush.
    fn wait_flushed(&self) -> bool {
        let deadline = Instant::now() + FLUSH_WAIT;
        while self.shared.flush.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Wait until at most `leave` samples are queued in the ring.
    fn wait_occupancy(&self, stream: &RingStream, leave: usize) -> Result<FeedOutcome, AudioError> {
        let prebuffer = self.shared.prebuffer_samples.load(Ordering::SeqCst);
        if leave < prebuffer {
            self.shared.prebuffering.store(false, Ordering::SeqCst);
        }

        let mut last = stream.producer.occupied_len();
        let mut moved_at = Instant::now();
        loop {
            if self.shared.failed.load(Ordering::SeqCst) {
                return Err(AudioError::Device("output device lost".into()));
            }
            let queued = stream.producer.occupied_len();
            if queued <= leave {
                return Ok(FeedOutcome::Completed);
            }
            if queued != last {
                last = queued;
                moved_at = Instant::now();
            } else if moved_at.elapsed() > STALL_LIMIT {
                return Err(AudioError::Device("output stream stalled".into()));
            }
            if self.stop.wait_timeout(POLL) {
                return Ok(FeedOutcome::Stopped);
            }
        }
    }

    fn feed(&self, track: &AudioTrack<'_>, leave: Duration) -> Result<FeedOutcome, AudioError> {
        track.validate()?;
        let mut guard = self.stream();
        let stream = guard
            .as_mut()
            .ok_or_else(|| AudioError::StreamMismatch("feed without begin".into()))?;
        if stream.format != track.format {
            return Err(AudioError::StreamMismatch(format!(
                "stream begun as {:?}, fed {:?}",
                stream.format, track.format
            )));
        }

        let samples = track.to_f32();
        let mut offset = 0;
        while offset < samples.len() {
            if self.stop.is_raised() {
                return Ok(FeedOutcome::Stopped);
            }
            offset += stream.producer.push_slice(&samples[offset..]);
            if offset < samples.len() {
                // ring full: it has to play regardless of the prebuffer mark
                self.shared.prebuffering.store(false, Ordering::SeqCst);
                if self.shared.failed.load(Ordering::SeqCst) {
                    return Err(AudioError::Device("output device lost".into()));
                }
                if self.stop.wait_timeout(POLL) {
                    return Ok(FeedOutcome::Stopped);
                }
            }
        }

        let leave = stream.format.frames_in(leave) * usize::from(stream.format.channels);
        self.wait_occupancy(stream, leave)
    }
}

impl AudioBackend for CpalRingBackend {
    fn name(&self) -> &str {
        "cpal"
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
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::NotOpen);
        }
        format.validate()?;
        self.stop.reset();

        let channels = usize::from(format.channels);
        let mut guard = self.stream();
        self.shared.prebuffer_samples.store(
            format.frames_in(Self::ms(self.buffering.pre_buffering_ms)) * channels,
            Ordering::SeqCst,
        );

        let reusable = guard.as_ref().is_some_and(|s| s.format == *format)
            && !self.shared.failed.load(Ordering::SeqCst);
        if reusable && self.wait_flushed() {
            self.shared.prebuffering.store(true, Ordering::SeqCst);
            return Ok(());
        }

        guard.take();
        let target = format.frames_in(Self::ms(self.buffering.target_length_ms));
        let frames = format
            .frames_in(Self::ms(self.buffering.max_length_ms))
            .max(target * 2)
            .max(1024);
        let (producer, consumer) = HeapRb::<f32>::new(frames * channels).split();

        self.shared.flush.store(false, Ordering::SeqCst);
        self.shared.failed.store(false, Ordering::SeqCst);
        self.shared.prebuffering.store(true, Ordering::SeqCst);
        self.thread.open_ring(
            *format,
            RingEnd {
                consumer,
                shared: Arc::clone(&self.shared),
            },
        )?;
        *guard = Some(RingStream {
            format: *format,
            producer,
        });
        tracing::debug!(?format, ring_frames = frames, "Stream begun");
        Ok(())
    }

    fn feed_sync(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.feed(track, Duration::ZERO)
    }

    fn feed_sync_overlap(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.feed(track, Self::ms(self.buffering.target_length_ms))
    }

    fn end(&self) -> Result<(), AudioError> {
        let guard = self.stream();
        let Some(stream) = guard.as_ref() else {
            return Ok(());
        };
        // The stream stays up for the next utterance in the same format.
        self.wait_occupancy(stream, 0).map(|_| ())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.stop.raise();
        self.shared.flush.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AudioError::NotOpen);
        }
        self.stop()?;
        self.stream().take();
        self.thread.close_ring();
        self.thread.shutdown();
        tracing::info!(backend = "cpal", "Closed audio output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (HeapProd<f32>, HeapCons<f32>) {
        HeapRb::<f32>::new(capacity).split()
    }

    #[test]
    fn callback_pads_shortfall_with_silence() {
        let shared = RingShared::new(StopSignal::new());
        let (mut prod, mut cons) = ring(16);
        prod.push_slice(&[0.5, -0.5]);

        let mut scratch = Vec::new();
        let mut out = [7i16; 4];
        shared.pull(&mut cons, &mut scratch, &mut out);
        assert_eq!(out[2..], [0, 0]);
        assert!(out[0] > 16_000 && out[1] < -16_000);
    }

    #[test]
    fn prebuffering_holds_until_threshold() {
        let shared = RingShared::new(StopSignal::new());
        shared.prebuffer_samples.store(4, Ordering::SeqCst);
        let (mut prod, mut cons) = ring(16);
        prod.push_slice(&[0.25, 0.25]);

        let mut scratch = Vec::new();
        let mut out = [1.0f32; 2];
        shared.pull(&mut cons, &mut scratch, &mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(cons.occupied_len(), 2);

        prod.push_slice(&[0.25, 0.25]);
        shared.pull(&mut cons, &mut scratch, &mut out);
        assert_eq!(out, [0.25, 0.25]);
        assert!(!shared.prebuffering.load(Ordering::SeqCst));
    }

    #[test]
    fn flush_empties_ring_inside_callback() {
        let shared = RingShared::new(StopSignal::new());
        shared.prebuffering.store(false, Ordering::SeqCst);
        let (mut prod, mut cons) = ring(16);
        prod.push_slice(&[0.1; 8]);

        shared.flush.store(true, Ordering::SeqCst);
        let mut scratch = Vec::new();
        let mut out = [1.0f32; 4];
        shared.pull(&mut cons, &mut scratch, &mut out);

        assert_eq!(out, [0.0; 4]);
        assert_eq!(prod.occupied_len(), 0);
        assert!(!shared.flush.load(Ordering::SeqCst));
    }

    #[test]
    fn unsigned_silence_is_midpoint() {
        let shared = RingShared::new(StopSignal::new());
        let (_prod, mut cons) = ring(4);
        let mut scratch = Vec::new();
        let mut out = [0u16; 2];
        shared.pull(&mut cons, &mut scratch, &mut out);
        assert_eq!(out, [32768, 32768]);
    }
}
