//! Integration tests for `AudioOutput` against recording fake backends.
//!
//! No audio hardware is touched: the fakes log every call so the tests can
//! check which device operations the multiplexer chose, in which order, and
//! with which samples.
//!
//! # What is tested
//!
//! - Overlap > sync > play selection from the declared capability
//! - `begin` on the first chunk and on format changes, `end` exactly once
//! - Software volume on a copy vs hardware volume on the device
//! - Fatal errors close the session and the next output reopens it
//! - `stop` and `close` return promptly while a reopen is under way
//! - Concurrent `stop` against real timed and pipe backends

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use spd_audio::{
    AudioBackend, AudioError, AudioOutput, AudioParams, AudioTrack, BackendRegistry, Capabilities,
    FeedOutcome, PlaybackMode, Samples, TrackFormat,
};

// ── Fake backend ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Begin(TrackFormat),
    Feed(Vec<i16>),
    Overlap(Vec<i16>),
    Play(Vec<i16>),
    End,
    Stop,
    Close,
    SetVolume(i32),
}

type Log = Arc<Mutex<Vec<Call>>>;

struct FakeBackend {
    caps: Capabilities,
    log: Log,
    fail_next: Arc<AtomicBool>,
}

impl FakeBackend {
    fn new(caps: Capabilities, log: &Log) -> Self {
        Self {
            caps,
            log: Arc::clone(log),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }

    fn samples(track: &AudioTrack<'_>) -> Vec<i16> {
        match track.samples {
            Samples::S16(s) => s.to_vec(),
            Samples::S8(s) => s.iter().map(|&v| i16::from(v)).collect(),
        }
    }

    fn outcome(&self) -> Result<FeedOutcome, AudioError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(AudioError::Device("unplugged".into()))
        } else {
            Ok(FeedOutcome::Completed)
        }
    }
}

impl AudioBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn play(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.record(Call::Play(Self::samples(track)));
        self.outcome()
    }

    fn begin(&self, format: &TrackFormat) -> Result<(), AudioError> {
        self.record(Call::Begin(*format));
        Ok(())
    }

    fn feed_sync(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        self.record(Call::Feed(Self::samples(track)));
        self.outcome()
    }

    fn feed_sync_overlap(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        if self.caps.mode != PlaybackMode::FeedOverlap {
            return self.feed_sync(track);
        }
        self.record(Call::Overlap(Self::samples(track)));
        self.outcome()
    }

    fn end(&self) -> Result<(), AudioError> {
        self.record(Call::End);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.record(Call::Stop);
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.record(Call::Close);
        Ok(())
    }

    fn set_volume(&self, volume: i32) -> Result<(), AudioError> {
        self.record(Call::SetVolume(volume));
        Ok(())
    }
}

fn output_with(caps: Capabilities) -> (AudioOutput, Log) {
    let log = Log::default();
    let output = AudioOutput::from_backend(Box::new(FakeBackend::new(caps, &log)));
    (output, log)
}

fn calls(log: &Log) -> Vec<Call> {
    log.lock().unwrap().clone()
}

// ── Dispatch ───────────────────────────────────────────────────────

#[test]
fn overlap_backend_gets_begin_overlap_end() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedOverlap));
    let a = [1i16, 2, 3];
    let b = [4i16, 5];

    output.output(&AudioTrack::s16(1, 16_000, &a)).unwrap();
    output.output(&AudioTrack::s16(1, 16_000, &b)).unwrap();
    output.end_stream().unwrap();
    output.end_stream().unwrap();

    assert_eq!(
        calls(&log),
        vec![
            Call::Begin(TrackFormat::s16(1, 16_000)),
            Call::Overlap(a.to_vec()),
            Call::Overlap(b.to_vec()),
            Call::End,
        ]
    );
}

#[test]
fn sync_backend_uses_feed_sync() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    let a = [9i16; 4];
    output.output(&AudioTrack::s16(1, 8_000, &a)).unwrap();
    assert_eq!(calls(&log)[1], Call::Feed(a.to_vec()));
}

#[test]
fn play_only_backend_never_begins() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::Play));
    let a = [7i16; 4];
    output.output(&AudioTrack::s16(1, 8_000, &a)).unwrap();
    output.end_stream().unwrap();
    assert_eq!(calls(&log), vec![Call::Play(a.to_vec())]);
}

#[test]
fn format_change_ends_and_restarts_stream() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    let mono = [1i16; 2];
    let stereo = [2i16; 4];

    output.output(&AudioTrack::s16(1, 16_000, &mono)).unwrap();
    output.output(&AudioTrack::s16(2, 16_000, &stereo)).unwrap();

    assert_eq!(
        calls(&log),
        vec![
            Call::Begin(TrackFormat::s16(1, 16_000)),
            Call::Feed(mono.to_vec()),
            Call::End,
            Call::Begin(TrackFormat::s16(2, 16_000)),
            Call::Feed(stereo.to_vec()),
        ]
    );
}

#[test]
fn empty_chunk_touches_nothing() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    output.output(&AudioTrack::s16(1, 16_000, &[])).unwrap();
    assert!(calls(&log).is_empty());
}

// ── Volume ─────────────────────────────────────────────────────────

#[test]
fn full_volume_passes_samples_unchanged() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    let samples = [i16::MIN, -1, 0, 1, i16::MAX];
    output.output(&AudioTrack::s16(1, 16_000, &samples)).unwrap();
    assert_eq!(calls(&log)[1], Call::Feed(samples.to_vec()));
}

#[test]
fn software_volume_scales_a_copy() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    output.set_volume(0).unwrap();
    let samples = [1000i16, -1000];
    output.output(&AudioTrack::s16(1, 16_000, &samples)).unwrap();

    assert_eq!(calls(&log)[1], Call::Feed(vec![500, -500]));
    assert_eq!(samples, [1000, -1000]);
}

#[test]
fn hardware_volume_goes_to_device() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::Play).with_hardware_volume());
    output.set_volume(-50).unwrap();
    let samples = [1000i16];
    output.output(&AudioTrack::s16(1, 16_000, &samples)).unwrap();

    assert_eq!(calls(&log), vec![Call::SetVolume(-50), Call::Play(vec![1000])]);
}

#[test]
fn volume_is_clamped() {
    let (output, _log) = output_with(Capabilities::new(PlaybackMode::Play));
    output.set_volume(400).unwrap();
    assert_eq!(output.volume(), 100);
    output.set_volume(-400).unwrap();
    assert_eq!(output.volume(), -100);
}

// ── Failure and reopen ─────────────────────────────────────────────

#[test]
fn fatal_error_closes_and_next_output_reopens() {
    let log = Log::default();
    let opened = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(true));

    let (opener_log, opener_count, opener_fail) = (Arc::clone(&log), Arc::clone(&opened), Arc::clone(&fail));
    let output = AudioOutput::with_opener(move || {
        opener_count.fetch_add(1, Ordering::SeqCst);
        let mut backend = FakeBackend::new(Capabilities::new(PlaybackMode::FeedSync), &opener_log);
        backend.fail_next = Arc::clone(&opener_fail);
        Ok(Box::new(backend) as Box<dyn AudioBackend>)
    })
    .unwrap();

    let samples = [3i16; 8];
    let track = AudioTrack::s16(1, 16_000, &samples);
    let err = output.output(&track).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(calls(&log).last(), Some(&Call::Close));
    assert!(output.backend_name().is_none());

    // next utterance gets a fresh session and a fresh stream
    assert_eq!(output.output(&track).unwrap(), FeedOutcome::Completed);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    let tail: Vec<Call> = calls(&log).into_iter().rev().take(2).collect();
    assert_eq!(tail, vec![Call::Feed(samples.to_vec()), Call::Begin(track.format)]);
}

#[test]
fn stop_does_not_wait_for_a_slow_reopen() {
    let log = Log::default();
    let opened = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(true));

    let (opener_log, opener_count, opener_fail) = (Arc::clone(&log), Arc::clone(&opened), Arc::clone(&fail));
    let output = AudioOutput::with_opener(move || {
        // every reopen is slow, like a FIFO waiting for its reader
        if opener_count.fetch_add(1, Ordering::SeqCst) > 0 {
            thread::sleep(Duration::from_millis(1500));
        }
        let mut backend = FakeBackend::new(Capabilities::new(PlaybackMode::FeedSync), &opener_log);
        backend.fail_next = Arc::clone(&opener_fail);
        Ok(Box::new(backend) as Box<dyn AudioBackend>)
    })
    .unwrap();
    let output = Arc::new(output);

    let samples = [3i16; 8];
    let track = AudioTrack::s16(1, 16_000, &samples);
    assert!(output.output(&track).unwrap_err().is_fatal());

    let feeder = Arc::clone(&output);
    let handle = thread::spawn(move || {
        let samples = [4i16; 8];
        feeder.output(&AudioTrack::s16(1, 16_000, &samples))
    });

    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    output.stop().unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));

    // the interrupted chunk is not played, the new session is kept
    assert_eq!(handle.join().unwrap().unwrap(), FeedOutcome::Stopped);
    assert!(!calls(&log).contains(&Call::Feed(vec![4; 8])));
    assert_eq!(output.backend_name().as_deref(), Some("fake"));

    assert_eq!(output.output(&track).unwrap(), FeedOutcome::Completed);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[test]
fn close_during_reopen_discards_new_session() {
    let log = Log::default();
    let opened = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(true));

    let (opener_log, opener_count, opener_fail) = (Arc::clone(&log), Arc::clone(&opened), Arc::clone(&fail));
    let output = AudioOutput::with_opener(move || {
        if opener_count.fetch_add(1, Ordering::SeqCst) > 0 {
            thread::sleep(Duration::from_millis(300));
        }
        let mut backend = FakeBackend::new(Capabilities::new(PlaybackMode::FeedSync), &opener_log);
        backend.fail_next = Arc::clone(&opener_fail);
        Ok(Box::new(backend) as Box<dyn AudioBackend>)
    })
    .unwrap();
    let output = Arc::new(output);

    let samples = [3i16; 8];
    assert!(output.output(&AudioTrack::s16(1, 16_000, &samples)).is_err());

    let feeder = Arc::clone(&output);
    let handle = thread::spawn(move || {
        let samples = [4i16; 8];
        feeder.output(&AudioTrack::s16(1, 16_000, &samples))
    });

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    output.close().unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    assert!(matches!(handle.join().unwrap(), Err(AudioError::NotOpen)));
    assert!(output.backend_name().is_none());
    // closed once after the fatal error, once more for the discarded reopen
    assert_eq!(calls(&log).iter().filter(|c| **c == Call::Close).count(), 2);
}

#[test]
fn closed_output_refuses_work() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::Play));
    output.close().unwrap();
    let samples = [1i16];
    assert!(matches!(
        output.output(&AudioTrack::s16(1, 8_000, &samples)),
        Err(AudioError::NotOpen)
    ));
    assert_eq!(calls(&log), vec![Call::Close]);
}

#[test]
fn unreadable_sound_file_touches_nothing() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    let err = output
        .play_file(std::path::Path::new("/nonexistent/icon.wav"))
        .unwrap_err();

    if cfg!(feature = "rodio") {
        assert!(matches!(err, AudioError::Io(_)));
    } else {
        assert!(matches!(err, AudioError::Unsupported { operation: "play_file", .. }));
    }
    // a bad icon never costs the session
    assert!(calls(&log).is_empty());
    assert_eq!(output.backend_name().as_deref(), Some("fake"));
}

#[test]
fn stop_reaches_backend() {
    let (output, log) = output_with(Capabilities::new(PlaybackMode::FeedSync));
    output.stop().unwrap();
    assert_eq!(calls(&log), vec![Call::Stop]);
}

// ── Concurrent stop on real backends ───────────────────────────────

fn assert_stop_interrupts(output: AudioOutput) {
    let output = Arc::new(output);
    let feeder = Arc::clone(&output);
    let handle = thread::spawn(move || {
        let samples = vec![100i16; 16_000 * 10];
        feeder.output(&AudioTrack::s16(1, 16_000, &samples))
    });

    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    output.stop().unwrap();
    let outcome = handle.join().unwrap().unwrap();

    assert_eq!(outcome, FeedOutcome::Stopped);
    assert!(start.elapsed() < Duration::from_secs(2));
    output.end_stream().unwrap();
}

#[test]
fn stop_interrupts_timed_feed() {
    let output = AudioOutput::open(BackendRegistry::with_defaults(), &["null"], AudioParams::default()).unwrap();
    assert_stop_interrupts(output);
}

#[cfg(unix)]
#[test]
fn stop_interrupts_pipe_feed() {
    let params = AudioParams {
        command: Some(vec!["sh".into(), "-c".into(), "sleep 30 > /dev/null".into()]),
        ..AudioParams::default()
    };
    let output = AudioOutput::open(BackendRegistry::with_defaults(), &["pipe"], params).unwrap();
    assert_stop_interrupts(output);
}
