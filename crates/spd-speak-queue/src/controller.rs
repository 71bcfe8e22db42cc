//! Speak queue controller: pipelines synthesis with playback.
//!
//! Three roles share one [`SpeakQueue`]:
//!
//! - the caller's thread runs synthesis and pushes audio, marks and icons
//! - the playback thread pops entries and drives the [`PlaybackSink`]
//! - the stop-or-pause thread unwinds an utterance on request
//!
//! The control mutex guards the utterance state, the pause sub-state and
//! the worker flags. It is always taken before the playback queue's lock,
//! and no lock is held while calling the sink, the reporter or the
//! canceller.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use spd_audio::AudioTrack;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::config::SpeakQueueConfig;
use crate::entry::{IndexMark, QueueEntry};
use crate::error::SpeakQueueError;
use crate::events::{EventReporter, SpeechEvent, SynthCanceller};
use crate::queue::{PlaybackQueue, Ticket};
use crate::sink::PlaybackSink;
use crate::state::{PauseState, SpeakState};

const PLAYBACK_THREAD: &str = "spd-playback";
const STOPPER_THREAD: &str = "spd-stop-or-pause";

#[derive(Debug, Default)]
struct Control {
    state: SpeakState,
    pause: PauseState,
    /// The playback thread is parked between utterances.
    player_idle: bool,
    closing: bool,
}

struct Shared {
    config: SpeakQueueConfig,
    control: Mutex<Control>,
    player_wake: Condvar,
    player_idle: Condvar,
    stopper_wake: Condvar,
    queue: PlaybackQueue,
    sink: Arc<dyn PlaybackSink>,
    reporter: Box<dyn EventReporter>,
    canceller: Box<dyn SynthCanceller>,
}

struct Workers {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    exits: mpsc::Receiver<&'static str>,
}

/// Tells `terminate` a worker is gone, including when it panicked.
struct ExitGuard {
    name: &'static str,
    tx: mpsc::Sender<&'static str>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.tx.send(self.name).ok();
    }
}

/// One module instance's speak queue.
///
/// Created once at module init with [`start`](Self::start); the worker
/// threads live until [`terminate`](Self::terminate) or drop.
pub struct SpeakQueue {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl SpeakQueue {
    /// Start the playback and stop-or-pause threads.
    pub fn start(
        config: SpeakQueueConfig,
        sink: Arc<dyn PlaybackSink>,
        reporter: impl EventReporter + 'static,
        canceller: impl SynthCanceller + 'static,
    ) -> Result<Self, SpeakQueueError> {
        let shared = Arc::new(Shared {
            queue: PlaybackQueue::new(config.max_queue_samples),
            config,
            control: Mutex::new(Control::default()),
            player_wake: Condvar::new(),
            player_idle: Condvar::new(),
            stopper_wake: Condvar::new(),
            sink,
            reporter: Box::new(reporter),
            canceller: Box::new(canceller),
        });

        let (exit_tx, exits) = mpsc::channel();
        let player = spawn_worker(PLAYBACK_THREAD, &shared, &exit_tx, Shared::run_player)?;
        let stopper = match spawn_worker(STOPPER_THREAD, &shared, &exit_tx, Shared::run_stopper) {
            Ok(handle) => handle,
            Err(e) => {
                shared.begin_close();
                if player.join().is_err() {
                    tracing::warn!("Playback thread panicked during aborted start");
                }
                return Err(e);
            }
        };

        tracing::info!(
            sample_rate = shared.config.sample_rate,
            channels = shared.config.channels,
            max_samples = shared.config.max_queue_samples,
            "Speak queue started"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(Some(Workers {
                handles: vec![(PLAYBACK_THREAD, player), (STOPPER_THREAD, stopper)],
                exits,
            })),
        })
    }

    /// [`start`](Self::start) with events delivered on a tokio channel.
    pub fn with_channel(
        config: SpeakQueueConfig,
        sink: Arc<dyn PlaybackSink>,
        canceller: impl SynthCanceller + 'static,
    ) -> Result<(Self, UnboundedReceiver<SpeechEvent>), SpeakQueueError> {
        let (tx, rx) = unbounded_channel();
        let queue = Self::start(config, sink, tx, canceller)?;
        Ok((queue, rx))
    }

    /// Claim the queue for a new utterance.
    ///
    /// Fails with `Busy` while another utterance is in flight or a stop is
    /// still unwinding. Callers serialize their synthesis calls.
    pub fn before_synth(&self) -> Result<(), SpeakQueueError> {
        let mut ctl = self.shared.control();
        if ctl.closing {
            return Err(SpeakQueueError::Closed);
        }
        if ctl.state != SpeakState::Idle || self.shared.queue.stop_requested() {
            tracing::debug!(state = %ctl.state, "Speak requested while not ready");
            return Err(SpeakQueueError::Busy { state: ctl.state });
        }
        ctl.pause = PauseState::Off;
        ctl.state = SpeakState::BeforeSynth;
        tracing::debug!("Utterance claimed");
        Ok(())
    }

    /// Queue the utterance's BEGIN and wake the playback thread.
    ///
    /// Returns `Ok(true)` on the transition and `Ok(false)` if playback was
    /// already set up, so engines can call it before every chunk.
    pub fn before_play(&self) -> Result<bool, SpeakQueueError> {
        let mut ctl = self.shared.control();
        if ctl.closing {
            return Err(SpeakQueueError::Closed);
        }
        if self.shared.queue.stop_requested() {
            return Err(SpeakQueueError::Stopped);
        }
        match ctl.state {
            SpeakState::BeforeSynth => {
                ctl.state = SpeakState::BeforePlay;
                self.shared.queue.push(QueueEntry::Begin);
                self.shared.player_wake.notify_all();
                tracing::debug!("Playback requested");
                Ok(true)
            }
            SpeakState::BeforePlay | SpeakState::Speaking => Ok(false),
            // stopped before synthesis produced anything
            SpeakState::Idle => Err(SpeakQueueError::Stopped),
        }
    }

    /// Copy a chunk of samples into the queue, blocking while it is full.
    pub fn add_audio(&self, samples: &[i16]) -> Result<(), SpeakQueueError> {
        let ticket = self.admit("add_audio")?;
        self.shared.queue.push_audio_for(ticket, samples)
    }

    pub fn add_mark(&self, mark: impl Into<IndexMark>) -> Result<(), SpeakQueueError> {
        let ticket = self.admit("add_mark")?;
        self.shared.queue.push_for(ticket, QueueEntry::IndexMark(mark.into()))
    }

    pub fn add_sound_icon(&self, path: impl Into<PathBuf>) -> Result<(), SpeakQueueError> {
        let ticket = self.admit("add_sound_icon")?;
        self.shared.queue.push_for(ticket, QueueEntry::SoundIcon(path.into()))
    }

    /// Mark the end of the utterance.
    pub fn add_end(&self) -> Result<(), SpeakQueueError> {
        let ticket = self.admit("add_end")?;
        self.shared.queue.push_for(ticket, QueueEntry::End)
    }

    /// Ticket for a producer push, checked against the utterance state.
    fn admit(&self, operation: &'static str) -> Result<Ticket, SpeakQueueError> {
        let ctl = self.shared.control();
        if ctl.closing {
            return Err(SpeakQueueError::Closed);
        }
        match ctl.state {
            _ if self.shared.queue.stop_requested() => Err(SpeakQueueError::Stopped),
            SpeakState::BeforePlay | SpeakState::Speaking => Ok(self.shared.queue.ticket()),
            SpeakState::Idle => Err(SpeakQueueError::Stopped),
            SpeakState::BeforeSynth => Err(SpeakQueueError::InvalidTransition {
                operation,
                state: ctl.state,
            }),
        }
    }

    /// Request a stop of the current utterance.
    ///
    /// Returns `false` without side effects when idle or when a stop is
    /// already unwinding. `Stop` is reported once the unwind is done.
    pub fn stop(&self) -> bool {
        let mut ctl = self.shared.control();
        let started = self.shared.request_stop(&mut ctl);
        if !started {
            tracing::debug!(state = %ctl.state, "Cannot stop now");
        }
        started
    }

    /// Request a pause at the next boundary mark.
    ///
    /// If the utterance ends first, it ends normally and the request lapses.
    /// Returns `false` when idle, stopping or already pausing.
    pub fn pause(&self) -> bool {
        let mut ctl = self.shared.control();
        if ctl.state != SpeakState::Idle && ctl.pause == PauseState::Off && !self.shared.queue.stop_requested() {
            ctl.pause = PauseState::Requested;
            tracing::debug!("Pause requested");
            true
        } else {
            false
        }
    }

    /// `true` while a stop or pause is unwinding. Engines poll this
    /// between chunks.
    pub fn stop_requested(&self) -> bool {
        self.shared.queue.stop_requested()
    }

    pub fn state(&self) -> SpeakState {
        self.shared.control().state
    }

    pub fn pause_state(&self) -> PauseState {
        self.shared.control().pause
    }

    pub fn config(&self) -> &SpeakQueueConfig {
        &self.shared.config
    }

    /// Audio samples waiting for playback.
    pub fn queued_samples(&self) -> usize {
        self.shared.queue.queued_samples()
    }

    pub(crate) fn report(&self, event: SpeechEvent) {
        self.shared.reporter.report(event);
    }

    /// Stop both threads and wait for them.
    ///
    /// # Strategy
    /// 1. Set the close flag and the stop flag, wake every waiter
    /// 2. Stop the sink so a blocked write returns
    /// 3. Wait up to `shutdown_grace_ms` for both threads to exit
    /// 4. Join the ones that exited; detach the rest with a warning
    ///
    /// Idempotent; also run on drop.
    pub fn terminate(&self) {
        let Some(workers) = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        self.shared.begin_close();
        if let Err(e) = self.shared.sink.stop() {
            tracing::debug!(error = %e, "Sink stop during shutdown");
        }

        let deadline = Instant::now() + self.shared.config.shutdown_grace();
        let mut exited = Vec::with_capacity(workers.handles.len());
        while exited.len() < workers.handles.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            match workers.exits.recv_timeout(left) {
                Ok(name) => exited.push(name),
                Err(_) => break,
            }
        }

        for (name, handle) in workers.handles {
            if exited.contains(&name) || handle.is_finished() {
                if handle.join().is_err() {
                    tracing::warn!(thread = name, "Speak queue thread panicked");
                }
            } else {
                tracing::warn!(
                    thread = name,
                    grace_ms = self.shared.config.shutdown_grace_ms,
                    "Thread did not exit in time, detaching"
                );
            }
        }

        let dropped = self.shared.queue.clear();
        tracing::info!(dropped, "Speak queue terminated");
    }
}

impl Drop for SpeakQueue {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_worker(
    name: &'static str,
    shared: &Arc<Shared>,
    exits: &mpsc::Sender<&'static str>,
    body: fn(&Shared),
) -> Result<JoinHandle<()>, SpeakQueueError> {
    let shared = Arc::clone(shared);
    let guard = ExitGuard {
        name,
        tx: exits.clone(),
    };
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard = guard;
            tracing::debug!(thread = name, "Thread starting");
            body(&shared);
            tracing::debug!(thread = name, "Thread ended");
        })
        .map_err(SpeakQueueError::ThreadSpawn)
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start an unwind unless idle or already stopping. Caller holds the
    /// control lock.
    fn request_stop(&self, ctl: &mut Control) -> bool {
        if ctl.closing || ctl.state == SpeakState::Idle || self.queue.stop_requested() {
            return false;
        }
        self.queue.request_stop();
        self.stopper_wake.notify_all();
        true
    }

    fn begin_close(&self) {
        {
            let mut ctl = self.control();
            ctl.closing = true;
            self.player_wake.notify_all();
            self.player_idle.notify_all();
            self.stopper_wake.notify_all();
        }
        self.queue.request_stop();
    }

    fn stop_sink(&self) {
        if let Err(e) = self.sink.stop() {
            tracing::debug!(error = %e, "Sink stop failed");
        }
    }

    // ── Playback thread ────────────────────────────────────────────

    fn run_player(&self) {
        let mut ctl = self.control();
        loop {
            ctl.player_idle = true;
            self.player_idle.notify_all();
            ctl = self
                .player_wake
                .wait_while(ctl, |c| {
                    !c.closing && (c.state < SpeakState::BeforePlay || self.queue.stop_requested())
                })
                .unwrap_or_else(PoisonError::into_inner);
            if ctl.closing {
                break;
            }
            ctl.player_idle = false;
            drop(ctl);

            self.play_utterance();
            ctl = self.control();
        }
        ctl.player_idle = true;
        self.player_idle.notify_all();
    }

    fn play_utterance(&self) {
        tracing::debug!("Playback");
        let mut ended = false;
        while let Some(entry) = self.queue.pop() {
            match entry {
                QueueEntry::Audio(samples) => {
                    let track = AudioTrack::s16(self.config.channels, self.config.sample_rate, &samples);
                    tracing::debug!(samples = samples.len(), "Sending audio");
                    if let Err(e) = self.sink.play_audio(&track) {
                        self.playback_failed(&e);
                        break;
                    }
                }
                QueueEntry::IndexMark(mark) => {
                    tracing::debug!(mark = %mark, "Reporting index mark");
                    self.reporter.report(SpeechEvent::IndexMark(mark.name.clone()));
                    if self.pause_at(&mark) {
                        break;
                    }
                }
                QueueEntry::SoundIcon(path) => {
                    if let Err(e) = self.sink.play_sound_icon(&path) {
                        tracing::warn!(path = %path.display(), error = %e, "Sound icon failed");
                    }
                }
                QueueEntry::Begin => {
                    let begun = {
                        let mut ctl = self.control();
                        let begun = ctl.state == SpeakState::BeforePlay;
                        if begun {
                            ctl.state = SpeakState::Speaking;
                        }
                        begun
                    };
                    if begun {
                        self.reporter.report(SpeechEvent::Begin);
                    }
                }
                QueueEntry::End => {
                    tracing::debug!("End of utterance");
                    ended = true;
                    break;
                }
            }
        }

        if let Err(e) = self.sink.finish() {
            if ended {
                self.playback_failed(&e);
                return;
            }
            tracing::debug!(error = %e, "Finishing interrupted utterance");
        }

        if ended {
            let completed = {
                let mut ctl = self.control();
                let completed = ctl.state == SpeakState::Speaking && !self.queue.stop_requested();
                if completed {
                    ctl.state = SpeakState::Idle;
                    ctl.pause = PauseState::Off;
                }
                completed
            };
            if completed {
                self.reporter.report(SpeechEvent::End);
            }
        }
    }

    /// Turn a pause request into a stop at a boundary mark.
    fn pause_at(&self, mark: &IndexMark) -> bool {
        if !mark.boundary {
            return false;
        }
        let mut ctl = self.control();
        if ctl.state == SpeakState::Speaking && ctl.pause == PauseState::Requested {
            if self.request_stop(&mut ctl) {
                tracing::debug!(mark = %mark, "Pausing at mark");
                ctl.pause = PauseState::MarkReported;
                return true;
            }
        }
        false
    }

    fn playback_failed(&self, error: &spd_audio::AudioError) {
        tracing::error!(error = %error, "Playback failed");
        self.reporter.report(SpeechEvent::Error(error.to_string()));
        let mut ctl = self.control();
        self.request_stop(&mut ctl);
    }

    // ── Stop-or-pause thread ───────────────────────────────────────

    fn run_stopper(&self) {
        let mut ctl = self.control();
        loop {
            ctl = self
                .stopper_wake
                .wait_while(ctl, |c| !c.closing && !self.queue.stop_requested())
                .unwrap_or_else(PoisonError::into_inner);
            if ctl.closing {
                break;
            }
            drop(ctl);

            self.unwind();
            ctl = self.control();
        }
    }

    /// Interrupt playback, cancel synthesis, drop what is queued and
    /// report `Pause` or `Stop`.
    fn unwind(&self) {
        tracing::debug!("Stop or pause");
        self.queue.wake_all();
        self.control().state = SpeakState::Idle;

        // A single stop can race with the playback thread starting its next
        // write, so repeat it until the thread is parked.
        loop {
            self.stop_sink();
            let ctl = self.control();
            let (ctl, _) = self
                .player_idle
                .wait_timeout_while(ctl, self.config.stop_retry(), |c| !c.player_idle && !c.closing)
                .unwrap_or_else(PoisonError::into_inner);
            if ctl.player_idle || ctl.closing {
                break;
            }
        }

        tracing::debug!("Waiting for synthesis to stop");
        self.canceller.cancel();
        let dropped = self.queue.clear();

        let pause = {
            let mut ctl = self.control();
            let pause = ctl.pause;
            ctl.state = SpeakState::Idle;
            ctl.pause = PauseState::Off;
            self.queue.reset_stop();
            pause
        };

        let event = if pause == PauseState::MarkReported {
            SpeechEvent::Pause
        } else {
            SpeechEvent::Stop
        };
        tracing::debug!(dropped, event = ?event, "Utterance unwound");
        self.reporter.report(event);
    }
}
