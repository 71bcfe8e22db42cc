//! Output multiplexer: one backend session per module instance.
//!
//! [`AudioOutput`] picks the most pipelined call the backend supports,
//! manages `begin`/`end` around format changes, applies software volume
//! when the device has no gain control, and replaces a session that failed
//! fatally with a fresh one on the next output.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
use crate::error::AudioError;
use crate::params::AudioParams;
use crate::registry::BackendRegistry;
use crate::track::{clamp_volume, AudioTrack, TrackFormat, MAX_VOLUME};

type Opener = Box<dyn Fn() -> Result<Box<dyn AudioBackend>, AudioError> + Send + Sync>;

/// The audio session of one module instance.
pub struct AudioOutput {
    opener: Option<Opener>,
    backend: Mutex<Option<Arc<dyn AudioBackend>>>,
    /// Serializes reopening. The slot lock is never held across `opener`.
    reopen: Mutex<()>,
    /// Bumped by every `stop`, so a reopen can tell it was interrupted.
    stops: AtomicU64,
    /// Format of the begun stream, if any.
    stream: Mutex<Option<TrackFormat>>,
    volume: AtomicI32,
    closed: AtomicBool,
}

impl AudioOutput {
    /// Open the first of `names` that works. The same list is retried when
    /// the session has to be replaced.
    pub fn open(registry: BackendRegistry, names: &[&str], params: AudioParams) -> Result<Self, AudioError> {
        let names: Vec<String> = names.iter().map(ToString::to_string).collect();
        Self::with_opener(move || {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            registry.open_first(&names, &params)
        })
    }

    /// Open through `opener`, which is called again after fatal errors.
    pub fn with_opener(
        opener: impl Fn() -> Result<Box<dyn AudioBackend>, AudioError> + Send + Sync + 'static,
    ) -> Result<Self, AudioError> {
        let backend: Arc<dyn AudioBackend> = Arc::from(opener()?);
        Ok(Self::new(Some(Box::new(opener)), backend))
    }

    /// Wrap an already open backend. It is not replaced after failures.
    pub fn from_backend(backend: Box<dyn AudioBackend>) -> Self {
        Self::new(None, Arc::from(backend))
    }

    fn new(opener: Option<Opener>, backend: Arc<dyn AudioBackend>) -> Self {
        tracing::info!(backend = backend.name(), mode = %backend.capabilities().mode, "Audio output ready");
        Self {
            opener,
            backend: Mutex::new(Some(backend)),
            reopen: Mutex::new(()),
            stops: AtomicU64::new(0),
            stream: Mutex::new(None),
            volume: AtomicI32::new(MAX_VOLUME),
            closed: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn AudioBackend>>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream(&self) -> MutexGuard<'_, Option<TrackFormat>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current session, reopening it if a fatal error dropped it.
    ///
    /// Returns `None` when a `stop` arrived while reopening; the new session
    /// is kept for the next output.
    fn session(&self) -> Result<Option<Arc<dyn AudioBackend>>, AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::NotOpen);
        }
        if let Some(backend) = self.slot().as_ref() {
            return Ok(Some(Arc::clone(backend)));
        }
        let opener = self.opener.as_ref().ok_or(AudioError::NotOpen)?;

        let _reopening = self.reopen.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = self.slot().as_ref() {
            return Ok(Some(Arc::clone(backend)));
        }
        let stops = self.stops.load(Ordering::SeqCst);
        let backend: Arc<dyn AudioBackend> = Arc::from(opener()?);
        let volume = self.volume.load(Ordering::SeqCst);
        if volume != MAX_VOLUME && backend.capabilities().hardware_volume {
            if let Err(e) = backend.set_volume(volume) {
                Self::discard(backend.as_ref());
                return Err(e);
            }
        }

        {
            let mut slot = self.slot();
            if self.closed.load(Ordering::SeqCst) {
                drop(slot);
                Self::discard(backend.as_ref());
                return Err(AudioError::NotOpen);
            }
            *slot = Some(Arc::clone(&backend));
        }
        tracing::info!(backend = backend.name(), "Audio session reopened");

        if self.stops.load(Ordering::SeqCst) != stops {
            tracing::debug!("Stopped while reopening");
            return Ok(None);
        }
        Ok(Some(backend))
    }

    fn discard(backend: &dyn AudioBackend) {
        if let Err(e) = backend.close() {
            tracing::warn!(error = %e, "Closing unused session");
        }
    }

    /// Drop the session after a fatal error so the next call reopens it.
    fn check<T>(&self, result: Result<T, AudioError>) -> Result<T, AudioError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!(error = %e, "Fatal audio error, closing session");
                self.stream().take();
                if let Some(backend) = self.slot().take() {
                    if let Err(close_err) = backend.close() {
                        tracing::warn!(error = %close_err, "Closing failed session");
                    }
                }
            }
        }
        result
    }

    /// Begin a stream for `format`, ending a stream in another format first.
    fn ensure_stream(&self, backend: &dyn AudioBackend, format: &TrackFormat) -> Result<(), AudioError> {
        let mut stream = self.stream();
        match *stream {
            Some(current) if current == *format => return Ok(()),
            Some(current) => {
                tracing::debug!(from = ?current, to = ?format, "Format change, restarting stream");
                stream.take();
                backend.end()?;
            }
            None => {}
        }
        backend.begin(format)?;
        *stream = Some(*format);
        Ok(())
    }

    /// Play one chunk through the best call the backend offers.
    pub fn output(&self, track: &AudioTrack<'_>) -> Result<FeedOutcome, AudioError> {
        if track.is_empty() {
            return Ok(FeedOutcome::Completed);
        }
        let Some(backend) = self.session()? else {
            return Ok(FeedOutcome::Stopped);
        };
        let caps = backend.capabilities();

        let volume = self.volume.load(Ordering::SeqCst);
        let scaled;
        let track = if caps.hardware_volume || volume == MAX_VOLUME {
            *track
        } else {
            scaled = track.scaled(volume);
            scaled.as_track()
        };

        let result = if caps.streams() {
            self.ensure_stream(backend.as_ref(), &track.format)
                .and_then(|()| match caps.mode {
                    PlaybackMode::FeedOverlap => backend.feed_sync_overlap(&track),
                    _ => backend.feed_sync(&track),
                })
        } else {
            backend.play(&track)
        };
        self.check(result)
    }

    /// End the current stream, draining what the device still holds.
    pub fn end_stream(&self) -> Result<(), AudioError> {
        if self.stream().take().is_none() {
            return Ok(());
        }
        let Some(backend) = self.slot().clone() else {
            return Ok(());
        };
        self.check(backend.end())
    }

    /// Interrupt whatever the playing thread is doing. Never reopens and
    /// never waits for a reopen in progress.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let backend = self.slot().clone();
        match backend {
            Some(backend) => backend.stop(),
            None => Ok(()),
        }
    }

    /// Decode a sound file and play it as its own stream.
    #[cfg(feature = "rodio")]
    pub fn play_file(&self, path: &std::path::Path) -> Result<FeedOutcome, AudioError> {
        let track = crate::decode::decode_file(path)?;
        let outcome = self.output(&track.as_track())?;
        self.end_stream()?;
        Ok(outcome)
    }

    /// Sound files need the `rodio` decoder.
    #[cfg(not(feature = "rodio"))]
    pub fn play_file(&self, path: &std::path::Path) -> Result<FeedOutcome, AudioError> {
        tracing::debug!(path = %path.display(), "No decoder compiled in");
        Err(AudioError::Unsupported {
            backend: "output",
            operation: "play_file",
        })
    }

    /// Set the volume in [-100, 100], clamping out-of-range values.
    pub fn set_volume(&self, volume: i32) -> Result<(), AudioError> {
        let volume = clamp_volume(volume);
        self.volume.store(volume, Ordering::SeqCst);
        let backend = self.slot().clone();
        match backend {
            Some(backend) if backend.capabilities().hardware_volume => backend.set_volume(volume),
            _ => Ok(()),
        }
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::SeqCst)
    }

    /// Capabilities of the current session.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.slot().as_ref().map(|b| b.capabilities())
    }

    pub fn backend_name(&self) -> Option<String> {
        self.slot().as_ref().map(|b| b.name().to_string())
    }

    pub fn play_command(&self) -> Option<String> {
        self.slot().as_ref().and_then(|b| b.play_command())
    }

    /// Close the session for good.
    pub fn close(&self) -> Result<(), AudioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stream().take();
        match self.slot().take() {
            Some(backend) => backend.close(),
            None => Ok(()),
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "Closing audio output on drop");
        }
    }
}
