//! Dedicated audio thread: confines `!Send` platform streams to one OS thread.
//!
//! `cpal::Stream` and `rodio::OutputStream` are `!Send` on some platforms.
//! Rather than `unsafe impl Send` on the backends, both live on a single
//! thread per session and are driven through [`AudioCommand`]s. The
//! [`AudioThreadHandle`] is the `Send + Sync` proxy a backend holds.
//!
//! Only stream lifetime goes through the thread. Audio data never does: the
//! ring backend hands the stream a ring consumer, the sink backend gets a
//! `rodio::Sink` back and appends to it directly.

use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;

use crate::error::AudioError;
#[cfg(feature = "cpal")]
use crate::backend::cpal_ring::RingEnd;
#[cfg(feature = "cpal")]
use crate::track::TrackFormat;

/// What the thread opens at startup.
#[derive(Debug, Clone)]
pub(crate) enum Output {
    /// A cpal output device (by name, or the host default).
    #[cfg(feature = "cpal")]
    Ring { device: Option<String> },
    /// The default rodio output stream.
    #[cfg(feature = "rodio")]
    Sink,
}

// ── Commands ───────────────────────────────────────────────────────

enum AudioCommand {
    /// Build and start a stream pulling from `ring`, replacing any previous one.
    #[cfg(feature = "cpal")]
    OpenRing {
        format: TrackFormat,
        ring: RingEnd,
        reply: mpsc::Sender<Result<(), AudioError>>,
    },

    /// Drop the current ring stream.
    #[cfg(feature = "cpal")]
    CloseRing,

    /// Create a fresh sink on the rodio output stream.
    #[cfg(feature = "rodio")]
    NewSink {
        reply: mpsc::Sender<Result<rodio::Sink, AudioError>>,
    },

    Shutdown,
}

/// Platform objects owned by the thread.
enum Owned {
    #[cfg(feature = "cpal")]
    Ring {
        device: cpal::Device,
        stream: Option<cpal::Stream>,
    },
    #[cfg(feature = "rodio")]
    Sink {
        _stream: rodio::OutputStream,
        handle: rodio::OutputStreamHandle,
    },
}

// ── Handle (Send + Sync proxy) ─────────────────────────────────────

/// `Send + Sync` handle to a dedicated audio thread.
///
/// Request–reply methods block the caller until the thread responds.
pub(crate) struct AudioThreadHandle {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AudioThreadHandle {
    /// Spawn the thread and open `output` on it.
    ///
    /// Open failures come back through a one-shot init channel.
    pub(crate) fn spawn(output: Output) -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("spd-audio".into())
            .spawn(move || Self::run(output, cmd_rx, init_tx))?;

        init_rx.recv().map_err(|_| AudioError::ThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    #[cfg(feature = "cpal")]
    pub(crate) fn open_ring(&self, format: TrackFormat, ring: RingEnd) -> Result<(), AudioError> {
        self.send_and_recv(|reply| AudioCommand::OpenRing { format, ring, reply })
    }

    #[cfg(feature = "cpal")]
    pub(crate) fn close_ring(&self) {
        self.send(AudioCommand::CloseRing);
    }

    #[cfg(feature = "rodio")]
    pub(crate) fn new_sink(&self) -> Result<rodio::Sink, AudioError> {
        self.send_and_recv(|reply| AudioCommand::NewSink { reply })
    }

    /// Stop the thread and wait for it. Idempotent.
    pub(crate) fn shutdown(&self) {
        self.send(AudioCommand::Shutdown);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Audio thread panicked");
            }
        }
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn send(&self, cmd: AudioCommand) {
        // The thread may already be gone.
        let _ = self.cmd_tx.send(cmd);
    }

    fn send_and_recv<T>(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<T, AudioError>>) -> AudioCommand,
    ) -> Result<T, AudioError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AudioError::ThreadDied)?;
        rx.recv().map_err(|_| AudioError::ThreadDied)?
    }

    // ── Thread body ────────────────────────────────────────────────

    fn open(output: Output) -> Result<Owned, AudioError> {
        match output {
            #[cfg(feature = "cpal")]
            Output::Ring { device } => {
                let device = crate::backend::cpal_ring::find_device(device.as_deref())?;
                Ok(Owned::Ring { device, stream: None })
            }
            #[cfg(feature = "rodio")]
            Output::Sink => {
                let (stream, handle) = rodio::OutputStream::try_default()
                    .map_err(|e| AudioError::unavailable("rodio", e.to_string()))?;
                Ok(Owned::Sink {
                    _stream: stream,
                    handle,
                })
            }
        }
    }

    #[allow(unreachable_patterns)]
    fn run(
        output: Output,
        cmd_rx: mpsc::Receiver<AudioCommand>,
        init_tx: mpsc::Sender<Result<(), AudioError>>,
    ) {
        let mut owned = match Self::open(output) {
            Ok(owned) => owned,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };
        if init_tx.send(Ok(())).is_err() {
            return;
        }

        while let Ok(cmd) = cmd_rx.recv() {
            match (cmd, &mut owned) {
                #[cfg(feature = "cpal")]
                (AudioCommand::OpenRing { format, ring, reply }, Owned::Ring { device, stream }) => {
                    // Old stream must stop pulling before the new one starts.
                    stream.take();
                    let result = crate::backend::cpal_ring::build_stream(device, &format, ring)
                        .map(|s| *stream = Some(s));
                    let _ = reply.send(result);
                }

                #[cfg(feature = "cpal")]
                (AudioCommand::CloseRing, Owned::Ring { stream, .. }) => {
                    stream.take();
                }

                #[cfg(feature = "rodio")]
                (AudioCommand::NewSink { reply }, Owned::Sink { handle, .. }) => {
                    let sink = rodio::Sink::try_new(handle).map_err(|e| AudioError::Device(e.to_string()));
                    let _ = reply.send(sink);
                }

                (AudioCommand::Shutdown, _) => break,

                // Command for the other kind of output; the reply sender
                // drops and the caller sees ThreadDied.
                (_, _) => tracing::error!("Audio command does not match the opened output"),
            }
        }

        tracing::debug!("Audio thread shutting down");
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
