//! Playback queue: bounded FIFO between the synthesis producer and the
//! playback thread.
//!
//! Audio entries count against `max_samples`; [`PlaybackQueue::push_audio`]
//! blocks while the queue is over the limit. A stop request wakes every
//! waiter: blocked producers get [`SpeakQueueError::Stopped`] and `pop`
//! returns `None` even if entries remain, so the playback thread leaves
//! the utterance without playing further audio.
//!
//! [`PlaybackQueue::clear`] starts a new generation. Producers holding a
//! [`Ticket`] from an older generation are refused, so audio synthesized
//! for a stopped utterance can never leak into the next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::entry::QueueEntry;
use crate::error::SpeakQueueError;

/// Admission token for one utterance's pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<QueueEntry>,
    samples: usize,
    generation: u64,
}

#[derive(Debug)]
pub struct PlaybackQueue {
    inner: Mutex<Inner>,
    changed: Condvar,
    max_samples: usize,
    stop: AtomicBool,
}

impl PlaybackQueue {
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            changed: Condvar::new(),
            max_samples,
            stop: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ticket for the current generation.
    pub fn ticket(&self) -> Ticket {
        Ticket(self.lock().generation)
    }

    /// Append an entry. Never blocks.
    pub fn push(&self, entry: QueueEntry) {
        let mut inner = self.lock();
        inner.samples += entry.samples();
        inner.entries.push_back(entry);
        self.changed.notify_all();
    }

    /// Append an entry unless `ticket` belongs to a cleared generation.
    pub fn push_for(&self, ticket: Ticket, entry: QueueEntry) -> Result<(), SpeakQueueError> {
        let mut inner = self.lock();
        if inner.generation != ticket.0 {
            return Err(SpeakQueueError::Stopped);
        }
        inner.samples += entry.samples();
        inner.entries.push_back(entry);
        self.changed.notify_all();
        Ok(())
    }

    /// Copy `samples` into the queue, waiting while it is over the limit.
    pub fn push_audio(&self, samples: &[i16]) -> Result<(), SpeakQueueError> {
        let ticket = self.ticket();
        self.push_audio_for(ticket, samples)
    }

    /// Like [`push_audio`](Self::push_audio) for a held ticket. Returns
    /// `Stopped` (chunk dropped) if a stop or clear happens while waiting.
    pub fn push_audio_for(&self, ticket: Ticket, samples: &[i16]) -> Result<(), SpeakQueueError> {
        let inner = self.lock();
        let mut inner = self
            .changed
            .wait_while(inner, |i| {
                !self.stopped() && i.generation == ticket.0 && i.samples > self.max_samples
            })
            .unwrap_or_else(PoisonError::into_inner);
        if self.stopped() || inner.generation != ticket.0 {
            return Err(SpeakQueueError::Stopped);
        }
        inner.samples += samples.len();
        inner.entries.push_back(QueueEntry::Audio(samples.to_vec()));
        self.changed.notify_all();
        Ok(())
    }

    /// Wait for the next entry. `None` once a stop is requested.
    pub fn pop(&self) -> Option<QueueEntry> {
        let inner = self.lock();
        let mut inner = self
            .changed
            .wait_while(inner, |i| !self.stopped() && i.entries.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        if self.stopped() {
            return None;
        }
        let entry = inner.entries.pop_front()?;
        let samples = entry.samples();
        if samples > 0 {
            inner.samples -= samples;
            self.changed.notify_all();
        }
        Some(entry)
    }

    /// Drop every entry and start a new generation. Returns the number of
    /// entries discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.samples = 0;
        inner.generation += 1;
        self.changed.notify_all();
        dropped
    }

    /// Make every current and future wait return until [`reset_stop`](Self::reset_stop).
    pub fn request_stop(&self) {
        let _inner = self.lock();
        self.stop.store(true, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub fn reset_stop(&self) {
        let _inner = self.lock();
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stopped()
    }

    /// Wake all waiters so they recheck their conditions.
    pub fn wake_all(&self) {
        let _inner = self.lock();
        self.changed.notify_all();
    }

    /// Audio samples currently queued.
    pub fn queued_samples(&self) -> usize {
        self.lock().samples
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub const fn max_samples(&self) -> usize {
        self.max_samples
    }
}
