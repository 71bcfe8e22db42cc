//! Events reported upward and the hooks the queue calls out through.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Notification sent to the server side of the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SpeechEvent {
    Begin,
    End,
    Pause,
    Stop,
    IndexMark(String),
    /// Playback of a chunk failed; a `Stop` follows once unwound.
    Error(String),
}

/// Receives speech events. Called from the playback and stop-or-pause
/// threads with no queue lock held; must not block.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: SpeechEvent);
}

impl EventReporter for UnboundedSender<SpeechEvent> {
    fn report(&self, event: SpeechEvent) {
        if let Err(e) = self.send(event) {
            tracing::debug!(event = ?e.0, "Event receiver dropped");
        }
    }
}

/// Cancels the synthesis engine. Called during a stop or pause unwind; the
/// engine must stop producing audio promptly afterwards.
pub trait SynthCanceller: Send + Sync {
    fn cancel(&self);
}

impl<F> SynthCanceller for F
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        self();
    }
}
