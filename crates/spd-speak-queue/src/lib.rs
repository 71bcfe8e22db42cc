#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use serde_json as _;

pub mod config;
pub mod controller;
pub mod entry;
pub mod error;
pub mod events;
pub mod module;
pub mod queue;
pub mod sink;
pub mod state;

pub use config::SpeakQueueConfig;
pub use controller::SpeakQueue;
pub use entry::{BOUNDARY_MARK_PREFIX, IndexMark, QueueEntry};
pub use error::SpeakQueueError;
pub use events::{EventReporter, SpeechEvent, SynthCanceller};
pub use module::{SpeechModule, SynthesisEngine, Utterance};
pub use queue::{PlaybackQueue, Ticket};
pub use sink::PlaybackSink;
pub use state::{PauseState, SpeakState};
