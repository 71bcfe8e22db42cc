#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use serde_json as _;
#[cfg(test)]
use tempfile as _;

#[cfg(any(feature = "cpal", feature = "rodio"))]
mod audio_thread;
pub mod backend;
#[cfg(feature = "rodio")]
pub mod decode;
pub mod error;
pub mod logging;
pub mod output;
pub mod params;
pub mod registry;
pub mod stop;
pub mod track;

// Re-export key types for convenience
pub use backend::{AudioBackend, Capabilities, FeedOutcome, PlaybackMode};
pub use error::AudioError;
pub use output::AudioOutput;
pub use params::{AudioParams, BufferingParams};
pub use registry::BackendRegistry;
pub use stop::StopSignal;
pub use track::{AudioTrack, ByteOrder, OwnedTrack, SampleBits, Samples, TrackFormat};
