//! Playback queue entries.

use std::fmt;
use std::path::PathBuf;

/// Prefix of the marks speech-dispatcher inserts at sentence boundaries.
pub const BOUNDARY_MARK_PREFIX: &str = "__spd_";

/// An index mark with an explicit pause-boundary flag.
///
/// A pause only takes effect at a boundary mark, so user marks never cut
/// an utterance short.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexMark {
    pub name: String,
    pub boundary: bool,
}

impl IndexMark {
    /// A user mark: reported, never paused at.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            boundary: false,
        }
    }

    /// A sentence boundary a pause may stop at.
    pub fn boundary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            boundary: true,
        }
    }
}

/// Infers `boundary` from the [`BOUNDARY_MARK_PREFIX`] naming convention.
impl From<&str> for IndexMark {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<String> for IndexMark {
    fn from(name: String) -> Self {
        let boundary = name.starts_with(BOUNDARY_MARK_PREFIX);
        Self { name, boundary }
    }
}

impl fmt::Display for IndexMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One item of an utterance, consumed in push order by the playback thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// Interleaved 16-bit samples in the queue's format.
    Audio(Vec<i16>),
    IndexMark(IndexMark),
    SoundIcon(PathBuf),
    Begin,
    End,
}

impl QueueEntry {
    /// Samples this entry counts against the queue limit.
    pub fn samples(&self) -> usize {
        match self {
            Self::Audio(samples) => samples.len(),
            _ => 0,
        }
    }
}
