//! Sound file decoding for sound icons.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rodio::Source;

use crate::error::AudioError;
use crate::track::OwnedTrack;

/// Decode a WAV or Ogg Vorbis file into 16-bit interleaved samples.
pub fn decode_file(path: &Path) -> Result<OwnedTrack, AudioError> {
    let file = File::open(path)?;
    let decoder = rodio::Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<i16> = decoder.collect();
    tracing::debug!(path = %path.display(), channels, sample_rate, samples = samples.len(), "Decoded sound file");

    let track = OwnedTrack::s16(channels, sample_rate, samples);
    track.format.validate()?;
    Ok(track)
}
