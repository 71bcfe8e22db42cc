//! PCM track model: sample formats, byte order, software volume.
//!
//! An [`AudioTrack`] borrows its samples for the duration of one backend
//! call. Backends that need to keep or transform the data (volume scaling,
//! byte serialization, period padding) make their own copy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Lowest accepted volume level.
pub const MIN_VOLUME: i32 = -100;

/// Highest accepted volume level.
pub const MAX_VOLUME: i32 = 100;

// ── Format ─────────────────────────────────────────────────────────

/// Bit depth of a PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleBits {
    /// Signed 8-bit.
    Eight,
    /// Signed 16-bit.
    Sixteen,
}

impl SampleBits {
    /// Bytes occupied by one sample.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }

    /// Parse a raw bit count.
    pub fn from_bits(bits: u16) -> Result<Self, AudioError> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            other => Err(AudioError::UnsupportedFormat(format!("{other} bits per sample"))),
        }
    }

    pub const fn bits(self) -> u16 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }
}

/// Byte order used when serializing 16-bit samples for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[cfg_attr(target_endian = "little", default)]
    Little,
    #[cfg_attr(target_endian = "big", default)]
    Big,
}

/// Stream parameters fixed between `begin` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackFormat {
    pub bits: SampleBits,
    pub channels: u16,
    pub sample_rate: u32,
}

impl TrackFormat {
    /// 16-bit interleaved PCM.
    pub const fn s16(channels: u16, sample_rate: u32) -> Self {
        Self {
            bits: SampleBits::Sixteen,
            channels,
            sample_rate,
        }
    }

    /// Bytes in one frame (one sample for every channel).
    pub const fn frame_bytes(&self) -> usize {
        self.bits.bytes() * self.channels as usize
    }

    /// Playback time of `frames` frames.
    pub fn duration_of(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Number of frames played in `duration`.
    pub fn frames_in(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * f64::from(self.sample_rate)).round() as usize
    }

    /// Reject formats no backend can play.
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat("zero sample rate".into()));
        }
        Ok(())
    }
}

// ── Samples ────────────────────────────────────────────────────────

/// Borrowed interleaved samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Samples<'a> {
    S8(&'a [i8]),
    S16(&'a [i16]),
}

impl Samples<'_> {
    /// Total sample count across all channels.
    pub const fn len(&self) -> usize {
        match self {
            Self::S8(s) => s.len(),
            Self::S16(s) => s.len(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn bits(&self) -> SampleBits {
        match self {
            Self::S8(_) => SampleBits::Eight,
            Self::S16(_) => SampleBits::Sixteen,
        }
    }
}

/// One chunk of PCM audio handed to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrack<'a> {
    pub format: TrackFormat,
    pub samples: Samples<'a>,
}

impl<'a> AudioTrack<'a> {
    /// Build a 16-bit track.
    pub const fn s16(channels: u16, sample_rate: u32, samples: &'a [i16]) -> Self {
        Self {
            format: TrackFormat::s16(channels, sample_rate),
            samples: Samples::S16(samples),
        }
    }

    /// Build an 8-bit track.
    pub const fn s8(channels: u16, sample_rate: u32, samples: &'a [i8]) -> Self {
        Self {
            format: TrackFormat {
                bits: SampleBits::Eight,
                channels,
                sample_rate,
            },
            samples: Samples::S8(samples),
        }
    }

    /// Total sample count across all channels.
    pub const fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Number of complete frames.
    pub const fn frames(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback time of this track.
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.frames())
    }

    /// Check the declared format against the sample buffer.
    pub fn validate(&self) -> Result<(), AudioError> {
        self.format.validate()?;
        if self.samples.bits() != self.format.bits {
            return Err(AudioError::UnsupportedFormat(format!(
                "declared {} bits but buffer holds {}-bit samples",
                self.format.bits.bits(),
                self.samples.bits().bits()
            )));
        }
        Ok(())
    }

    /// Serialize to device bytes in the given byte order.
    pub fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        match self.samples {
            Samples::S8(s) => s.iter().map(|&v| v.to_ne_bytes()[0]).collect(),
            Samples::S16(s) => {
                let mut out = Vec::with_capacity(s.len() * 2);
                for &v in s {
                    let bytes = match order {
                        ByteOrder::Little => v.to_le_bytes(),
                        ByteOrder::Big => v.to_be_bytes(),
                    };
                    out.extend_from_slice(&bytes);
                }
                out
            }
        }
    }

    /// Samples widened to `f32` in [-1.0, 1.0].
    pub fn to_f32(&self) -> Vec<f32> {
        match self.samples {
            Samples::S8(s) => s.iter().map(|&v| f32::from(v) / 128.0).collect(),
            Samples::S16(s) => s.iter().map(|&v| f32::from(v) / 32768.0).collect(),
        }
    }

    /// Copy of this track with software volume applied.
    pub fn scaled(&self, volume: i32) -> OwnedTrack {
        let gain = volume_gain(volume);
        let data = match self.samples {
            Samples::S8(s) => OwnedSamples::S8(s.iter().map(|&v| scale_i8(v, gain)).collect()),
            Samples::S16(s) => {
                OwnedSamples::S16(s.iter().map(|&v| scale_i16(v, gain)).collect())
            }
        };
        OwnedTrack {
            format: self.format,
            data,
        }
    }

    /// Copy the samples into an owned track.
    pub fn to_owned_track(&self) -> OwnedTrack {
        let data = match self.samples {
            Samples::S8(s) => OwnedSamples::S8(s.to_vec()),
            Samples::S16(s) => OwnedSamples::S16(s.to_vec()),
        };
        OwnedTrack {
            format: self.format,
            data,
        }
    }
}

// ── Owned tracks ───────────────────────────────────────────────────

/// Owned sample storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedSamples {
    S8(Vec<i8>),
    S16(Vec<i16>),
}

/// A track that owns its samples (decoded sound files, scaled copies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTrack {
    pub format: TrackFormat,
    pub data: OwnedSamples,
}

impl OwnedTrack {
    /// 16-bit owned track.
    pub const fn s16(channels: u16, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            format: TrackFormat::s16(channels, sample_rate),
            data: OwnedSamples::S16(samples),
        }
    }

    /// Borrow as an [`AudioTrack`].
    pub fn as_track(&self) -> AudioTrack<'_> {
        let samples = match &self.data {
            OwnedSamples::S8(s) => Samples::S8(s),
            OwnedSamples::S16(s) => Samples::S16(s),
        };
        AudioTrack {
            format: self.format,
            samples,
        }
    }
}

// ── Volume ─────────────────────────────────────────────────────────

/// Clamp a requested volume into [`MIN_VOLUME`, `MAX_VOLUME`].
pub fn clamp_volume(volume: i32) -> i32 {
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

/// Linear gain for a volume level: `(volume + 100) / 200`.
pub fn volume_gain(volume: i32) -> f32 {
    (clamp_volume(volume) + 100) as f32 / 200.0
}

fn scale_i16(sample: i16, gain: f32) -> i16 {
    (f32::from(sample) * gain)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn scale_i8(sample: i8, gain: f32) -> i8 {
    (f32::from(sample) * gain)
        .round()
        .clamp(f32::from(i8::MIN), f32::from(i8::MAX)) as i8
}

// ── Padding ────────────────────────────────────────────────────────

/// Append silence so that `bytes` holds a whole number of periods.
///
/// Signed PCM silence is all-zero bytes in either byte order.
pub fn pad_to_period(bytes: &mut Vec<u8>, period_bytes: usize) {
    if period_bytes == 0 {
        return;
    }
    let rem = bytes.len() % period_bytes;
    if rem != 0 {
        bytes.resize(bytes.len() + (period_bytes - rem), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_maps_volume_range_to_unit_interval() {
        assert!((volume_gain(-100) - 0.0).abs() < f32::EPSILON);
        assert!((volume_gain(0) - 0.5).abs() < f32::EPSILON);
        assert!((volume_gain(100) - 1.0).abs() < f32::EPSILON);
        // out of range requests are clamped
        assert!((volume_gain(250) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn scaled_copy_halves_at_zero_volume() {
        let samples = [1000i16, -1000, 0, 32767];
        let track = AudioTrack::s16(1, 16_000, &samples);
        let scaled = track.scaled(0);
        assert_eq!(scaled.data, OwnedSamples::S16(vec![500, -500, 0, 16384]));
        // original untouched
        assert_eq!(samples, [1000, -1000, 0, 32767]);
    }

    #[test]
    fn full_volume_is_byte_identical() {
        let samples = [i16::MIN, -1, 0, 1, i16::MAX];
        let track = AudioTrack::s16(1, 8_000, &samples);
        assert_eq!(track.scaled(100), track.to_owned_track());
    }

    #[test]
    fn scaling_never_wraps() {
        assert_eq!(scale_i16(i16::MAX, 1.0), i16::MAX);
        assert_eq!(scale_i16(i16::MIN, 1.0), i16::MIN);
        assert_eq!(scale_i16(i16::MAX, 1.5), i16::MAX);
        assert_eq!(scale_i8(i8::MIN, 2.0), i8::MIN);
    }

    #[test]
    fn frames_count_across_channels() {
        let samples = [0i16; 10];
        let track = AudioTrack::s16(2, 44_100, &samples);
        assert_eq!(track.num_samples(), 10);
        assert_eq!(track.frames(), 5);
    }

    #[test]
    fn byte_order_controls_serialization() {
        let samples = [0x0102i16];
        let track = AudioTrack::s16(1, 8_000, &samples);
        assert_eq!(track.to_bytes(ByteOrder::Little), vec![0x02, 0x01]);
        assert_eq!(track.to_bytes(ByteOrder::Big), vec![0x01, 0x02]);
    }

    #[test]
    fn padding_fills_last_period_with_silence() {
        let mut bytes = vec![7u8; 10];
        pad_to_period(&mut bytes, 4);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[10..], &[0, 0]);

        let mut exact = vec![7u8; 8];
        pad_to_period(&mut exact, 4);
        assert_eq!(exact.len(), 8);
    }

    #[test]
    fn mismatched_declared_bits_rejected() {
        let samples = [0i8; 4];
        let mut track = AudioTrack::s8(1, 8_000, &samples);
        track.format.bits = SampleBits::Sixteen;
        assert!(matches!(track.validate(), Err(AudioError::UnsupportedFormat(_))));
    }

    #[test]
    fn duration_follows_rate() {
        let samples = [0i16; 16_000];
        let track = AudioTrack::s16(1, 16_000, &samples);
        assert_eq!(track.duration(), Duration::from_secs(1));
    }
}
