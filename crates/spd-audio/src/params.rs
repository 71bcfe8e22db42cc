//! Backend open parameters.
//!
//! These are forwarded untouched from the module configuration. Each backend
//! reads the fields it understands and ignores the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::track::{ByteOrder, TrackFormat};

/// Latency/throughput tuning for buffered backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingParams {
    /// Upper bound on buffered audio.
    pub max_length_ms: u32,
    /// Occupancy at which an overlapped feed returns to the caller.
    pub target_length_ms: u32,
    /// Audio buffered before the device starts consuming.
    pub pre_buffering_ms: u32,
    /// Smallest transfer the device is asked to accept.
    pub min_request_ms: u32,
}

impl Default for BufferingParams {
    fn default() -> Self {
        Self {
            max_length_ms: 1000,
            target_length_ms: 200,
            pre_buffering_ms: 50,
            min_request_ms: 20,
        }
    }
}

/// Parameters passed to a backend's open function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    /// Device path or name (`fifo` path, cpal output device name).
    pub device: Option<String>,
    /// Sound server address, passed to server-backed players.
    pub server: Option<String>,
    /// Player argv template for the `pipe` backend. `{rate}`, `{channels}`,
    /// `{format}` (`S16_LE`), `{bits}` and `{endian}` (`le`/`be`) are
    /// substituted when a stream begins.
    pub command: Option<Vec<String>>,
    /// Transfer granularity for period-aligned devices.
    pub period_frames: usize,
    /// Byte order of 16-bit samples written to byte-oriented devices.
    pub byte_order: ByteOrder,
    pub buffering: BufferingParams,
    /// Shortest stream the player is given; shorter utterances are padded.
    pub min_audio_length_ms: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            device: None,
            server: None,
            command: None,
            period_frames: 256,
            byte_order: ByteOrder::default(),
            buffering: BufferingParams::default(),
            min_audio_length_ms: 0,
        }
    }
}

impl AudioParams {
    /// Params for a named device.
    #[must_use]
    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::default()
        }
    }

    /// Minimum stream length, in frames, for the given format.
    pub fn min_audio_frames(&self, format: &TrackFormat) -> usize {
        format.frames_in(Duration::from_millis(u64::from(self.min_audio_length_ms)))
    }
}

/// Format token used in player argv templates (`S16_LE`, `S8`, ...).
pub(crate) fn format_token(format: &TrackFormat, order: ByteOrder) -> &'static str {
    use crate::track::SampleBits;
    match (format.bits, order) {
        (SampleBits::Eight, _) => "S8",
        (SampleBits::Sixteen, ByteOrder::Little) => "S16_LE",
        (SampleBits::Sixteen, ByteOrder::Big) => "S16_BE",
    }
}

/// Substitute stream placeholders in a player argv template.
pub(crate) fn expand_command(template: &[String], format: &TrackFormat, order: ByteOrder) -> Vec<String> {
    let rate = format.sample_rate.to_string();
    let channels = format.channels.to_string();
    let bits = format.bits.bits().to_string();
    let token = format_token(format, order);
    let endian = match order {
        ByteOrder::Little => "le",
        ByteOrder::Big => "be",
    };
    template
        .iter()
        .map(|arg| {
            arg.replace("{rate}", &rate)
                .replace("{channels}", &channels)
                .replace("{format}", token)
                .replace("{bits}", &bits)
                .replace("{endian}", endian)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let params: AudioParams =
            serde_json::from_str(r#"{"device": "/tmp/out.fifo", "buffering": {"target_length_ms": 80}}"#)
                .unwrap();
        assert_eq!(params.device.as_deref(), Some("/tmp/out.fifo"));
        assert_eq!(params.buffering.target_length_ms, 80);
        assert_eq!(params.buffering.max_length_ms, 1000);
        assert_eq!(params.period_frames, 256);
    }

    #[test]
    fn byte_order_parses_lowercase() {
        let params: AudioParams = serde_json::from_str(r#"{"byte_order": "big"}"#).unwrap();
        assert_eq!(params.byte_order, ByteOrder::Big);
    }

    #[test]
    fn command_template_expansion() {
        let template = vec![
            "aplay".to_string(),
            "-r{rate}".to_string(),
            "-c".to_string(),
            "{channels}".to_string(),
            "-f{format}".to_string(),
        ];
        let argv = expand_command(&template, &TrackFormat::s16(2, 22050), ByteOrder::Little);
        assert_eq!(argv, ["aplay", "-r22050", "-c", "2", "-fS16_LE"]);

        let pacat = vec!["--format=s{bits}{endian}".to_string()];
        let argv = expand_command(&pacat, &TrackFormat::s16(1, 8000), ByteOrder::Big);
        assert_eq!(argv, ["--format=s16be"]);
    }

    #[test]
    fn min_audio_frames_from_ms() {
        let params = AudioParams {
            min_audio_length_ms: 100,
            ..AudioParams::default()
        };
        assert_eq!(params.min_audio_frames(&TrackFormat::s16(1, 16_000)), 1600);
    }
}
