//! Speak queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample format and limits of one speak queue.
///
/// Audio pushed by the engine is interleaved signed 16-bit at
/// `sample_rate` with `channels` channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakQueueConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Producers block while more than this many samples are queued.
    pub max_queue_samples: usize,
    /// How often the stop-or-pause thread repeats the device stop while
    /// the playback thread is still busy.
    pub stop_retry_ms: u64,
    /// How long `terminate` waits for the threads before detaching them.
    pub shutdown_grace_ms: u64,
}

impl Default for SpeakQueueConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            channels: 1,
            max_queue_samples: 22_050 * 20,
            stop_retry_ms: 5,
            shutdown_grace_ms: 250,
        }
    }
}

impl SpeakQueueConfig {
    /// Config for `sample_rate` with the queue sized to `seconds` of audio.
    pub fn with_rate(sample_rate: u32, seconds: u32) -> Self {
        Self {
            sample_rate,
            max_queue_samples: sample_rate as usize * seconds as usize,
            ..Self::default()
        }
    }

    pub const fn stop_retry(&self) -> Duration {
        Duration::from_millis(self.stop_retry_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_holds_twenty_seconds() {
        let config = SpeakQueueConfig::default();
        assert_eq!(config.max_queue_samples, 441_000);
        assert_eq!(config.stop_retry(), Duration::from_millis(5));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SpeakQueueConfig = serde_json::from_str(r#"{"sample_rate": 16000}"#).unwrap();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.shutdown_grace_ms, 250);
    }

    #[test]
    fn with_rate_sizes_queue() {
        let config = SpeakQueueConfig::with_rate(16_000, 2);
        assert_eq!(config.max_queue_samples, 32_000);
    }
}
