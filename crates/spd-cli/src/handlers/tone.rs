//! Tone command handler.

use std::f32::consts::TAU;
use std::time::Duration;

use anyhow::Result;
use spd_audio::{AudioParams, AudioTrack, FeedOutcome};

use crate::commands::BackendArgs;

/// Mono sine samples at three quarters of full scale.
pub fn sine(freq: f32, rate: u32, duration: Duration) -> Vec<i16> {
    let count = (duration.as_secs_f64() * f64::from(rate)).round() as usize;
    let amplitude = f32::from(i16::MAX) * 0.75;
    (0..count)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (amplitude * (TAU * freq * t).sin()) as i16
        })
        .collect()
}

pub fn execute(args: &BackendArgs, params: AudioParams, freq: f32, ms: u64, rate: u32, chunk_ms: u64) -> Result<()> {
    let output = super::open_output(args, params)?;
    let samples = sine(freq, rate, Duration::from_millis(ms));
    let chunk = ((u64::from(rate) * chunk_ms.max(1)) / 1000).max(1) as usize;

    tracing::info!(freq, ms, rate, chunk, "Playing tone");
    for piece in samples.chunks(chunk) {
        if output.output(&AudioTrack::s16(1, rate, piece))? == FeedOutcome::Stopped {
            break;
        }
    }
    output.end_stream()?;
    output.close()?;
    Ok(())
}
