//! Speak command handler.
//!
//! Runs a synthetic utterance through the speak queue: every "word" is a
//! short tone followed by a boundary mark, so stop and pause can be tried
//! against a real backend without a synthesizer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use spd_audio::AudioParams;
use spd_speak_queue::{
    BOUNDARY_MARK_PREFIX, SpeakQueueConfig, SpeakQueueError, SpeechEvent, SpeechModule, SynthesisEngine, Utterance,
};
use tokio::time::sleep;

use super::tone::sine;
use crate::commands::BackendArgs;

const WORD_MS: u64 = 200;
const GAP_MS: u64 = 60;

/// Engine producing one tone per word.
#[derive(Debug)]
pub struct ToneEngine {
    words: usize,
    cancelled: AtomicBool,
}

impl ToneEngine {
    pub const fn new(words: usize) -> Self {
        Self {
            words,
            cancelled: AtomicBool::new(false),
        }
    }
}

impl SynthesisEngine for ToneEngine {
    fn synthesize(&self, _text: &str, out: &mut Utterance<'_>) -> Result<(), SpeakQueueError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let rate = out.config().sample_rate;
        let gap = vec![0i16; (u64::from(rate) * GAP_MS / 1000) as usize];

        for i in 0..self.words {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SpeakQueueError::Stopped);
            }
            let freq = 330.0 + 55.0 * (i % 8) as f32;
            out.add_audio(&sine(freq, rate, Duration::from_millis(WORD_MS)))?;
            out.add_audio(&gap)?;
            out.add_mark(format!("{BOUNDARY_MARK_PREFIX}{i}"))?;
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Request timing for the speak command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interrupts {
    pub stop_after: Option<Duration>,
    pub pause_after: Option<Duration>,
}

pub async fn execute(args: &BackendArgs, params: AudioParams, words: usize, interrupts: Interrupts) -> Result<()> {
    let output = super::open_output(args, params)?;
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let module = Arc::new(SpeechModule::new(
        ToneEngine::new(words),
        SpeakQueueConfig::default(),
        Arc::new(output),
        tx,
    )?);

    let speaker = {
        let module = Arc::clone(&module);
        tokio::task::spawn_blocking(move || module.speak("synthetic utterance"))
    };

    if let Some(after) = interrupts.stop_after {
        let module = Arc::clone(&module);
        tokio::spawn(async move {
            sleep(after).await;
            tracing::info!("Requesting stop");
            module.stop();
        });
    }
    if let Some(after) = interrupts.pause_after {
        let module = Arc::clone(&module);
        tokio::spawn(async move {
            sleep(after).await;
            tracing::info!("Requesting pause");
            module.pause();
        });
    }

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event, SpeechEvent::End | SpeechEvent::Stop | SpeechEvent::Pause) {
            break;
        }
    }

    match speaker.await.context("synthesis task panicked")? {
        Ok(()) | Err(SpeakQueueError::Stopped) => {}
        Err(e) => return Err(e.into()),
    }
    module.close();
    Ok(())
}
