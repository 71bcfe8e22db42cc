//! Integration tests for `SpeechModule` driving a fake engine into a real
//! `AudioOutput` on the timed `null` backend.
//!
//! # What is tested
//!
//! - Engine output reaches the device and marks come back in order
//! - Stopping mid-synthesis cancels the engine and returns `Stopped`
//! - An engine failure is reported and leaves the module idle
//! - `close` shuts the module down

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use spd_audio::{AudioOutput, AudioParams, BackendRegistry};
use spd_speak_queue::{
    SpeakQueueConfig, SpeakQueueError, SpeakState, SpeechEvent, SpeechModule, SynthesisEngine, Utterance,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

// ── Fake engines ───────────────────────────────────────────────────

/// 20 ms of silence per word, with a boundary mark after each.
struct WordEngine;

impl SynthesisEngine for WordEngine {
    fn synthesize(&self, text: &str, out: &mut Utterance<'_>) -> Result<(), SpeakQueueError> {
        let chunk = vec![0i16; out.config().sample_rate as usize / 50];
        for (i, _word) in text.split_whitespace().enumerate() {
            out.add_audio(&chunk)?;
            out.add_mark(format!("__spd_{i}"))?;
        }
        Ok(())
    }
}

/// Synthesizes until cancelled or stopped.
#[derive(Default)]
struct EndlessEngine {
    cancelled: AtomicBool,
}

impl SynthesisEngine for EndlessEngine {
    fn synthesize(&self, _text: &str, out: &mut Utterance<'_>) -> Result<(), SpeakQueueError> {
        let chunk = vec![0i16; 2205];
        while !self.cancelled.load(Ordering::SeqCst) {
            out.add_audio(&chunk)?;
        }
        Err(SpeakQueueError::Stopped)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct FailingEngine;

impl SynthesisEngine for FailingEngine {
    fn synthesize(&self, _text: &str, out: &mut Utterance<'_>) -> Result<(), SpeakQueueError> {
        out.add_audio(&[0; 441])?;
        Err(SpeakQueueError::Synthesis("voice data missing".into()))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn module<E: SynthesisEngine>(engine: E) -> (SpeechModule<E>, UnboundedReceiver<SpeechEvent>) {
    let output = AudioOutput::open(BackendRegistry::with_defaults(), &["null"], AudioParams::default()).unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let module = SpeechModule::new(engine, SpeakQueueConfig::default(), Arc::new(output), tx).unwrap();
    (module, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<SpeechEvent>) -> SpeechEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn events_until(rx: &mut UnboundedReceiver<SpeechEvent>, last: &SpeechEvent) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event == *last;
        events.push(event);
        if done {
            return events;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn speak_reports_marks_in_order() {
    let (module, mut rx) = module(WordEngine);
    module.speak("one two three").unwrap();

    let events = events_until(&mut rx, &SpeechEvent::End).await;
    assert_eq!(
        events,
        vec![
            SpeechEvent::Begin,
            SpeechEvent::IndexMark("__spd_0".into()),
            SpeechEvent::IndexMark("__spd_1".into()),
            SpeechEvent::IndexMark("__spd_2".into()),
            SpeechEvent::End,
        ]
    );
    assert_eq!(module.state(), SpeakState::Idle);

    module.speak("again").unwrap();
    let events = events_until(&mut rx, &SpeechEvent::End).await;
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn stop_cancels_running_synthesis() {
    let (module, mut rx) = module(EndlessEngine::default());
    let module = Arc::new(module);

    let speaker = {
        let module = Arc::clone(&module);
        thread::spawn(move || module.speak("forever"))
    };
    assert_eq!(next_event(&mut rx).await, SpeechEvent::Begin);
    assert!(module.stop());

    let events = events_until(&mut rx, &SpeechEvent::Stop).await;
    assert_eq!(events, vec![SpeechEvent::Stop]);
    assert!(matches!(speaker.join().unwrap(), Err(SpeakQueueError::Stopped)));
    assert!(module.engine().cancelled.load(Ordering::SeqCst));
    assert_eq!(module.state(), SpeakState::Idle);
}

#[tokio::test]
async fn engine_failure_is_reported_and_module_recovers() {
    let (module, mut rx) = module(FailingEngine);
    let err = module.speak("anything").unwrap_err();
    assert!(matches!(err, SpeakQueueError::Synthesis(_)));

    let events = events_until(&mut rx, &SpeechEvent::Stop).await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SpeechEvent::Error(msg) if msg.contains("voice data missing")))
    );
    assert!(!events.contains(&SpeechEvent::End));

    // the queue is free for the next utterance
    assert!(matches!(module.speak("again"), Err(SpeakQueueError::Synthesis(_))));
}

#[tokio::test]
async fn close_shuts_down() {
    let (module, _rx) = module(WordEngine);
    module.close();
    module.close();
    assert!(matches!(module.speak("late"), Err(SpeakQueueError::Closed)));
}
