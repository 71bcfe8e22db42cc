//! Play command handler.

use std::path::Path;

use anyhow::{Context, Result};
use spd_audio::{AudioParams, FeedOutcome};

use crate::commands::BackendArgs;

pub fn execute(args: &BackendArgs, params: AudioParams, file: &Path) -> Result<()> {
    let output = super::open_output(args, params)?;
    let outcome = output
        .play_file(file)
        .with_context(|| format!("playing {}", file.display()))?;
    if outcome == FeedOutcome::Stopped {
        tracing::info!("Playback stopped");
    }
    output.close()?;
    Ok(())
}
