//! Command handlers.

pub mod list;
pub mod play;
pub mod speak;
pub mod tone;

use anyhow::{Context, Result};
use spd_audio::{AudioOutput, AudioParams, BackendRegistry};

use crate::commands::BackendArgs;

/// Open the first working backend of `args` and apply its volume.
pub fn open_output(args: &BackendArgs, params: AudioParams) -> Result<AudioOutput> {
    let names: Vec<&str> = args.backend.iter().map(String::as_str).collect();
    let output = AudioOutput::open(BackendRegistry::with_defaults(), &names, params)
        .with_context(|| format!("no usable backend among {}", args.backend.join(", ")))?;
    output.set_volume(args.volume)?;
    if let Some(name) = output.backend_name() {
        eprintln!("Using backend: {name}");
    }
    Ok(output)
}
