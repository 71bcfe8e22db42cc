//! Root CLI structure and global options.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use spd_audio::AudioParams;

use crate::commands::Commands;

/// Play audio through speech-dispatcher output backends.
#[derive(Parser)]
#[command(name = "spd-audio")]
#[command(about = "Exercise speech-dispatcher audio backends and the speak queue")]
#[command(version)]
pub struct Cli {
    /// Backend parameters as JSON (device, server, buffering, ...)
    #[arg(long, global = true, env = "SPD_AUDIO_PARAMS")]
    pub params: Option<PathBuf>,

    /// More log output (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// speech-dispatcher log level: warnings by default, each `-v` one step up.
    pub fn log_level(&self) -> u8 {
        2u8.saturating_add(self.verbose)
    }

    /// Backend parameters from `--params`, or the defaults.
    pub fn audio_params(&self) -> Result<AudioParams> {
        match &self.params {
            Some(path) => load_params(path),
            None => Ok(AudioParams::default()),
        }
    }
}

fn load_params(path: &Path) -> Result<AudioParams> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
