//! Subcommand definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Backends tried in order when `--backend` is not given.
pub const DEFAULT_BACKENDS: &str = "pulse,pipewire,alsa,cpal,null";

/// Backend choice shared by the playing commands.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Backend name, or a comma-separated preference list
    #[arg(short, long, value_delimiter = ',', default_value = DEFAULT_BACKENDS)]
    pub backend: Vec<String>,

    /// Volume from -100 to 100
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub volume: i32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered backends and whether they open
    List,

    /// Play a sine tone
    Tone {
        #[command(flatten)]
        backend: BackendArgs,

        /// Frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        freq: f32,

        /// Duration in milliseconds
        #[arg(long, default_value_t = 500)]
        ms: u64,

        /// Sample rate in Hz
        #[arg(long, default_value_t = 22_050)]
        rate: u32,

        /// Play in chunks of this many milliseconds through the streaming calls
        #[arg(long, default_value_t = 100)]
        chunk_ms: u64,
    },

    /// Decode and play a sound file
    Play {
        #[command(flatten)]
        backend: BackendArgs,

        /// WAV or Ogg Vorbis file
        file: PathBuf,
    },

    /// Run a synthetic utterance through the speak queue and print its events
    Speak {
        #[command(flatten)]
        backend: BackendArgs,

        /// Number of words; each is a short tone followed by a boundary mark
        #[arg(long, default_value_t = 5)]
        marks: usize,

        /// Request a stop after this many milliseconds
        #[arg(long)]
        stop_after_ms: Option<u64>,

        /// Request a pause after this many milliseconds
        #[arg(long)]
        pause_after_ms: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use crate::parser::Cli;
    use crate::commands::Commands;
    use clap::Parser;

    #[test]
    fn test_backend_list_splits() {
        let cli = Cli::parse_from(["spd-audio", "tone", "--backend", "alsa,null", "--volume", "-20"]);
        let Commands::Tone { backend, freq, .. } = cli.command else {
            panic!("expected tone");
        };
        assert_eq!(backend.backend, ["alsa", "null"]);
        assert_eq!(backend.volume, -20);
        assert!((freq - 440.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_speak_options() {
        let cli = Cli::parse_from(["spd-audio", "speak", "--marks", "3", "--pause-after-ms", "250"]);
        let Commands::Speak { marks, stop_after_ms, pause_after_ms, .. } = cli.command else {
            panic!("expected speak");
        };
        assert_eq!(marks, 3);
        assert_eq!(stop_after_ms, None);
        assert_eq!(pause_after_ms, Some(250));
    }
}
