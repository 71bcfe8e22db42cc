//! CLI entry point.

use std::time::Duration;

use clap::Parser;

use spd_cli::handlers::{self, speak::Interrupts};
use spd_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    spd_audio::logging::init(spd_audio::logging::level_filter(cli.log_level()));
    let params = cli.audio_params()?;

    match &cli.command {
        Commands::List => handlers::list::execute(&params),
        Commands::Tone {
            backend,
            freq,
            ms,
            rate,
            chunk_ms,
        } => handlers::tone::execute(backend, params, *freq, *ms, *rate, *chunk_ms),
        Commands::Play { backend, file } => handlers::play::execute(backend, params, file),
        Commands::Speak {
            backend,
            marks,
            stop_after_ms,
            pause_after_ms,
        } => {
            let interrupts = Interrupts {
                stop_after: stop_after_ms.map(Duration::from_millis),
                pause_after: pause_after_ms.map(Duration::from_millis),
            };
            handlers::speak::execute(backend, params, *marks, interrupts).await
        }
    }
}
