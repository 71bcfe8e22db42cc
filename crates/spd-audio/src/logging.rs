//! Process-wide log filter that can be changed at runtime.
//!
//! Backends and modules receive speech-dispatcher debug levels (0 to 5)
//! through `set_loglevel`. Those map onto the reloadable filter installed
//! by [`init`].

use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Map a speech-dispatcher level onto a tracing level.
pub const fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install a stderr subscriber with a reloadable filter.
///
/// `RUST_LOG` takes precedence over `default`. Returns `false` if a global
/// subscriber was already installed.
pub fn init(default: LevelFilter) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER.set(handle);
    }
    installed
}

/// Replace the filter with a single level. Returns `false` if [`init`]
/// did not install the subscriber.
pub fn set_loglevel(level: u8) -> bool {
    let Some(handle) = FILTER.get() else {
        return false;
    };
    match handle.reload(EnvFilter::default().add_directive(level_filter(level).into())) {
        Ok(()) => {
            tracing::info!(level, "Log level changed");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to change log level");
            false
        }
    }
}
