//! Backend registry: name to open function.

use std::collections::BTreeMap;

use crate::backend::timed::TimedBackend;
use crate::backend::{AudioBackend, OpenFn};
use crate::error::AudioError;
use crate::params::AudioParams;

/// Table of openable backends.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, OpenFn>,
}

impl BackendRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend compiled into this build.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("null", TimedBackend::open_null);
        registry.register("fifo", TimedBackend::open_fifo);
        #[cfg(unix)]
        {
            use crate::backend::pipe;
            registry.register("pipe", pipe::open_pipe);
            registry.register("alsa", pipe::open_alsa);
            registry.register("pulse", pipe::open_pulse);
            registry.register("pipewire", pipe::open_pipewire);
        }
        #[cfg(feature = "cpal")]
        registry.register("cpal", crate::backend::cpal_ring::CpalRingBackend::open);
        #[cfg(feature = "rodio")]
        registry.register("rodio", crate::backend::rodio_play::RodioBackend::open);
        registry
    }

    /// Add or replace a backend.
    pub fn register(&mut self, name: &'static str, open: OpenFn) {
        if self.backends.insert(name, open).is_some() {
            tracing::debug!(backend = name, "Replaced registered backend");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.backends.keys().copied()
    }

    /// Open one backend by name.
    pub fn open(&self, name: &str, params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        let open = self
            .backends
            .get(name)
            .ok_or_else(|| AudioError::UnknownBackend(name.to_string()))?;
        open(params)
    }

    /// Open the first backend in `names` that succeeds.
    ///
    /// Configuration failures are logged and the next name is tried; the
    /// last error is returned if none opens.
    pub fn open_first(&self, names: &[&str], params: &AudioParams) -> Result<Box<dyn AudioBackend>, AudioError> {
        let mut last = AudioError::unavailable("any", "no backend names given");
        for name in names {
            match self.open(name, params) {
                Ok(backend) => return Ok(backend),
                Err(e) => {
                    tracing::warn!(backend = name, error = %e, "Audio backend failed to open, trying next");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
