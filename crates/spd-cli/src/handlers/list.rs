//! List command handler.

use anyhow::Result;
use spd_audio::{AudioParams, BackendRegistry};

/// Try to open every registered backend and print the outcome.
pub fn execute(params: &AudioParams) -> Result<()> {
    let registry = BackendRegistry::with_defaults();
    println!("{:<10} {:<14} {}", "BACKEND", "MODE", "STATUS");
    for name in registry.names() {
        match registry.open(name, params) {
            Ok(backend) => {
                let caps = backend.capabilities();
                let volume = if caps.hardware_volume { "hardware volume" } else { "software volume" };
                println!("{name:<10} {:<14} ok, {volume}", caps.mode.to_string());
                if let Err(e) = backend.close() {
                    tracing::debug!(backend = name, error = %e, "Closing listed backend failed");
                }
            }
            Err(e) => println!("{name:<10} {:<14} {e}", "-"),
        }
    }
    Ok(())
}
