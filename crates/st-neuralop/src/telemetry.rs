// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Crate-specific filter directive, consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "ST_NEURALOP_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

fn filter_from_env(default_directive: &str) -> Result<EnvFilter, InitError> {
    match std::env::var(LOG_ENV) {
        Ok(raw) if !raw.trim().is_empty() => {
            EnvFilter::try_new(raw.trim()).map_err(|err| InitError::Filter(err.to_string()))
        }
        Ok(_) | Err(std::env::VarError::NotPresent) => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive))),
        Err(err) => Err(InitError::Env(err)),
    }
}

/// Installs the global subscriber with an `info` default.
pub fn init_tracing() -> Result<(), InitError> {
    init_tracing_with("info")
}

/// Installs the global subscriber; `default_directive` applies when neither
/// [`LOG_ENV`] nor `RUST_LOG` is set. ANSI colours only on terminals.
pub fn init_tracing_with(default_directive: &str) -> Result<(), InitError> {
    if INITIALISED.get().is_some() {
        return Err(InitError::AlreadyInitialised);
    }
    let filter = filter_from_env(default_directive)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stdout().is_terminal());
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InitError::Subscriber(err.to_string()))?;
    // only a subscriber installed here marks the process as initialised
    INITIALISED
        .set(())
        .map_err(|_| InitError::AlreadyInitialised)
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to read {LOG_ENV}: {0}")]
    Env(std::env::VarError),
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("another global subscriber is installed: {0}")]
    Subscriber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_refused() {
        match init_tracing_with("st_neuralop=debug") {
            Ok(()) => assert!(matches!(init_tracing(), Err(InitError::AlreadyInitialised))),
            // a foreign subscriber keeps being reported as the cause
            Err(InitError::Subscriber(_)) => {
                assert!(matches!(init_tracing(), Err(InitError::Subscriber(_))))
            }
            Err(other) => panic!("unexpected initialisation failure: {other}"),
        }
    }
}
