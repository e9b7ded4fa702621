// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! TOML configuration for operator construction and calibration runs.

use std::collections::hash_map::DefaultHasher;
use std::env::VarError;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::models::{FnoConfig, RnoConfig};

/// Environment variable overriding [`NeuralOpConfig::seed`].
pub const SEED_ENV: &str = "ST_NEURALOP_SEED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Fractions of grid points allowed outside the band.
    pub alphas: Vec<f64>,
    /// Failure probabilities across functions.
    pub deltas: Vec<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            alphas: vec![0.02, 0.05, 0.1],
            deltas: vec![0.02, 0.05, 0.1],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralOpConfig {
    /// Base seed; component seeds derive from it via [`NeuralOpConfig::seed_for`].
    pub seed: u64,
    pub fno: FnoConfig,
    pub rno: RnoConfig,
    pub calibration: CalibrationConfig,
}

impl Default for NeuralOpConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            fno: FnoConfig::default(),
            rno: RnoConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl NeuralOpConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(ConfigError::Toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `ST_NEURALOP_SEED` when set.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(seed) = seed_override(std::env::var(SEED_ENV))? {
            self.seed = seed;
        }
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut levels = self.calibration.alphas.iter().chain(&self.calibration.deltas);
        if let Some(bad) = levels.find(|v| !(**v > 0.0 && **v < 1.0)) {
            return Err(ConfigError::Invalid(format!(
                "calibration level {bad} must lie in (0, 1)"
            )));
        }
        if self.fno.n_modes.is_empty() || self.rno.n_modes.is_empty() {
            return Err(ConfigError::Invalid("n_modes must not be empty".into()));
        }
        Ok(())
    }

    /// Deterministic seed for a named component.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }

    pub fn rng_for<L: Hash>(&self, label: L) -> StdRng {
        StdRng::seed_from_u64(self.seed_for(label))
    }
}

fn seed_override(value: Result<String, VarError>) -> Result<Option<u64>, ConfigError> {
    match value {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::Invalid(format!("{SEED_ENV}={raw} is not an unsigned integer"))
        }),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(raw)) => Err(ConfigError::Invalid(format!(
            "{SEED_ENV}={raw:?} is not valid unicode"
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid TOML")]
    Toml(#[source] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
