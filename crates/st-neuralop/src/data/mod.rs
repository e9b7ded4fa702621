// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod embedding;
pub mod normalizer;
pub mod processor;

pub use embedding::GridEmbedding;
pub use normalizer::{Normalizer, UnitGaussianNormalizer, DEFAULT_EPS};
pub use processor::{DataProcessor, DefaultDataProcessor, Sample};
