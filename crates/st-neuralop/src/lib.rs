// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Neural operators for SpiralTorch.
//!
//! Fourier neural operators ([`Fno`]), the recurrent variant ([`Rno`]) with
//! caller-owned hidden state, and the UQNO pipeline: a solution operator
//! paired with a residual operator ([`Uqno`]), the data processor that turns
//! their outputs into residual/uncertainty pairs ([`UqnoDataProcessor`]) and
//! the two-level conformal calibration that scales the uncertainty into a
//! band with a coverage guarantee ([`uq::conformal`]).

pub mod config;
pub mod data;
pub mod layers;
pub mod loss;
pub mod models;
pub mod module;
pub mod telemetry;
pub mod uq;

pub use st_field::{
    fftn, frequency_index, ifftn, ifftn_real, resample, resample_to, retained_frequencies,
    round_half_even, scaled_size, segment_csr, segment_csr_by_name, spectrum_2d, to_complex,
    FftNorm, Field, FieldError, FieldResult, SegmentReduce, Spectrum,
};

pub use config::{CalibrationConfig, ConfigError, NeuralOpConfig};
pub use data::{
    DataProcessor, DefaultDataProcessor, GridEmbedding, Normalizer, Sample, UnitGaussianNormalizer,
};
pub use layers::{DomainPadding, Factorization, PaddingMode, SpectralConv};
pub use loss::{Loss, LpLoss, PointwiseQuantileLoss, Reduction};
pub use models::{Fno, FnoConfig, Rno, RnoConfig, RnoHiddenStates, Uqno};
pub use module::{count_params, Module, Parameter};
pub use uq::{
    calibrate, collect_calibration_ratios, eval_coverage_bandwidth, get_coeff_quantile_idx,
    CalibrationRatios, CoverageReport, UqnoDataProcessor,
};
