// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Field tensor primitives for SpiralTorch neural operators.
//!
//! The crate provides the dense [`Field`] container, multi-axis spectral
//! transforms with resolution-changing [`resample`], the CSR
//! [`segment_csr`] reducer and the error taxonomy shared by the
//! `st-neuralop` layers.

pub mod error;
pub mod field;
pub mod segment;
pub mod spectral;

pub use error::{FieldError, FieldResult};
pub use field::Field;
pub use segment::{segment_csr, segment_csr_by_name, SegmentReduce};
pub use spectral::{
    fftn, frequency_index, ifftn, ifftn_real, resample, resample_to, retained_frequencies,
    round_half_even, scaled_size, spectrum_2d, to_complex, FftNorm, Spectrum,
};
