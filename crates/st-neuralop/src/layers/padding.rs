// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Domain padding for spectral operators.
//!
//! Spectral convolutions assume periodic fields; padding the domain with zeros
//! before the spectral blocks and cropping afterwards removes the wrap-around
//! artefacts on non-periodic problems. Pads apply to every axis after the batch
//! and channel axes, sized as a fraction of the observed resolution.

use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{round_half_even, scaled_size, Field, FieldError, FieldResult};

/// Where the zero padding is placed on each axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaddingMode {
    /// `p` entries at both ends.
    Symmetric,
    /// `p` entries at the trailing end only.
    #[default]
    OneSided,
}

impl FromStr for PaddingMode {
    type Err = FieldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "symmetric" => Ok(PaddingMode::Symmetric),
            "one-sided" => Ok(PaddingMode::OneSided),
            other => Err(FieldError::InvalidArgument(format!(
                "padding mode must be 'symmetric' or 'one-sided', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaddingMode::Symmetric => f.write_str("symmetric"),
            PaddingMode::OneSided => f.write_str("one-sided"),
        }
    }
}

/// Pad amounts derived from one observed input resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct PaddingDescriptor {
    /// Resolution (axes after batch/channel) the descriptor was computed for.
    pub input_shape: Vec<usize>,
    /// Pixel pad per axis, as applied by `pad`.
    pub pads: Vec<usize>,
    /// Resolution after padding.
    pub padded_shape: Vec<usize>,
    /// Pad per axis after the output scaling factor.
    pub scaled_pads: Vec<usize>,
    /// Padded resolution after the output scaling factor.
    pub scaled_shape: Vec<usize>,
}

/// Pads fields before spectral processing and crops them back afterwards.
#[derive(Debug)]
pub struct DomainPadding {
    fractions: Vec<f32>,
    mode: PaddingMode,
    output_scaling: Option<Vec<f32>>,
    cache: RefCell<Option<PaddingDescriptor>>,
}

impl DomainPadding {
    /// `fractions` has one entry per padded axis, or a single entry shared by all.
    pub fn new(fractions: Vec<f32>, mode: PaddingMode) -> FieldResult<Self> {
        if fractions.is_empty() {
            return Err(FieldError::InvalidConfiguration(
                "domain padding needs at least one fraction".into(),
            ));
        }
        if let Some(bad) = fractions.iter().find(|f| !f.is_finite() || **f < 0.0) {
            return Err(FieldError::InvalidConfiguration(format!(
                "padding fraction {bad} must be finite and non-negative"
            )));
        }
        Ok(Self {
            fractions,
            mode,
            output_scaling: None,
            cache: RefCell::new(None),
        })
    }

    /// Declares the resolution change applied between `pad` and `unpad`.
    pub fn with_output_scaling(mut self, factors: Vec<f32>) -> FieldResult<Self> {
        if let Some(bad) = factors.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return Err(FieldError::InvalidConfiguration(format!(
                "output scaling factor {bad} must be positive"
            )));
        }
        self.output_scaling = Some(factors);
        self.cache.replace(None);
        Ok(self)
    }

    pub fn mode(&self) -> PaddingMode {
        self.mode
    }

    pub fn fractions(&self) -> &[f32] {
        &self.fractions
    }

    /// Currently cached descriptor, if `pad` has run.
    pub fn descriptor(&self) -> Option<PaddingDescriptor> {
        self.cache.borrow().clone()
    }

    fn per_axis(values: &[f32], axes: usize, what: &str) -> FieldResult<Vec<f32>> {
        match values.len() {
            1 => Ok(vec![values[0]; axes]),
            n if n == axes => Ok(values.to_vec()),
            n => {
                debug!(what, supplied = n, axes, "padding arity mismatch");
                Err(FieldError::ShapeMismatch {
                    expected: vec![axes],
                    got: vec![n],
                })
            }
        }
    }

    fn describe(&self, resolution: &[usize]) -> FieldResult<PaddingDescriptor> {
        let fractions = Self::per_axis(&self.fractions, resolution.len(), "fractions")?;
        let scaling = match &self.output_scaling {
            Some(factors) => Self::per_axis(factors, resolution.len(), "output scaling")?,
            None => vec![1.0; resolution.len()],
        };
        let growth = match self.mode {
            PaddingMode::Symmetric => 2,
            PaddingMode::OneSided => 1,
        };
        let mut descriptor = PaddingDescriptor {
            input_shape: resolution.to_vec(),
            pads: Vec::with_capacity(resolution.len()),
            padded_shape: Vec::with_capacity(resolution.len()),
            scaled_pads: Vec::with_capacity(resolution.len()),
            scaled_shape: Vec::with_capacity(resolution.len()),
        };
        for ((&size, &fraction), &scale) in resolution.iter().zip(&fractions).zip(&scaling) {
            let pad = round_half_even(fraction as f64 * size as f64);
            let padded = size + growth * pad;
            descriptor.pads.push(pad);
            descriptor.padded_shape.push(padded);
            descriptor
                .scaled_pads
                .push(round_half_even(pad as f64 * scale as f64));
            descriptor.scaled_shape.push(scaled_size(padded, scale));
        }
        Ok(descriptor)
    }

    /// Zero-pads every axis after batch and channel.
    ///
    /// The descriptor is cached per input resolution; a new resolution
    /// replaces the cached one.
    pub fn pad(&self, field: &Field) -> FieldResult<Field> {
        if field.ndim() < 3 {
            return Err(FieldError::InvalidArgument(format!(
                "domain padding expects (batch, channel, ...) fields, got rank {}",
                field.ndim()
            )));
        }
        let resolution = &field.shape()[2..];
        let stale = self
            .cache
            .borrow()
            .as_ref()
            .map_or(true, |cached| cached.input_shape != resolution);
        if stale {
            let descriptor = self.describe(resolution)?;
            debug!(
                input = ?descriptor.input_shape,
                pads = ?descriptor.pads,
                mode = %self.mode,
                "recomputed domain padding"
            );
            self.cache.replace(Some(descriptor));
        }
        let cache = self.cache.borrow();
        let descriptor = cache
            .as_ref()
            .ok_or_else(|| FieldError::InvalidConfiguration("padding cache is empty".into()))?;

        let mut padded = field.clone();
        for (offset, &pad) in descriptor.pads.iter().enumerate() {
            let axis = offset + 2;
            padded = match self.mode {
                PaddingMode::Symmetric => padded.pad_axis(axis, pad, pad)?,
                PaddingMode::OneSided => padded.pad_axis(axis, 0, pad)?,
            };
        }
        Ok(padded)
    }

    /// Crops a field produced from a padded input back to the unpadded domain.
    ///
    /// Accepts either the padded resolution or the padded resolution after the
    /// configured output scaling.
    pub fn unpad(&self, field: &Field) -> FieldResult<Field> {
        let cache = self.cache.borrow();
        let resolution = field.shape().get(2..).unwrap_or(&[]);
        let descriptor = cache
            .as_ref()
            .ok_or_else(|| FieldError::shape(&[], resolution))?;
        let pads = if resolution == descriptor.padded_shape.as_slice() {
            &descriptor.pads
        } else if resolution == descriptor.scaled_shape.as_slice() {
            &descriptor.scaled_pads
        } else {
            return Err(FieldError::shape(&descriptor.padded_shape, resolution));
        };

        let mut cropped = field.clone();
        for (offset, &pad) in pads.iter().enumerate() {
            let axis = offset + 2;
            let size = cropped.dim(axis)?;
            cropped = match self.mode {
                PaddingMode::Symmetric if size >= 2 * pad => {
                    cropped.narrow(axis, pad, size - 2 * pad)?
                }
                PaddingMode::OneSided if size >= pad => cropped.narrow(axis, 0, size - pad)?,
                _ => {
                    return Err(FieldError::shape(&descriptor.padded_shape, resolution));
                }
            };
        }
        Ok(cropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: &[usize]) -> Field {
        let mut counter = 0.0f32;
        Field::from_shape_fn(shape, |_| {
            counter += 1.0;
            counter
        })
    }

    #[test]
    fn one_sided_padding_grows_trailing_end() {
        let padding = DomainPadding::new(vec![0.1], PaddingMode::OneSided).unwrap();
        let field = ramp(&[2, 3, 10, 10]);
        let padded = padding.pad(&field).unwrap();
        assert_eq!(padded.shape(), &[2, 3, 11, 11]);
        assert_eq!(padded.as_array()[[0, 0, 10, 10]], 0.0);
        assert_eq!(padded.as_array()[[0, 0, 0, 0]], 1.0);
        let restored = padding.unpad(&padded).unwrap();
        assert_eq!(restored.shape(), &[2, 3, 10, 10]);
        assert_eq!(restored, field);
    }

    #[test]
    fn pad_unpad_roundtrip_in_one_two_and_three_dims() {
        for mode in [PaddingMode::Symmetric, PaddingMode::OneSided] {
            for shape in [vec![1, 2, 16], vec![2, 1, 8, 12], vec![1, 1, 6, 8, 10]] {
                let padding = DomainPadding::new(vec![0.25], mode).unwrap();
                let field = ramp(&shape);
                let padded = padding.pad(&field).unwrap();
                let growth = if mode == PaddingMode::Symmetric { 2 } else { 1 };
                for axis in 2..shape.len() {
                    let pad = round_half_even(0.25 * shape[axis] as f64);
                    assert_eq!(padded.shape()[axis], shape[axis] + growth * pad);
                }
                assert_eq!(padding.unpad(&padded).unwrap(), field);
            }
        }
    }

    #[test]
    fn new_resolution_replaces_cached_descriptor() {
        let padding = DomainPadding::new(vec![0.5, 0.0], PaddingMode::Symmetric).unwrap();
        padding.pad(&Field::zeros(&[1, 1, 4, 4])).unwrap();
        assert_eq!(padding.descriptor().unwrap().pads, vec![2, 0]);
        let padded = padding.pad(&Field::zeros(&[1, 1, 8, 4])).unwrap();
        assert_eq!(padded.shape(), &[1, 1, 16, 4]);
        let descriptor = padding.descriptor().unwrap();
        assert_eq!(descriptor.input_shape, vec![8, 4]);
        assert!(padding.unpad(&Field::zeros(&[1, 1, 8, 4])).is_err());
    }

    #[test]
    fn scaled_output_is_cropped_proportionally() {
        let padding = DomainPadding::new(vec![0.25], PaddingMode::OneSided)
            .unwrap()
            .with_output_scaling(vec![2.0])
            .unwrap();
        let field = Field::zeros(&[1, 1, 8]);
        let padded = padding.pad(&field).unwrap();
        assert_eq!(padded.shape(), &[1, 1, 10]);
        let upsampled = Field::zeros(&[1, 1, 20]);
        assert_eq!(padding.unpad(&upsampled).unwrap().shape(), &[1, 1, 16]);
        assert_eq!(padding.unpad(&padded).unwrap().shape(), &[1, 1, 8]);
    }

    #[test]
    fn unpad_rejects_unknown_resolution() {
        let padding = DomainPadding::new(vec![0.1], PaddingMode::OneSided).unwrap();
        let err = padding.unpad(&Field::zeros(&[1, 1, 11])).unwrap_err();
        assert!(matches!(err, FieldError::ShapeMismatch { .. }));
        padding.pad(&Field::zeros(&[1, 1, 10])).unwrap();
        let err = padding.unpad(&Field::zeros(&[1, 1, 12])).unwrap_err();
        assert!(matches!(err, FieldError::ShapeMismatch { .. }));
    }

    #[test]
    fn pad_amounts_round_ties_to_even() {
        // 0.25 · 10 = 2.5 rounds down, 0.25 · 14 = 3.5 rounds up
        let padding = DomainPadding::new(vec![0.25], PaddingMode::OneSided).unwrap();
        assert_eq!(padding.pad(&Field::zeros(&[1, 1, 10])).unwrap().shape(), &[1, 1, 12]);
        assert_eq!(padding.pad(&Field::zeros(&[1, 1, 14])).unwrap().shape(), &[1, 1, 18]);
        assert!("diagonal".parse::<PaddingMode>().is_err());
    }
}
