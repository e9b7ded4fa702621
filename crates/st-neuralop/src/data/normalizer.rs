// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::fmt;

use ndarray::{ArrayD, Axis};
use tracing::debug;

use crate::{Field, FieldError, FieldResult};

/// Default floor added to the standard deviation before dividing.
pub const DEFAULT_EPS: f32 = 1e-6;

/// Invertible per-point transform applied around a model.
pub trait Normalizer: fmt::Debug + Send + Sync {
    fn encode(&self, field: &Field) -> FieldResult<Field>;

    fn decode(&self, field: &Field) -> FieldResult<Field>;
}

/// Pointwise Gaussian normalisation `(x − μ) / (σ + ε)`.
///
/// Statistics keep singleton axes where they were reduced so they broadcast
/// against full batches.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitGaussianNormalizer {
    mean: ArrayD<f32>,
    std: ArrayD<f32>,
    eps: f32,
    count: usize,
}

impl UnitGaussianNormalizer {
    /// Unbiased statistics of a materialised batch over `reduce_axes`.
    pub fn from_batch(batch: &Field, reduce_axes: &[usize], eps: f32) -> FieldResult<Self> {
        Self::check_eps(eps)?;
        if reduce_axes.is_empty() {
            return Err(FieldError::InvalidArgument(
                "normalizer needs at least one reduction axis".into(),
            ));
        }
        let mut axes = reduce_axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        for &axis in &axes {
            if axis >= batch.ndim() {
                return Err(FieldError::AxisOutOfRange {
                    axis,
                    rank: batch.ndim(),
                });
            }
        }
        let count: usize = axes.iter().map(|&axis| batch.shape()[axis]).product();
        if count < 2 {
            return Err(FieldError::NumericDegenerate {
                label: "normalizer",
                detail: format!("unbiased std needs two samples, got {count}"),
            });
        }

        let data = batch.as_array();
        let sum_keep = |array: &ArrayD<f32>| {
            axes.iter().fold(array.clone(), |acc, &axis| {
                acc.sum_axis(Axis(axis)).insert_axis(Axis(axis))
            })
        };
        let mean = sum_keep(data) / count as f32;
        let centred = data - &mean;
        let variance = sum_keep(&centred.mapv(|v| v * v)) / (count - 1) as f32;
        let std = variance.mapv(f32::sqrt);
        debug!(count, axes = ?axes, stat_shape = ?mean.shape(), "fitted gaussian normalizer");
        Ok(Self {
            mean,
            std,
            eps,
            count,
        })
    }

    /// One-pass Welford accumulation over per-sample fields of equal shape.
    pub fn from_stream<I>(samples: I, eps: f32) -> FieldResult<Self>
    where
        I: IntoIterator<Item = Field>,
    {
        Self::check_eps(eps)?;
        let mut samples = samples.into_iter();
        let first = samples.next().ok_or_else(|| FieldError::NumericDegenerate {
            label: "normalizer",
            detail: "empty sample stream".into(),
        })?;
        let mut mean = first.into_array();
        let mut m2 = ArrayD::<f32>::zeros(mean.raw_dim());
        let mut count = 1usize;
        for sample in samples {
            if sample.shape() != mean.shape() {
                return Err(FieldError::shape(mean.shape(), sample.shape()));
            }
            count += 1;
            let x = sample.into_array();
            let delta = &x - &mean;
            mean.scaled_add(1.0 / count as f32, &delta);
            let delta_after = &x - &mean;
            m2 += &(delta * delta_after);
        }
        if count < 2 {
            return Err(FieldError::NumericDegenerate {
                label: "normalizer",
                detail: "unbiased std needs two samples, got 1".into(),
            });
        }
        let std = m2.mapv(|v| (v / (count - 1) as f32).max(0.0).sqrt());
        debug!(count, stat_shape = ?mean.shape(), "streamed gaussian normalizer");
        Ok(Self {
            mean,
            std,
            eps,
            count,
        })
    }

    fn check_eps(eps: f32) -> FieldResult<()> {
        if !eps.is_finite() || eps < 0.0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "normalizer epsilon {eps} must be finite and non-negative"
            )));
        }
        Ok(())
    }

    pub fn mean(&self) -> &ArrayD<f32> {
        &self.mean
    }

    pub fn std(&self) -> &ArrayD<f32> {
        &self.std
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// Number of samples folded into the statistics.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Normalizer for UnitGaussianNormalizer {
    fn encode(&self, field: &Field) -> FieldResult<Field> {
        let eps = self.eps;
        field
            .zip_broadcast(&self.mean, |x, mean| x - mean)?
            .zip_broadcast(&self.std, |x, std| x / (std + eps))
    }

    fn decode(&self, field: &Field) -> FieldResult<Field> {
        let eps = self.eps;
        field
            .zip_broadcast(&self.std, |x, std| x * (std + eps))?
            .zip_broadcast(&self.mean, |x, mean| x + mean)
    }
}
