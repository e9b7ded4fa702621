// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Two-level conformal calibration of UQNO uncertainty bands.
//!
//! A band scaled by the calibrated factor covers at least `1 − α` of the
//! grid points of a new function with probability at least `1 − δ`. The
//! factor is an order statistic of order statistics: per calibration
//! function the `domain_idx`-th largest pointwise ratio
//! `|residual| / uncertainty`, then the `function_idx`-th largest of those.

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::processor::UqnoDataProcessor;
use crate::data::Sample;
use crate::models::Uqno;
use crate::{Field, FieldError, FieldResult};

/// Indices and tolerances derived for one `(α, δ)` pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantilePlan {
    pub alpha: f64,
    pub delta: f64,
    /// Smallest admissible `α`: `sqrt(−ln δ / (2 n_gridpoints))`.
    pub lower_bound: f64,
    /// Intermediate tolerance `t = lb + (α − lb)/3`.
    pub tolerance: f64,
    /// 1-indexed rank, from the top, taken within each function.
    pub domain_idx: usize,
    /// 1-indexed rank, from the top, taken across functions.
    pub function_idx: usize,
}

impl QuantilePlan {
    pub fn new(alpha: f64, delta: f64, n_samples: usize, n_gridpoints: usize) -> FieldResult<Self> {
        for (name, value) in [("alpha", alpha), ("delta", delta)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(FieldError::InvalidArgument(format!(
                    "{name} must lie in (0, 1), got {value}"
                )));
            }
        }
        if n_samples == 0 || n_gridpoints == 0 {
            return Err(FieldError::InvalidArgument(format!(
                "calibration needs samples and grid points, got {n_samples} x {n_gridpoints}"
            )));
        }

        let grid = n_gridpoints as f64;
        let lower_bound = (-delta.ln() / (2.0 * grid)).sqrt();
        if alpha < lower_bound {
            return Err(FieldError::InvalidConfiguration(format!(
                "alpha {alpha} is below the attainable bound {lower_bound:.6} for delta {delta} on {n_gridpoints} points"
            )));
        }
        let tolerance = lower_bound + (alpha - lower_bound) / 3.0;
        info!(alpha, delta, t = tolerance, lb = lower_bound, "calibration tolerance");

        let domain_idx = ((alpha - tolerance) * grid).ceil();
        if domain_idx < 1.0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "alpha {alpha} leaves no room above the bound {lower_bound:.6}"
            )));
        }
        let domain_idx = domain_idx as usize;
        info!(domain_idx, n_gridpoints, "domain index (k-th largest)");

        let tail = (-2.0 * grid * tolerance * tolerance).exp();
        let function_idx = ((n_samples as f64 + 1.0) * (delta - tail)).ceil();
        if function_idx < 1.0 || function_idx > n_samples as f64 {
            return Err(FieldError::InvalidConfiguration(format!(
                "{n_samples} calibration functions cannot certify delta {delta} at alpha {alpha} (rank {function_idx})"
            )));
        }
        let function_idx = function_idx as usize;
        info!(function_idx, n_samples, "function index (k-th largest)");

        Ok(Self {
            alpha,
            delta,
            lower_bound,
            tolerance,
            domain_idx,
            function_idx,
        })
    }
}

/// Returns `(domain_idx, function_idx)` for the nested quantile search.
pub fn get_coeff_quantile_idx(
    alpha: f64,
    delta: f64,
    n_samples: usize,
    n_gridpoints: usize,
) -> FieldResult<(usize, usize)> {
    let plan = QuantilePlan::new(alpha, delta, n_samples, n_gridpoints)?;
    Ok((plan.domain_idx, plan.function_idx))
}

fn kth_largest(values: &[f32], k: usize) -> f32 {
    let mut scratch = values.to_vec();
    let idx = k - 1;
    scratch.select_nth_unstable_by(idx, |a, b| b.total_cmp(a));
    scratch[idx]
}

/// Pointwise `|residual| / uncertainty` for every calibration function,
/// one flattened row per function.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRatios {
    rows: Vec<Vec<f32>>,
    n_gridpoints: usize,
}

impl CalibrationRatios {
    /// Builds the ratio set from `(residual, uncertainty)` batches.
    ///
    /// Every batch entry counts as one function. A zero uncertainty is a
    /// [`FieldError::NumericDegenerate`] rather than an infinite ratio.
    pub fn from_pairs(pairs: &[(Field, Field)]) -> FieldResult<Self> {
        let batches = pairs
            .par_iter()
            .map(|(residual, uncertainty)| {
                if residual.shape() != uncertainty.shape() {
                    return Err(FieldError::shape(uncertainty.shape(), residual.shape()));
                }
                if uncertainty.as_array().iter().any(|u| *u == 0.0) {
                    return Err(FieldError::NumericDegenerate {
                        label: "calibration ratio",
                        detail: "predicted uncertainty is zero".into(),
                    });
                }
                let ratio = residual.zip_with(uncertainty, |r, u| r.abs() / u)?;
                let rows = ratio.batch_rows()?;
                Ok(rows.outer_iter().map(|row| row.to_vec()).collect::<Vec<_>>())
            })
            .collect::<FieldResult<Vec<_>>>()?;

        let rows: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        let n_gridpoints = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|row| row.len() != n_gridpoints) {
            return Err(FieldError::ShapeMismatch {
                expected: vec![n_gridpoints],
                got: vec![row.len()],
            });
        }
        Ok(Self { rows, n_gridpoints })
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn n_gridpoints(&self) -> usize {
        self.n_gridpoints
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// Per-function summaries: the `domain_idx`-th largest ratio of each row.
    pub fn pointwise_quantiles(&self, domain_idx: usize) -> FieldResult<Vec<f32>> {
        if domain_idx == 0 || domain_idx > self.n_gridpoints {
            return Err(FieldError::InvalidConfiguration(format!(
                "rank {domain_idx} outside 1..={}",
                self.n_gridpoints
            )));
        }
        Ok(self
            .rows
            .par_iter()
            .map(|row| kth_largest(row, domain_idx))
            .collect())
    }

    /// Scale factor for `(α, δ)`; recomputing with other levels reuses the same rows.
    pub fn scale_factor(&self, alpha: f64, delta: f64) -> FieldResult<f32> {
        let plan = QuantilePlan::new(alpha, delta, self.n_samples(), self.n_gridpoints)?;
        let summaries = self.pointwise_quantiles(plan.domain_idx)?;
        Ok(kth_largest(&summaries, plan.function_idx).abs())
    }
}

/// Runs the calibration set through `model` without any previous scale
/// factor and gathers the ratio set.
pub fn collect_calibration_ratios<I>(
    processor: &mut UqnoDataProcessor,
    model: &Uqno,
    samples: I,
) -> FieldResult<CalibrationRatios>
where
    I: IntoIterator<Item = Sample>,
{
    processor.eval();
    let mut pairs = Vec::new();
    for sample in samples {
        let (uncertainty, sample) = processor.forward_unscaled(model, sample)?;
        let residual = sample
            .y
            .ok_or_else(|| FieldError::InvalidArgument("calibration sample lost its target".into()))?;
        pairs.push((residual, uncertainty));
    }
    if pairs.is_empty() {
        return Err(FieldError::InvalidArgument("calibration set is empty".into()));
    }
    CalibrationRatios::from_pairs(&pairs)
}

/// Derives the scale factor for `(α, δ)` and installs it on `processor`.
pub fn calibrate(
    processor: &mut UqnoDataProcessor,
    ratios: &CalibrationRatios,
    alpha: f64,
    delta: f64,
) -> FieldResult<f32> {
    let factor = ratios.scale_factor(alpha, delta)?;
    info!(alpha, delta, factor, "uncertainty scale factor");
    processor.set_scale_factor(factor)?;
    Ok(factor)
}

/// Quality of calibrated bands on a test set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Mean over functions of the mean `|uncertainty|` across the grid.
    pub mean_interval_width: f32,
    /// Fraction of functions with at least `1 − α` of points inside the band.
    pub coverage_fraction: f32,
    pub instances: usize,
}

/// Whether one function's band covers `target` of its points, and its mean width.
fn row_coverage(
    errors: ArrayView1<'_, f32>,
    band: ArrayView1<'_, f32>,
    target: f64,
) -> FieldResult<(bool, f32)> {
    if band.is_empty() {
        return Err(FieldError::InvalidArgument(
            "coverage needs at least one grid point per function".into(),
        ));
    }
    let inside = errors
        .iter()
        .zip(band.iter())
        .filter(|(e, u)| e.abs() < u.abs())
        .count();
    let width = band.iter().map(|u| u.abs()).sum::<f32>() / band.len() as f32;
    Ok((inside as f64 / band.len() as f64 >= target, width))
}

/// Evaluates the processor's current bands against `samples`.
///
/// A point is covered when `|residual| < |uncertainty|`.
pub fn eval_coverage_bandwidth<I>(
    processor: &mut UqnoDataProcessor,
    model: &Uqno,
    samples: I,
    alpha: f64,
) -> FieldResult<CoverageReport>
where
    I: IntoIterator<Item = Sample>,
{
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(FieldError::InvalidArgument(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )));
    }
    processor.eval();
    let target = 1.0 - alpha;
    let mut widths = Vec::new();
    let mut covered = 0usize;
    for sample in samples {
        let (uncertainty, sample) = processor.forward(model, sample)?;
        let residual = sample.y()?;
        if residual.shape() != uncertainty.shape() {
            return Err(FieldError::shape(uncertainty.shape(), residual.shape()));
        }
        let errors = residual.batch_rows()?;
        let bands = uncertainty.batch_rows()?;
        for (err_row, band_row) in errors.outer_iter().zip(bands.outer_iter()) {
            let (hit, width) = row_coverage(err_row, band_row, target)?;
            covered += usize::from(hit);
            widths.push(width);
        }
    }
    if widths.is_empty() {
        return Err(FieldError::InvalidArgument("coverage test set is empty".into()));
    }
    let instances = widths.len();
    let report = CoverageReport {
        mean_interval_width: widths.iter().sum::<f32>() / instances as f32,
        coverage_fraction: covered as f32 / instances as f32,
        instances,
    };
    info!(
        alpha,
        coverage = report.coverage_fraction,
        mean_width = report.mean_interval_width,
        instances,
        "coverage of calibrated bands"
    );
    Ok(report)
}

/// One row of a calibration sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub alpha: f64,
    pub delta: f64,
    pub scale_factor: f32,
    pub report: CoverageReport,
}

/// Calibrates and evaluates every `(α, δ)` combination in turn.
///
/// The processor keeps the factor of the last combination.
pub fn calibration_sweep(
    processor: &mut UqnoDataProcessor,
    model: &Uqno,
    ratios: &CalibrationRatios,
    test_samples: &[Sample],
    alphas: &[f64],
    deltas: &[f64],
) -> FieldResult<Vec<SweepRecord>> {
    let mut records = Vec::with_capacity(alphas.len() * deltas.len());
    for &alpha in alphas {
        for &delta in deltas {
            let scale_factor = calibrate(processor, ratios, alpha, delta)?;
            let report =
                eval_coverage_bandwidth(processor, model, test_samples.iter().cloned(), alpha)?;
            records.push(SweepRecord {
                alpha,
                delta,
                scale_factor,
                report,
            });
        }
    }
    Ok(records)
}
