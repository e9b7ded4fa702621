// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::Axis;

use super::{check_pair, Loss, Reduction};
use crate::{Field, FieldError, FieldResult};

const SCALE_EPS: f32 = 1e-7;

/// Pinball loss training an uncertainty head to bound `|y|` pointwise.
///
/// With `q = 1 − α` and `d = |y| − pred`, each point contributes
/// `max(q·d, −(1 − q)·d)` divided by the batch maximum of `|y|` at that
/// point. Points are averaged per sample before the batch reduction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointwiseQuantileLoss {
    alpha: f32,
    reduction: Reduction,
}

impl PointwiseQuantileLoss {
    pub fn new(alpha: f32, reduction: Reduction) -> FieldResult<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(FieldError::InvalidConfiguration(format!(
                "quantile loss alpha must lie in (0, 1), got {alpha}"
            )));
        }
        Ok(Self { alpha, reduction })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn quantile(&self) -> f32 {
        1.0 - self.alpha
    }
}

impl Loss for PointwiseQuantileLoss {
    fn name(&self) -> &'static str {
        "pointwise_quantile"
    }

    fn forward(&self, prediction: &Field, target: &Field) -> FieldResult<f32> {
        check_pair(prediction, target)?;
        let quantile = self.quantile();
        let magnitude = target.as_array().mapv(f32::abs);
        let scale = magnitude.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, v| acc.max(*v)) + SCALE_EPS;
        let diff = &magnitude - prediction.as_array();
        let pointwise = diff.mapv(|d| (quantile * d).max(-(1.0 - quantile) * d)) / &scale;
        let rows = Field::from_array(pointwise).batch_rows()?;
        let per_sample: Vec<f32> = rows
            .outer_iter()
            .map(|row| row.sum() / row.len() as f32)
            .collect();
        Ok(self.reduction.fold(&per_sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn under_prediction_costs_more_at_high_quantiles() {
        let loss = PointwiseQuantileLoss::new(0.1, Reduction::Sum).unwrap();
        let target = Field::from_shape_vec(&[1, 2], vec![-2.0, 2.0]).unwrap();
        let under = Field::from_shape_vec(&[1, 2], vec![1.0, 1.0]).unwrap();
        let over = Field::from_shape_vec(&[1, 2], vec![3.0, 3.0]).unwrap();
        // d = 1: 0.9/2 per point; d = -1: 0.1/2 per point
        assert_abs_diff_eq!(loss.forward(&under, &target).unwrap(), 0.45, epsilon = 1e-5);
        assert_abs_diff_eq!(loss.forward(&over, &target).unwrap(), 0.05, epsilon = 1e-5);
    }

    #[test]
    fn batch_reduction_and_exact_bounds() {
        let target = Field::from_shape_vec(&[2, 1], vec![1.0, -4.0]).unwrap();
        let exact = Field::from_shape_vec(&[2, 1], vec![1.0, 4.0]).unwrap();
        let loss = PointwiseQuantileLoss::new(0.2, Reduction::Mean).unwrap();
        assert_abs_diff_eq!(loss.forward(&exact, &target).unwrap(), 0.0);
        let zeros = Field::zeros(&[2, 1]);
        // d = (1, 4) over the batch max 4, times q = 0.8: (0.2, 0.8), averaged
        assert_abs_diff_eq!(loss.forward(&zeros, &target).unwrap(), 0.5, epsilon = 1e-5);
        assert!(PointwiseQuantileLoss::new(1.0, Reduction::Sum).is_err());
    }
}
