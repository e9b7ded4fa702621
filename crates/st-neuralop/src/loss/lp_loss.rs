// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{check_pair, Loss, Reduction};
use crate::{Field, FieldError, FieldResult};

/// Per-sample `‖pred − y‖_p`, optionally divided by `‖y‖_p`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LpLoss {
    p: f32,
    relative: bool,
    reduction: Reduction,
}

impl LpLoss {
    pub fn new(p: f32, relative: bool, reduction: Reduction) -> FieldResult<Self> {
        if !p.is_finite() || p < 1.0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "Lp loss needs a finite p >= 1, got {p}"
            )));
        }
        Ok(Self {
            p,
            relative,
            reduction,
        })
    }

    /// Relative L2 error summed over the batch.
    pub fn relative_l2() -> Self {
        Self {
            p: 2.0,
            relative: true,
            reduction: Reduction::Sum,
        }
    }

    fn norm(&self, values: impl Iterator<Item = f32>) -> f32 {
        values
            .map(|v| v.abs().powf(self.p))
            .sum::<f32>()
            .powf(1.0 / self.p)
    }
}

impl Loss for LpLoss {
    fn name(&self) -> &'static str {
        if self.relative {
            "relative_lp"
        } else {
            "lp"
        }
    }

    fn forward(&self, prediction: &Field, target: &Field) -> FieldResult<f32> {
        check_pair(prediction, target)?;
        let pred_rows = prediction.batch_rows()?;
        let target_rows = target.batch_rows()?;
        let mut per_sample = Vec::with_capacity(pred_rows.nrows());
        for (pred, truth) in pred_rows.outer_iter().zip(target_rows.outer_iter()) {
            let diff = self.norm(pred.iter().zip(truth.iter()).map(|(a, b)| a - b));
            if self.relative {
                let scale = self.norm(truth.iter().copied());
                if scale == 0.0 {
                    return Err(FieldError::NumericDegenerate {
                        label: "relative_lp",
                        detail: "target has zero norm".into(),
                    });
                }
                per_sample.push(diff / scale);
            } else {
                per_sample.push(diff);
            }
        }
        Ok(self.reduction.fold(&per_sample))
    }
}
