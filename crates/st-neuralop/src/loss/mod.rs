// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

mod lp_loss;
mod pointwise_quantile;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Field, FieldError, FieldResult};

pub use lp_loss::LpLoss;
pub use pointwise_quantile::PointwiseQuantileLoss;

/// Scalar losses over `(batch, …)` fields.
pub trait Loss {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    fn forward(&self, prediction: &Field, target: &Field) -> FieldResult<f32>;
}

/// How per-sample losses are folded over the batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    #[default]
    Sum,
    Mean,
}

impl Reduction {
    pub(crate) fn fold(self, per_sample: &[f32]) -> f32 {
        let total: f32 = per_sample.iter().sum();
        match self {
            Reduction::Sum => total,
            Reduction::Mean => total / per_sample.len().max(1) as f32,
        }
    }
}

impl FromStr for Reduction {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Reduction::Sum),
            "mean" => Ok(Reduction::Mean),
            other => Err(FieldError::InvalidArgument(format!(
                "unknown reduction `{other}`, expected `sum` or `mean`"
            ))),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
        })
    }
}

fn check_pair(prediction: &Field, target: &Field) -> FieldResult<()> {
    if prediction.shape() != target.shape() {
        return Err(FieldError::shape(target.shape(), prediction.shape()));
    }
    Ok(())
}
