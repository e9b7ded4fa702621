// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pointwise nonlinearities used by the operator blocks.

use crate::Field;

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const KAPPA: f32 = 0.044715;
const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

/// Tanh approximation of GELU.
pub fn gelu(value: f32) -> f32 {
    let cubic = value * value * value;
    let inner = SQRT_2_OVER_PI * (value + KAPPA * cubic);
    0.5 * value * (1.0 + inner.tanh())
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Scaled exponential linear unit.
pub fn selu(value: f32) -> f32 {
    if value > 0.0 {
        SELU_SCALE * value
    } else {
        SELU_SCALE * SELU_ALPHA * (value.exp() - 1.0)
    }
}

pub fn gelu_field(field: &Field) -> Field {
    field.map(gelu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn activations_match_reference_points() {
        assert_abs_diff_eq!(gelu(0.0), 0.0);
        assert_abs_diff_eq!(gelu(1.0), 0.841_192, epsilon = 1e-4);
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert_abs_diff_eq!(selu(1.0), SELU_SCALE);
        assert_abs_diff_eq!(selu(-30.0), -SELU_SCALE * SELU_ALPHA, epsilon = 1e-5);
    }
}
