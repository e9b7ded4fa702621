// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{FieldError, FieldResult};

pub mod fno;
pub mod rno;
pub mod uqno;

pub use fno::{Fno, FnoConfig};
pub use rno::{Rno, RnoConfig, RnoHiddenStates, RnoPhase};
pub use uqno::Uqno;

/// Expands a per-axis setting given as one shared value or one value per
/// spatial axis.
pub(crate) fn per_axis_setting(
    model: &str,
    setting: &str,
    values: &[f32],
    n_dims: usize,
) -> FieldResult<Vec<f32>> {
    match values.len() {
        1 => Ok(vec![values[0]; n_dims]),
        n if n == n_dims => Ok(values.to_vec()),
        n => Err(FieldError::InvalidConfiguration(format!(
            "{model}: {setting} has {n} entries, expected 1 or {n_dims}"
        ))),
    }
}
