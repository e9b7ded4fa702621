// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;

use super::activation::{selu, sigmoid};
use super::fno_block::FnoBlocks;
use super::spectral_conv::Factorization;
use crate::module::{uniform_array, Module, Parameter};
use crate::{FftNorm, Field, FieldError, FieldResult};

/// GRU update whose matrix products are single-layer Fourier blocks.
///
/// `z = σ(W_z x + U_z h + b_z)`, `r = σ(W_r x + U_r h + b_r)`,
/// `ĥ = selu(W_h x + U_h (r ⊙ h) + b_h)`, `h' = z ⊙ h + (1 − z) ⊙ ĥ`.
#[derive(Debug)]
pub struct RnoCell {
    width: usize,
    w_z: FnoBlocks,
    u_z: FnoBlocks,
    w_r: FnoBlocks,
    u_r: FnoBlocks,
    w_h: FnoBlocks,
    u_h: FnoBlocks,
    bias_z: Parameter,
    bias_r: Parameter,
    bias_h: Parameter,
}

impl RnoCell {
    pub fn new(
        name: impl Into<String>,
        width: usize,
        n_modes: Vec<usize>,
        factorization: Factorization,
        fft_norm: FftNorm,
        rng: &mut StdRng,
    ) -> FieldResult<Self> {
        let name = name.into();
        let block = |label: &str, rng: &mut StdRng| {
            FnoBlocks::new(
                format!("{name}::{label}"),
                width,
                width,
                n_modes.clone(),
                1,
                factorization,
                fft_norm,
                rng,
            )
        };
        let w_z = block("w_z", rng)?;
        let u_z = block("u_z", rng)?;
        let w_r = block("w_r", rng)?;
        let u_r = block("u_r", rng)?;
        let w_h = block("w_h", rng)?;
        let u_h = block("u_h", rng)?;

        let mut bias_shape = vec![1, width];
        bias_shape.extend(std::iter::repeat(1).take(n_modes.len()));
        let bound = 1.0 / (width as f32).sqrt();
        let mut bias = |label: &str| {
            Parameter::real(format!("{name}::{label}"), uniform_array(rng, &bias_shape, bound))
        };
        let bias_z = bias("bias_z");
        let bias_r = bias("bias_r");
        let bias_h = bias("bias_h");
        Ok(Self {
            width,
            w_z,
            u_z,
            w_r,
            u_r,
            w_h,
            u_h,
            bias_z,
            bias_r,
            bias_h,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn gate(
        &self,
        input_map: &FnoBlocks,
        hidden_map: &FnoBlocks,
        bias: &Parameter,
        x: &Field,
        h: &Field,
    ) -> FieldResult<Field> {
        let mut pre = input_map.forward(x)?;
        pre.add_assign(&hidden_map.forward(h)?)?;
        pre.zip_broadcast(bias.real_value()?, |a, b| a + b)
    }

    /// One recurrent update of the hidden field `h` with input `x`, both `(batch, width, …)`.
    pub fn step(&self, x: &Field, h: &Field) -> FieldResult<Field> {
        if x.shape() != h.shape() {
            return Err(FieldError::shape(x.shape(), h.shape()));
        }
        let update = self.gate(&self.w_z, &self.u_z, &self.bias_z, x, h)?.map(sigmoid);
        let reset = self.gate(&self.w_r, &self.u_r, &self.bias_r, x, h)?.map(sigmoid);
        let candidate = self
            .gate(&self.w_h, &self.u_h, &self.bias_h, x, &reset.mul(h)?)?
            .map(selu);
        let keep = update.mul(h)?;
        let refresh = update.map(|z| 1.0 - z).mul(&candidate)?;
        keep.add(&refresh)
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        for block in [&self.w_z, &self.u_z, &self.w_r, &self.u_r, &self.w_h, &self.u_h] {
            block.visit_parameters(visitor)?;
        }
        visitor(&self.bias_z)?;
        visitor(&self.bias_r)?;
        visitor(&self.bias_h)
    }
}

/// Scans an [`RnoCell`] over the time axis of `(batch, time, width, …)` fields.
#[derive(Debug)]
pub struct RnoLayer {
    cell: RnoCell,
    return_sequences: bool,
}

impl RnoLayer {
    pub fn new(cell: RnoCell, return_sequences: bool) -> Self {
        Self {
            cell,
            return_sequences,
        }
    }

    pub fn returns_sequences(&self) -> bool {
        self.return_sequences
    }

    /// Runs the scan from `hidden` (zeros when absent).
    ///
    /// Returns the stacked states `(batch, time, width, …)` when the layer
    /// returns sequences, otherwise the final state `(batch, width, …)`.
    pub fn forward(&self, x: &Field, hidden: Option<&Field>) -> FieldResult<Field> {
        let steps = x.dim(1)?;
        if steps == 0 {
            return Err(FieldError::InvalidArgument(
                "recurrent layer received an empty time axis".into(),
            ));
        }
        let mut state_shape = vec![x.shape()[0]];
        state_shape.extend_from_slice(&x.shape()[2..]);
        let mut h = match hidden {
            Some(h) if h.shape() == state_shape.as_slice() => h.clone(),
            Some(h) => return Err(FieldError::shape(&state_shape, h.shape())),
            None => Field::zeros(&state_shape),
        };
        let mut sequence = Vec::with_capacity(if self.return_sequences { steps } else { 0 });
        for t in 0..steps {
            let x_t = x.index_axis(1, t)?;
            h = self.cell.step(&x_t, &h)?;
            if self.return_sequences {
                sequence.push(h.clone());
            }
        }
        if self.return_sequences {
            Field::stack(&sequence, 1)
        } else {
            Ok(h)
        }
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        self.cell.visit_parameters(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn cell(width: usize) -> RnoCell {
        let mut rng = StdRng::seed_from_u64(21);
        RnoCell::new("cell", width, vec![3], Factorization::Dense, FftNorm::Forward, &mut rng).unwrap()
    }

    #[test]
    fn sequence_layer_stacks_every_state() {
        let layer = RnoLayer::new(cell(2), true);
        let x = Field::from_shape_fn(&[2, 4, 2, 8], |idx| (idx[1] as f32 * 0.1) + idx[3] as f32 * 0.01);
        let out = layer.forward(&x, None).unwrap();
        assert_eq!(out.shape(), &[2, 4, 2, 8]);

        let last = RnoLayer::new(cell(2), false).forward(&x, None).unwrap();
        assert_eq!(last.shape(), &[2, 2, 8]);
        assert_eq!(out.index_axis(1, 3).unwrap(), last);
    }

    #[test]
    fn hidden_state_threads_through_split_sequences() {
        let layer = RnoLayer::new(cell(2), false);
        let x = Field::from_shape_fn(&[1, 4, 2, 8], |idx| ((idx[1] + idx[3]) as f32).cos());
        let full = layer.forward(&x, None).unwrap();
        let first = layer.forward(&x.narrow(1, 0, 2).unwrap(), None).unwrap();
        let second = layer.forward(&x.narrow(1, 2, 2).unwrap(), Some(&first)).unwrap();
        assert_eq!(full, second);
    }

    #[test]
    fn mismatched_hidden_state_is_rejected() {
        let layer = RnoLayer::new(cell(2), false);
        let x = Field::zeros(&[1, 3, 2, 8]);
        let wrong = Field::zeros(&[1, 2, 6]);
        assert!(matches!(
            layer.forward(&x, Some(&wrong)),
            Err(FieldError::ShapeMismatch { .. })
        ));
    }
}
