// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;

use super::activation::gelu;
use super::linear::ChannelLinear;
use super::spectral_conv::{Factorization, SpectralConv};
use crate::module::{Module, Parameter};
use crate::{resample_to, FftNorm, Field, FieldError, FieldResult};

/// Stack of Fourier layers: `x ← σ(K_l x + W_l x)` with a GELU between layers.
#[derive(Debug)]
pub struct FnoBlocks {
    convs: Vec<SpectralConv>,
    skips: Vec<ChannelLinear>,
}

impl FnoBlocks {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        n_modes: Vec<usize>,
        n_layers: usize,
        factorization: Factorization,
        fft_norm: FftNorm,
        rng: &mut StdRng,
    ) -> FieldResult<Self> {
        let name = name.into();
        if n_layers == 0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: at least one Fourier layer is required"
            )));
        }
        let mut convs = Vec::with_capacity(n_layers);
        let mut skips = Vec::with_capacity(n_layers);
        for layer in 0..n_layers {
            let width_in = if layer == 0 { in_channels } else { out_channels };
            convs.push(SpectralConv::new(
                format!("{name}::conv{layer}"),
                width_in,
                out_channels,
                n_modes.clone(),
                factorization,
                fft_norm,
                rng,
            )?);
            skips.push(ChannelLinear::new(
                format!("{name}::skip{layer}"),
                width_in,
                out_channels,
                false,
                rng,
            )?);
        }
        Ok(Self { convs, skips })
    }

    pub fn n_layers(&self) -> usize {
        self.convs.len()
    }

    /// Sets a per-axis resolution change on one layer.
    pub fn set_output_scaling(&mut self, layer: usize, factors: Vec<f32>) -> FieldResult<()> {
        let conv = self.convs.get_mut(layer).ok_or_else(|| {
            FieldError::InvalidArgument(format!("layer {layer} out of range"))
        })?;
        conv.set_output_scaling(Some(factors))
    }

    /// Applies the same incremental mode restriction to every layer.
    pub fn set_incremental_n_modes(&mut self, modes: Option<Vec<usize>>) -> FieldResult<()> {
        for conv in &mut self.convs {
            conv.set_incremental_n_modes(modes.clone())?;
        }
        Ok(())
    }

    /// Runs a single layer.
    pub fn forward_layer(&self, input: &Field, layer: usize) -> FieldResult<Field> {
        let conv = self.convs.get(layer).ok_or_else(|| {
            FieldError::InvalidArgument(format!("layer {layer} out of range"))
        })?;
        let mut skip = self.skips[layer].forward_axis(input, 1)?;
        if conv.output_scaling().is_some() {
            let resolution = &input.shape()[2..];
            let target = conv.output_shape(resolution);
            let axes: Vec<usize> = (2..input.ndim()).collect();
            skip = resample_to(&skip, &target, &axes)?;
        }
        let mut x = conv.forward(input)?;
        x.add_assign(&skip)?;
        if layer + 1 < self.convs.len() {
            x = x.map(gelu);
        }
        Ok(x)
    }
}

impl Module for FnoBlocks {
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        let mut x = input.clone();
        for layer in 0..self.convs.len() {
            x = self.forward_layer(&x, layer)?;
        }
        Ok(x)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        for (conv, skip) in self.convs.iter().zip(&self.skips) {
            conv.visit_parameters(visitor)?;
            skip.visit_parameters(visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn blocks(n_layers: usize) -> FnoBlocks {
        let mut rng = StdRng::seed_from_u64(5);
        FnoBlocks::new("fno", 2, 4, vec![3, 3], n_layers, Factorization::Dense, FftNorm::Forward, &mut rng)
            .unwrap()
    }

    #[test]
    fn blocks_map_channels_and_keep_resolution() {
        let layers = blocks(3);
        let out = layers.forward(&Field::full(&[2, 2, 8, 8], 0.3)).unwrap();
        assert_eq!(out.shape(), &[2, 4, 8, 8]);
        assert!(out.is_finite());
    }

    #[test]
    fn rescaled_layer_resamples_skip_branch() {
        let mut layers = blocks(2);
        layers.set_output_scaling(0, vec![2.0, 0.5]).unwrap();
        let out = layers.forward(&Field::full(&[1, 2, 8, 8], 1.0)).unwrap();
        assert_eq!(out.shape(), &[1, 4, 16, 4]);
    }

    #[test]
    fn zero_layers_is_a_configuration_error() {
        let mut rng = StdRng::seed_from_u64(5);
        let err = FnoBlocks::new("fno", 2, 2, vec![2], 0, Factorization::Dense, FftNorm::Forward, &mut rng)
            .unwrap_err();
        assert!(matches!(err, FieldError::InvalidConfiguration(_)));
        let mut layers = blocks(1);
        assert!(layers.set_incremental_n_modes(Some(vec![9, 9])).is_err());
    }
}
