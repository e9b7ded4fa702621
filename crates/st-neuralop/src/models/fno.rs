// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::layers::activation::gelu_field;
use super::per_axis_setting;
use crate::layers::{ChannelLinear, DomainPadding, Factorization, FnoBlocks, PaddingMode};
use crate::module::{Module, Parameter};
use crate::{FftNorm, Field, FieldError, FieldResult};

/// Hyper-parameters of a Fourier neural operator.
///
/// The spatial dimensionality is `n_modes.len()`; the factorization field
/// replaces per-variant model types (dense FNO, TFNO, CP-FNO).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FnoConfig {
    pub n_modes: Vec<usize>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub hidden_channels: usize,
    pub projection_channels: usize,
    pub n_layers: usize,
    pub factorization: Factorization,
    pub fft_norm: FftNorm,
    /// Fraction of each spatial axis to pad with zeros; `None` disables padding.
    pub domain_padding: Option<Vec<f32>>,
    pub domain_padding_mode: PaddingMode,
    /// Resolution factor of the last Fourier layer, shared or per spatial axis.
    pub output_scaling_factor: Option<Vec<f32>>,
}

impl Default for FnoConfig {
    fn default() -> Self {
        Self {
            n_modes: vec![16, 16],
            in_channels: 1,
            out_channels: 1,
            hidden_channels: 32,
            projection_channels: 64,
            n_layers: 4,
            factorization: Factorization::Dense,
            fft_norm: FftNorm::Forward,
            domain_padding: None,
            domain_padding_mode: PaddingMode::OneSided,
            output_scaling_factor: None,
        }
    }
}

/// Lifting, Fourier blocks and a two-layer projection over `(batch, channel, …)` fields.
#[derive(Debug)]
pub struct Fno {
    config: FnoConfig,
    lifting: ChannelLinear,
    blocks: FnoBlocks,
    projection_hidden: ChannelLinear,
    projection_out: ChannelLinear,
    padding: Option<DomainPadding>,
}

impl Fno {
    pub fn new(name: impl Into<String>, config: FnoConfig, rng: &mut StdRng) -> FieldResult<Self> {
        let name = name.into();
        let lifting = ChannelLinear::new(
            format!("{name}::lifting"),
            config.in_channels,
            config.hidden_channels,
            true,
            rng,
        )?;
        let n_dims = config.n_modes.len();
        let fractions = config
            .domain_padding
            .as_deref()
            .map(|fractions| per_axis_setting(&name, "domain_padding", fractions, n_dims))
            .transpose()?;
        let scaling = config
            .output_scaling_factor
            .as_deref()
            .map(|factors| per_axis_setting(&name, "output_scaling_factor", factors, n_dims))
            .transpose()?;
        let mut blocks = FnoBlocks::new(
            format!("{name}::blocks"),
            config.hidden_channels,
            config.hidden_channels,
            config.n_modes.clone(),
            config.n_layers,
            config.factorization,
            config.fft_norm,
            rng,
        )?;
        let projection_hidden = ChannelLinear::new(
            format!("{name}::projection::fc1"),
            config.hidden_channels,
            config.projection_channels,
            true,
            rng,
        )?;
        let projection_out = ChannelLinear::new(
            format!("{name}::projection::fc2"),
            config.projection_channels,
            config.out_channels,
            true,
            rng,
        )?;
        if let Some(factors) = &scaling {
            blocks.set_output_scaling(config.n_layers - 1, factors.clone())?;
        }
        let padding = match fractions {
            Some(fractions) if fractions.iter().any(|f| *f > 0.0) => {
                let padding = DomainPadding::new(fractions, config.domain_padding_mode)?;
                Some(match scaling {
                    Some(factors) => padding.with_output_scaling(factors)?,
                    None => padding,
                })
            }
            _ => None,
        };
        Ok(Self {
            config,
            lifting,
            blocks,
            projection_hidden,
            projection_out,
            padding,
        })
    }

    pub fn config(&self) -> &FnoConfig {
        &self.config
    }

    pub fn n_dims(&self) -> usize {
        self.config.n_modes.len()
    }

    /// Trains on a subset of modes; validated against the configured `n_modes`.
    pub fn set_incremental_n_modes(&mut self, modes: Option<Vec<usize>>) -> FieldResult<()> {
        self.blocks.set_incremental_n_modes(modes)
    }
}

impl Module for Fno {
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        if input.ndim() != self.n_dims() + 2 {
            return Err(FieldError::InvalidArgument(format!(
                "{}d operator expects rank {} input, got {:?}",
                self.n_dims(),
                self.n_dims() + 2,
                input.shape()
            )));
        }
        let mut x = self.lifting.forward(input)?;
        if let Some(padding) = &self.padding {
            x = padding.pad(&x)?;
        }
        x = self.blocks.forward(&x)?;
        if let Some(padding) = &self.padding {
            x = padding.unpad(&x)?;
        }
        let hidden = gelu_field(&self.projection_hidden.forward(&x)?);
        self.projection_out.forward(&hidden)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        self.lifting.visit_parameters(visitor)?;
        self.blocks.visit_parameters(visitor)?;
        self.projection_hidden.visit_parameters(visitor)?;
        self.projection_out.visit_parameters(visitor)
    }
}
