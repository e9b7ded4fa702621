// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Recurrent neural operator over `(batch, time, space…, channel)` sequences.
//!
//! Each layer is a GRU whose matrix products are Fourier layers. Hidden
//! states live outside the model in [`RnoHiddenStates`] so a rollout owns
//! its memory and the model itself stays immutable.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::per_axis_setting;
use crate::layers::{ChannelLinear, DomainPadding, Factorization, PaddingMode, RnoCell, RnoLayer};
use crate::module::{Module, Parameter};
use crate::{resample, FftNorm, Field, FieldError, FieldResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RnoConfig {
    pub n_modes: Vec<usize>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub hidden_channels: usize,
    pub n_layers: usize,
    /// Adds each non-final layer's output to its input instead of replacing it.
    pub residual: bool,
    pub domain_padding: Option<Vec<f32>>,
    pub domain_padding_mode: PaddingMode,
    /// Spatial resolution factor of the prediction, shared or per axis. The
    /// recurrent memory stays at the input resolution.
    pub output_scaling_factor: Option<Vec<f32>>,
    pub fft_norm: FftNorm,
    pub factorization: Factorization,
}

impl Default for RnoConfig {
    fn default() -> Self {
        Self {
            n_modes: vec![8],
            in_channels: 1,
            out_channels: 1,
            hidden_channels: 32,
            n_layers: 4,
            residual: false,
            domain_padding: None,
            domain_padding_mode: PaddingMode::OneSided,
            output_scaling_factor: None,
            fft_norm: FftNorm::Forward,
            factorization: Factorization::Dense,
        }
    }
}

/// Per-layer recurrent memory, `None` before the first processed step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RnoHiddenStates {
    states: Vec<Option<Field>>,
}

impl RnoHiddenStates {
    /// Empty memory for a model with `layers` layers.
    pub fn new(layers: usize) -> Self {
        Self {
            states: vec![None; layers],
        }
    }

    /// Wraps caller supplied states, checking the count against the model depth.
    pub fn from_states(states: Vec<Option<Field>>, layers: usize) -> FieldResult<Self> {
        if states.len() != layers {
            return Err(FieldError::InvalidConfiguration(format!(
                "{} hidden states supplied for {layers} recurrent layers",
                states.len()
            )));
        }
        Ok(Self { states })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, layer: usize) -> Option<&Field> {
        self.states.get(layer).and_then(Option::as_ref)
    }

    /// True once every layer holds a state.
    pub fn is_primed(&self) -> bool {
        self.states.iter().all(Option::is_some)
    }

    pub fn into_inner(self) -> Vec<Option<Field>> {
        self.states
    }
}

/// Progress of a single forward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RnoPhase {
    AwaitingInput,
    Processing(usize),
    Done,
}

#[derive(Debug)]
pub struct Rno {
    config: RnoConfig,
    lifting: ChannelLinear,
    layers: Vec<RnoLayer>,
    projection: ChannelLinear,
    padding: Option<DomainPadding>,
    output_scaling: Option<Vec<f32>>,
}

impl Rno {
    pub fn new(name: impl Into<String>, config: RnoConfig, rng: &mut StdRng) -> FieldResult<Self> {
        let name = name.into();
        if config.n_layers == 0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: at least one recurrent layer is required"
            )));
        }
        if config.n_modes.is_empty() {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: n_modes must name at least one spatial axis"
            )));
        }
        let n_dims = config.n_modes.len();
        let fractions = config
            .domain_padding
            .as_deref()
            .map(|fractions| per_axis_setting(&name, "domain_padding", fractions, n_dims))
            .transpose()?;
        let output_scaling = config
            .output_scaling_factor
            .as_deref()
            .map(|factors| per_axis_setting(&name, "output_scaling_factor", factors, n_dims))
            .transpose()?;
        if let Some(bad) = output_scaling
            .iter()
            .flatten()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: output scaling factor {bad} must be positive"
            )));
        }
        let lifting = ChannelLinear::new(
            format!("{name}::lifting"),
            config.in_channels,
            config.hidden_channels,
            true,
            rng,
        )?;
        let mut layers = Vec::with_capacity(config.n_layers);
        for index in 0..config.n_layers {
            let cell = RnoCell::new(
                format!("{name}::layer{index}"),
                config.hidden_channels,
                config.n_modes.clone(),
                config.factorization,
                config.fft_norm,
                rng,
            )?;
            layers.push(RnoLayer::new(cell, index + 1 < config.n_layers));
        }
        let projection = ChannelLinear::new(
            format!("{name}::projection"),
            config.hidden_channels,
            config.out_channels,
            true,
            rng,
        )?;
        let padding = match fractions {
            Some(spatial) if spatial.iter().any(|f| *f > 0.0) => {
                // the channel axis sits where the padder expects the first spatial axis
                let per_axis: Vec<f32> = std::iter::once(0.0).chain(spatial).collect();
                let padding = DomainPadding::new(per_axis, config.domain_padding_mode)?;
                Some(match &output_scaling {
                    Some(factors) => padding
                        .with_output_scaling(std::iter::once(1.0).chain(factors.clone()).collect())?,
                    None => padding,
                })
            }
            _ => None,
        };
        Ok(Self {
            config,
            lifting,
            layers,
            projection,
            padding,
            output_scaling,
        })
    }

    pub fn config(&self) -> &RnoConfig {
        &self.config
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn n_dims(&self) -> usize {
        self.config.n_modes.len()
    }

    /// Fresh memory sized for this model.
    pub fn hidden_states(&self) -> RnoHiddenStates {
        RnoHiddenStates::new(self.layers.len())
    }

    /// Processes `x` of shape `(batch, time, space…, in_channels)` and returns
    /// the prediction for the step after the last one, `(batch, space…, out_channels)`.
    ///
    /// `hidden` is read as the initial memory and overwritten with the
    /// memory at the final time step of every layer.
    pub fn forward(&self, x: &Field, hidden: &mut RnoHiddenStates) -> FieldResult<Field> {
        let rank = self.n_dims() + 3;
        if x.ndim() != rank {
            return Err(FieldError::InvalidArgument(format!(
                "recurrent operator expects rank {rank} input (batch, time, space…, channel), got {:?}",
                x.shape()
            )));
        }
        if hidden.len() != self.layers.len() {
            return Err(FieldError::InvalidConfiguration(format!(
                "{} hidden states supplied for {} recurrent layers",
                hidden.len(),
                self.layers.len()
            )));
        }

        let last = rank - 1;
        let mut phase = RnoPhase::AwaitingInput;
        let mut x = x.clone();
        let mut last_state = None;
        loop {
            trace!(?phase, "rno transition");
            phase = match phase {
                RnoPhase::AwaitingInput => {
                    x = self.lifting.forward_axis(&x, last)?.move_axis(last, 2)?;
                    if let Some(padding) = &self.padding {
                        x = padding.pad(&x)?;
                    }
                    RnoPhase::Processing(0)
                }
                RnoPhase::Processing(index) => {
                    let layer = &self.layers[index];
                    let out = layer.forward(&x, hidden.states[index].as_ref())?;
                    if layer.returns_sequences() {
                        x = if self.config.residual { x.add(&out)? } else { out };
                        let steps = x.dim(1)?;
                        hidden.states[index] = Some(x.index_axis(1, steps - 1)?);
                        RnoPhase::Processing(index + 1)
                    } else {
                        hidden.states[index] = Some(out.clone());
                        last_state = Some(out);
                        RnoPhase::Done
                    }
                }
                RnoPhase::Done => break,
            };
        }

        let mut h = last_state.ok_or_else(|| {
            FieldError::InvalidConfiguration("final recurrent layer returned sequences".into())
        })?;
        if let Some(factors) = &self.output_scaling {
            let axes: Vec<usize> = (2..h.ndim()).collect();
            h = resample(&h, factors, &axes)?;
        }
        if let Some(padding) = &self.padding {
            h = padding.unpad(&h.insert_axis(1)?)?.index_axis(1, 0)?;
        }
        let h = h.move_axis(1, last - 1)?;
        self.projection.forward_axis(&h, last - 1)
    }

    /// Autoregressive rollout: each prediction is fed back as a single
    /// time step. Returns `(batch, num_steps, space…, out_channels)`.
    pub fn predict(&self, x0: &Field, num_steps: usize) -> FieldResult<Field> {
        if num_steps == 0 {
            return Err(FieldError::InvalidArgument(
                "rollout needs at least one step".into(),
            ));
        }
        if num_steps > 1 && self.config.in_channels != self.config.out_channels {
            return Err(FieldError::InvalidConfiguration(format!(
                "cannot feed {} output channels back into {} input channels",
                self.config.out_channels, self.config.in_channels
            )));
        }
        let rescales = self
            .output_scaling
            .as_ref()
            .map_or(false, |factors| factors.iter().any(|f| *f != 1.0));
        if num_steps > 1 && rescales {
            return Err(FieldError::InvalidConfiguration(
                "cannot feed rescaled predictions back into the recurrent memory".into(),
            ));
        }
        let mut hidden = self.hidden_states();
        let mut input = x0.clone();
        let mut outputs = Vec::with_capacity(num_steps);
        for step in 0..num_steps {
            let pred = self.forward(&input, &mut hidden)?;
            trace!(step, shape = ?pred.shape(), "rno rollout step");
            input = pred.insert_axis(1)?;
            outputs.push(pred);
        }
        Field::stack(&outputs, 1)
    }
}

impl Module for Rno {
    /// Single step from empty memory.
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        Rno::forward(self, input, &mut self.hidden_states())
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        self.lifting.visit_parameters(visitor)?;
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        self.projection.visit_parameters(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn model(padding: Option<Vec<f32>>, residual: bool) -> Rno {
        let mut rng = StdRng::seed_from_u64(17);
        let config = RnoConfig {
            n_modes: vec![4],
            in_channels: 2,
            out_channels: 2,
            hidden_channels: 3,
            n_layers: 2,
            residual,
            domain_padding: padding,
            ..RnoConfig::default()
        };
        Rno::new("rno", config, &mut rng).unwrap()
    }

    fn sequence(steps: usize) -> Field {
        Field::from_shape_fn(&[2, steps, 10, 2], |idx| {
            ((idx[1] * 10 + idx[2]) as f32 * 0.2).sin() + idx[3] as f32 * 0.1
        })
    }

    #[test]
    fn forward_records_every_layer_state() {
        let rno = model(None, false);
        let mut hidden = rno.hidden_states();
        assert!(!hidden.is_primed());
        let pred = rno.forward(&sequence(3), &mut hidden).unwrap();
        assert_eq!(pred.shape(), &[2, 10, 2]);
        assert!(hidden.is_primed());
        assert_eq!(hidden.get(0).unwrap().shape(), &[2, 3, 10]);
        assert_eq!(hidden.get(1).unwrap().shape(), &[2, 3, 10]);
        let states = hidden.into_inner();
        assert_eq!(states.len(), rno.n_layers());
        assert!(states.iter().all(Option::is_some));
    }

    #[test]
    fn padded_states_keep_padded_resolution() {
        let rno = model(Some(vec![0.2]), true);
        let mut hidden = rno.hidden_states();
        let pred = rno.forward(&sequence(2), &mut hidden).unwrap();
        assert_eq!(pred.shape(), &[2, 10, 2]);
        assert_eq!(hidden.get(1).unwrap().shape(), &[2, 3, 12]);
        let next = rno.forward(&pred.insert_axis(1).unwrap(), &mut hidden).unwrap();
        assert_eq!(next.shape(), &[2, 10, 2]);
    }

    fn scaled_config() -> RnoConfig {
        RnoConfig {
            n_modes: vec![4],
            in_channels: 2,
            out_channels: 2,
            hidden_channels: 3,
            n_layers: 2,
            domain_padding: Some(vec![0.2]),
            output_scaling_factor: Some(vec![2.0]),
            ..RnoConfig::default()
        }
    }

    #[test]
    fn rescaled_prediction_is_cropped_by_scaled_pad() {
        let mut rng = StdRng::seed_from_u64(17);
        let rno = Rno::new("rno", scaled_config(), &mut rng).unwrap();
        let mut hidden = rno.hidden_states();
        // 10 pads to 12, doubles to 24 and loses the scaled pad of 4
        let pred = rno.forward(&sequence(2), &mut hidden).unwrap();
        assert_eq!(pred.shape(), &[2, 20, 2]);
        assert!(pred.is_finite());
        assert_eq!(hidden.get(1).unwrap().shape(), &[2, 3, 12]);

        assert_eq!(rno.predict(&sequence(1), 1).unwrap().shape(), &[2, 1, 20, 2]);
        assert!(matches!(
            rno.predict(&sequence(1), 2),
            Err(FieldError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn axis_settings_are_checked_at_construction() {
        let mut rng = StdRng::seed_from_u64(17);
        for config in [
            RnoConfig {
                domain_padding: Some(vec![0.1, 0.1]),
                ..scaled_config()
            },
            RnoConfig {
                output_scaling_factor: Some(vec![2.0, 2.0]),
                ..scaled_config()
            },
            RnoConfig {
                output_scaling_factor: Some(vec![0.0]),
                domain_padding: None,
                ..scaled_config()
            },
        ] {
            assert!(matches!(
                Rno::new("rno", config, &mut rng),
                Err(FieldError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn hidden_state_count_must_match_depth() {
        let rno = model(None, false);
        let mut short = RnoHiddenStates::new(1);
        assert!(matches!(
            rno.forward(&sequence(1), &mut short),
            Err(FieldError::InvalidConfiguration(_))
        ));
        assert!(RnoHiddenStates::from_states(vec![None; 3], rno.n_layers()).is_err());
    }

    #[test]
    fn predict_rejects_degenerate_rollouts() {
        let rno = model(None, false);
        assert!(rno.predict(&sequence(1), 0).is_err());

        let mut rng = StdRng::seed_from_u64(3);
        let narrowing = Rno::new(
            "narrow",
            RnoConfig {
                n_modes: vec![4],
                in_channels: 2,
                out_channels: 1,
                hidden_channels: 3,
                n_layers: 1,
                ..RnoConfig::default()
            },
            &mut rng,
        )
        .unwrap();
        assert_eq!(narrowing.predict(&sequence(1), 1).unwrap().shape(), &[2, 1, 10, 1]);
        assert!(matches!(
            narrowing.predict(&sequence(1), 2),
            Err(FieldError::InvalidConfiguration(_))
        ));
    }
}
