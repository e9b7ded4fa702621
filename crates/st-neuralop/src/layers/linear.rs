// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;

use crate::module::{uniform_array, Module, Parameter};
use crate::{Field, FieldError, FieldResult};

/// Pointwise linear map over one axis of a field (a 1×1 convolution).
///
/// The module surface applies it to the channel axis (axis 1); models that
/// keep channels last call [`ChannelLinear::forward_axis`] directly.
#[derive(Debug)]
pub struct ChannelLinear {
    weight: Parameter,
    bias: Option<Parameter>,
    in_features: usize,
    out_features: usize,
}

impl ChannelLinear {
    /// Creates a layer with `U(-1/sqrt(in), 1/sqrt(in))` initialisation.
    pub fn new(
        name: impl Into<String>,
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut StdRng,
    ) -> FieldResult<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "linear layer needs non-zero widths, got {in_features} -> {out_features}"
            )));
        }
        let bound = 1.0 / (in_features as f32).sqrt();
        let weight = uniform_array(rng, &[out_features, in_features], bound);
        let bias = bias.then(|| uniform_array(rng, &[out_features], bound));
        let name = name.into();
        Ok(Self {
            weight: Parameter::real(format!("{name}::weight"), weight),
            bias: bias.map(|b| Parameter::real(format!("{name}::bias"), b)),
            in_features,
            out_features,
        })
    }

    /// Builds a layer from explicit weights (`out × in`).
    pub fn from_weights(
        name: impl Into<String>,
        weight: Array2<f32>,
        bias: Option<Array1<f32>>,
    ) -> FieldResult<Self> {
        let (out_features, in_features) = weight.dim();
        if in_features == 0 || out_features == 0 {
            return Err(FieldError::InvalidConfiguration(
                "linear layer needs non-zero widths".into(),
            ));
        }
        if let Some(bias) = &bias {
            if bias.len() != out_features {
                return Err(FieldError::ShapeMismatch {
                    expected: vec![out_features],
                    got: vec![bias.len()],
                });
            }
        }
        let name = name.into();
        Ok(Self {
            weight: Parameter::real(format!("{name}::weight"), weight.into_dyn()),
            bias: bias.map(|b| Parameter::real(format!("{name}::bias"), b.into_dyn())),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Applies the map along `axis`.
    pub fn forward_axis(&self, input: &Field, axis: usize) -> FieldResult<Field> {
        let weight = self.weight.matrix()?;
        let bias = match &self.bias {
            Some(bias) => Some(bias.vector()?),
            None => None,
        };
        input.channel_linear(weight, bias, axis)
    }
}

impl Module for ChannelLinear {
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        self.forward_axis(input, 1)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        visitor(&self.weight)?;
        if let Some(bias) = &self.bias {
            visitor(bias)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn channel_and_last_axis_forms_agree() {
        let layer = ChannelLinear::from_weights(
            "lift",
            array![[1.0, 0.0], [1.0, 1.0], [0.0, 2.0]],
            Some(array![0.0, 0.0, 1.0]),
        )
        .unwrap();
        let channel_first = Field::from_shape_fn(&[2, 2, 5], |idx| (idx[0] + idx[1] * 3 + idx[2]) as f32);
        let out = layer.forward(&channel_first).unwrap();
        assert_eq!(out.shape(), &[2, 3, 5]);

        let channel_last = channel_first.move_axis(1, 2).unwrap();
        let out_last = layer.forward_axis(&channel_last, 2).unwrap();
        assert_eq!(out_last.move_axis(2, 1).unwrap(), out);
    }

    #[test]
    fn zero_width_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            ChannelLinear::new("bad", 0, 3, true, &mut rng),
            Err(FieldError::InvalidConfiguration(_))
        ));
        let layer = ChannelLinear::new("ok", 4, 3, false, &mut rng).unwrap();
        let mut names = Vec::new();
        layer
            .visit_parameters(&mut |p| {
                names.push(p.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(names, vec!["ok::weight".to_string()]);
    }
}
