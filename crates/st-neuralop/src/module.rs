// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, ArrayView1, ArrayView2, Ix1, Ix2, IxDyn};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};

use crate::{Field, FieldError, FieldResult};

/// Storage for a named parameter. Spectral weights are complex.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Real(ArrayD<f32>),
    Complex(ArrayD<Complex32>),
}

/// Named trainable tensor owned by a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    name: String,
    value: ParameterValue,
}

impl Parameter {
    pub fn real(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Real(value),
        }
    }

    pub fn complex(name: impl Into<String>, value: ArrayD<Complex32>) -> Self {
        Self {
            name: name.into(),
            value: ParameterValue::Complex(value),
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn shape(&self) -> &[usize] {
        match &self.value {
            ParameterValue::Real(v) => v.shape(),
            ParameterValue::Complex(v) => v.shape(),
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.value, ParameterValue::Complex(_))
    }

    /// Number of real scalars held; complex entries count twice.
    pub fn numel(&self) -> usize {
        match &self.value {
            ParameterValue::Real(v) => v.len(),
            ParameterValue::Complex(v) => 2 * v.len(),
        }
    }

    pub fn real_value(&self) -> FieldResult<&ArrayD<f32>> {
        match &self.value {
            ParameterValue::Real(v) => Ok(v),
            ParameterValue::Complex(_) => Err(FieldError::InvalidConfiguration(format!(
                "parameter {} is complex",
                self.name
            ))),
        }
    }

    pub fn complex_value(&self) -> FieldResult<&ArrayD<Complex32>> {
        match &self.value {
            ParameterValue::Complex(v) => Ok(v),
            ParameterValue::Real(_) => Err(FieldError::InvalidConfiguration(format!(
                "parameter {} is real",
                self.name
            ))),
        }
    }

    /// Real parameter viewed as a matrix.
    pub fn matrix(&self) -> FieldResult<ArrayView2<'_, f32>> {
        self.real_value()?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|err| FieldError::InvalidConfiguration(format!("{}: {err}", self.name)))
    }

    /// Real parameter viewed as a vector.
    pub fn vector(&self) -> FieldResult<ArrayView1<'_, f32>> {
        self.real_value()?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|err| FieldError::InvalidConfiguration(format!("{}: {err}", self.name)))
    }
}

/// Minimal forward-only module surface shared by layers and models.
pub trait Module {
    /// Runs the forward pass for a single batch of fields.
    fn forward(&self, input: &Field) -> FieldResult<Field>;

    /// Visits every parameter owned by the module in declaration order.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()>;
}

/// Total number of real scalars across the module's parameters.
pub fn count_params(module: &dyn Module) -> FieldResult<usize> {
    let mut total = 0usize;
    module.visit_parameters(&mut |param| {
        total += param.numel();
        Ok(())
    })?;
    Ok(total)
}

pub(crate) fn uniform_array(rng: &mut StdRng, shape: &[usize], bound: f32) -> ArrayD<f32> {
    let dist = Uniform::new_inclusive(-bound, bound);
    ArrayD::from_shape_fn(IxDyn(shape), |_| dist.sample(rng))
}

pub(crate) fn complex_normal_array(rng: &mut StdRng, shape: &[usize], std: f32) -> ArrayD<Complex32> {
    ArrayD::from_shape_fn(IxDyn(shape), |_| {
        let re: f32 = rng.sample(StandardNormal);
        let im: f32 = rng.sample(StandardNormal);
        Complex32::new(re * std, im * std)
    })
}
