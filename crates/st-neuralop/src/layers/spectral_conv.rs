// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Spectral convolution over the low-frequency Fourier modes of a field.
//!
//! The layer transforms `(batch, in, s_1, …, s_d)` fields to frequency space,
//! mixes channels with a complex weight per retained mode and transforms back.
//! Weights are either dense or stored as CP / Tucker factors and rebuilt at
//! forward time.

use ndarray::{indices, ArrayD, ArrayView2, Ix2, IxDyn};
use num_complex::Complex32;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::module::{complex_normal_array, Module, Parameter};
use crate::{
    fftn, frequency_index, ifftn_real, retained_frequencies, scaled_size, FftNorm, Field,
    FieldError, FieldResult, Spectrum,
};

/// Parametrisation of the spectral weight tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Factorization {
    #[default]
    Dense,
    /// Sum of `rank` rank-one terms.
    Cp { rank: usize },
    /// Core of size `rank` (clamped per mode) with one factor matrix per mode.
    Tucker { rank: usize },
}

#[derive(Debug)]
enum SpectralWeight {
    Dense(Parameter),
    Cp {
        weights: Parameter,
        factors: Vec<Parameter>,
    },
    Tucker {
        core: Parameter,
        factors: Vec<Parameter>,
    },
}

fn complex_matrix(param: &Parameter) -> FieldResult<ArrayView2<'_, Complex32>> {
    param
        .complex_value()?
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|err| FieldError::InvalidConfiguration(format!("{}: {err}", param.name())))
}

/// Contracts `matrix` (`dim × rank`) against axis `mode` of `tensor`.
fn mode_product(
    tensor: &ArrayD<Complex32>,
    matrix: ArrayView2<'_, Complex32>,
    mode: usize,
) -> FieldResult<ArrayD<Complex32>> {
    let ndim = tensor.ndim();
    let shape = tensor.shape().to_vec();
    let rank = shape[mode];
    let mut order: Vec<usize> = (0..ndim).filter(|&axis| axis != mode).collect();
    order.push(mode);
    let moved = tensor
        .view()
        .permuted_axes(IxDyn(&order))
        .as_standard_layout()
        .into_owned();
    let rows = moved.len() / rank.max(1);
    let flat = moved
        .into_shape((rows, rank))
        .map_err(|err| FieldError::InvalidConfiguration(err.to_string()))?;
    let product = flat.dot(&matrix.t());

    let mut moved_shape: Vec<usize> = order.iter().map(|&axis| shape[axis]).collect();
    moved_shape[ndim - 1] = matrix.nrows();
    let product = product
        .into_shape(IxDyn(&moved_shape))
        .map_err(|err| FieldError::InvalidConfiguration(err.to_string()))?;
    let mut inverse: Vec<usize> = (0..ndim - 1).collect();
    inverse.insert(mode, ndim - 1);
    Ok(product
        .permuted_axes(IxDyn(&inverse))
        .as_standard_layout()
        .into_owned())
}

impl SpectralWeight {
    fn build(
        name: &str,
        factorization: Factorization,
        shape: &[usize],
        std: f32,
        rng: &mut StdRng,
    ) -> FieldResult<Self> {
        match factorization {
            Factorization::Dense => Ok(SpectralWeight::Dense(Parameter::complex(
                format!("{name}::weight"),
                complex_normal_array(rng, shape, std),
            ))),
            Factorization::Cp { rank } => {
                if rank == 0 {
                    return Err(FieldError::InvalidConfiguration("cp rank must be positive".into()));
                }
                let factor_std = std.powf(1.0 / shape.len() as f32);
                let factors = shape
                    .iter()
                    .enumerate()
                    .map(|(mode, &dim)| {
                        Parameter::complex(
                            format!("{name}::factor{mode}"),
                            complex_normal_array(rng, &[dim, rank], factor_std),
                        )
                    })
                    .collect();
                let weights = ArrayD::from_elem(IxDyn(&[rank]), Complex32::new(1.0 / rank as f32, 0.0));
                Ok(SpectralWeight::Cp {
                    weights: Parameter::complex(format!("{name}::cp_weights"), weights),
                    factors,
                })
            }
            Factorization::Tucker { rank } => {
                if rank == 0 {
                    return Err(FieldError::InvalidConfiguration(
                        "tucker rank must be positive".into(),
                    ));
                }
                let core_shape: Vec<usize> = shape.iter().map(|&dim| dim.min(rank)).collect();
                let core = complex_normal_array(rng, &core_shape, std);
                let factors = shape
                    .iter()
                    .zip(&core_shape)
                    .enumerate()
                    .map(|(mode, (&dim, &r))| {
                        let scale = 1.0 / (r as f32).sqrt();
                        Parameter::complex(
                            format!("{name}::factor{mode}"),
                            complex_normal_array(rng, &[dim, r], scale),
                        )
                    })
                    .collect();
                Ok(SpectralWeight::Tucker {
                    core: Parameter::complex(format!("{name}::core"), core),
                    factors,
                })
            }
        }
    }

    /// Full `(in, out, m_1, …, m_d)` weight tensor.
    fn dense(&self) -> FieldResult<ArrayD<Complex32>> {
        match self {
            SpectralWeight::Dense(weight) => Ok(weight.complex_value()?.clone()),
            SpectralWeight::Cp { weights, factors } => {
                let lambdas = weights.complex_value()?;
                let mats = factors
                    .iter()
                    .map(complex_matrix)
                    .collect::<FieldResult<Vec<_>>>()?;
                let shape: Vec<usize> = mats.iter().map(|m| m.nrows()).collect();
                let mut out = ArrayD::from_elem(IxDyn(&shape), Complex32::new(0.0, 0.0));
                for (index, value) in out.indexed_iter_mut() {
                    let mut acc = Complex32::new(0.0, 0.0);
                    for (r, lambda) in lambdas.iter().enumerate() {
                        let mut term = *lambda;
                        for (mode, mat) in mats.iter().enumerate() {
                            term *= mat[[index[mode], r]];
                        }
                        acc += term;
                    }
                    *value = acc;
                }
                Ok(out)
            }
            SpectralWeight::Tucker { core, factors } => {
                let mut out = core.complex_value()?.clone();
                for (mode, factor) in factors.iter().enumerate() {
                    out = mode_product(&out, complex_matrix(factor)?, mode)?;
                }
                Ok(out)
            }
        }
    }

    fn visit(&self, visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>) -> FieldResult<()> {
        match self {
            SpectralWeight::Dense(weight) => visitor(weight),
            SpectralWeight::Cp { weights, factors } => {
                visitor(weights)?;
                factors.iter().try_for_each(|f| visitor(f))
            }
            SpectralWeight::Tucker { core, factors } => {
                visitor(core)?;
                factors.iter().try_for_each(|f| visitor(f))
            }
        }
    }
}

/// Fourier-space channel mixing restricted to the lowest `n_modes` per axis.
#[derive(Debug)]
pub struct SpectralConv {
    in_channels: usize,
    out_channels: usize,
    n_modes: Vec<usize>,
    incremental_n_modes: Option<Vec<usize>>,
    factorization: Factorization,
    fft_norm: FftNorm,
    output_scaling: Option<Vec<f32>>,
    weight: SpectralWeight,
    bias: Parameter,
}

impl SpectralConv {
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        n_modes: Vec<usize>,
        factorization: Factorization,
        fft_norm: FftNorm,
        rng: &mut StdRng,
    ) -> FieldResult<Self> {
        let name = name.into();
        if in_channels == 0 || out_channels == 0 {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: spectral convolution needs non-zero channels"
            )));
        }
        if n_modes.is_empty() || n_modes.contains(&0) {
            return Err(FieldError::InvalidConfiguration(format!(
                "{name}: n_modes must list a positive mode count per axis, got {n_modes:?}"
            )));
        }
        let mut shape = vec![in_channels, out_channels];
        shape.extend_from_slice(&n_modes);
        let std = (2.0 / (in_channels + out_channels) as f32).sqrt();
        let weight = SpectralWeight::build(&name, factorization, &shape, std, rng)?;

        let mut bias_shape = vec![1, out_channels];
        bias_shape.extend(std::iter::repeat(1).take(n_modes.len()));
        let bias = ArrayD::zeros(IxDyn(&bias_shape));
        Ok(Self {
            in_channels,
            out_channels,
            n_modes,
            incremental_n_modes: None,
            factorization,
            fft_norm,
            output_scaling: None,
            weight,
            bias: Parameter::real(format!("{name}::bias"), bias),
        })
    }

    /// Rescales the output resolution per spatial axis.
    pub fn with_output_scaling(mut self, factors: Vec<f32>) -> FieldResult<Self> {
        self.set_output_scaling(Some(factors))?;
        Ok(self)
    }

    /// Sets or clears the per-axis output resolution factors.
    pub fn set_output_scaling(&mut self, factors: Option<Vec<f32>>) -> FieldResult<()> {
        if let Some(factors) = &factors {
            if factors.len() != self.n_modes.len()
                || factors.iter().any(|f| !f.is_finite() || *f <= 0.0)
            {
                return Err(FieldError::InvalidConfiguration(format!(
                    "output scaling {factors:?} must hold {} positive factors",
                    self.n_modes.len()
                )));
            }
        }
        self.output_scaling = factors;
        Ok(())
    }

    pub fn n_dims(&self) -> usize {
        self.n_modes.len()
    }

    pub fn n_modes(&self) -> &[usize] {
        &self.n_modes
    }

    pub fn factorization(&self) -> Factorization {
        self.factorization
    }

    pub fn output_scaling(&self) -> Option<&[f32]> {
        self.output_scaling.as_deref()
    }

    pub fn incremental_n_modes(&self) -> Option<&[usize]> {
        self.incremental_n_modes.as_deref()
    }

    /// Restricts the active modes to a prefix of the configured ones.
    ///
    /// `None` restores the full set. Each entry must be in `1..=n_modes[k]`.
    pub fn set_incremental_n_modes(&mut self, modes: Option<Vec<usize>>) -> FieldResult<()> {
        if let Some(modes) = &modes {
            let valid = modes.len() == self.n_modes.len()
                && modes
                    .iter()
                    .zip(&self.n_modes)
                    .all(|(&active, &max)| active >= 1 && active <= max);
            if !valid {
                return Err(FieldError::InvalidConfiguration(format!(
                    "incremental modes {modes:?} exceed configured modes {:?}",
                    self.n_modes
                )));
            }
        }
        self.incremental_n_modes = modes;
        Ok(())
    }

    /// Spatial resolution produced for an input resolution.
    pub fn output_shape(&self, resolution: &[usize]) -> Vec<usize> {
        match &self.output_scaling {
            Some(factors) => resolution
                .iter()
                .zip(factors)
                .map(|(&size, &factor)| scaled_size(size, factor))
                .collect(),
            None => resolution.to_vec(),
        }
    }
}

impl Module for SpectralConv {
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        let d = self.n_modes.len();
        if input.ndim() != d + 2 || input.shape()[1] != self.in_channels {
            let mut expected = vec![input.shape().first().copied().unwrap_or(0), self.in_channels];
            expected.extend(input.shape().iter().skip(2).take(d));
            return Err(FieldError::shape(&expected, input.shape()));
        }
        let batch = input.shape()[0];
        let resolution = input.shape()[2..].to_vec();
        let out_resolution = self.output_shape(&resolution);
        let axes: Vec<usize> = (2..d + 2).collect();

        let spectrum = fftn(input, &axes, self.fft_norm)?;
        let weight = self.weight.dense()?;
        let active = self.incremental_n_modes.as_ref().unwrap_or(&self.n_modes);

        // per axis: (input index, weight index, output index) of every kept frequency
        let mut kept: Vec<Vec<(usize, usize, usize)>> = Vec::with_capacity(d);
        for k in 0..d {
            let count = active[k].min(resolution[k]).min(out_resolution[k]);
            kept.push(
                retained_frequencies(count)
                    .map(|freq| {
                        (
                            frequency_index(freq, resolution[k]),
                            frequency_index(freq, self.n_modes[k]),
                            frequency_index(freq, out_resolution[k]),
                        )
                    })
                    .collect(),
            );
        }
        let counts: Vec<usize> = kept.iter().map(Vec::len).collect();

        let mut out_shape = vec![batch, self.out_channels];
        out_shape.extend_from_slice(&out_resolution);
        let mut out = Spectrum::zeros(IxDyn(&out_shape));

        let mut src = vec![0usize; d + 2];
        let mut dst = vec![0usize; d + 2];
        let mut w = vec![0usize; d + 2];
        for mode in indices(IxDyn(&counts)) {
            for k in 0..d {
                let (i, wi, o) = kept[k][mode[k]];
                src[k + 2] = i;
                w[k + 2] = wi;
                dst[k + 2] = o;
            }
            for b in 0..batch {
                src[0] = b;
                dst[0] = b;
                for o in 0..self.out_channels {
                    w[1] = o;
                    let mut acc = Complex32::new(0.0, 0.0);
                    for i in 0..self.in_channels {
                        src[1] = i;
                        w[0] = i;
                        acc += spectrum[src.as_slice()] * weight[w.as_slice()];
                    }
                    dst[1] = o;
                    out[dst.as_slice()] = acc;
                }
            }
        }

        let real = ifftn_real(out, &axes, self.fft_norm)?;
        real.zip_broadcast(self.bias.real_value()?, |a, b| a + b)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        self.weight.visit(visitor)?;
        visitor(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::count_params;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use std::f32::consts::PI;

    fn conv(factorization: Factorization, modes: Vec<usize>) -> SpectralConv {
        let mut rng = StdRng::seed_from_u64(11);
        SpectralConv::new("spec", 2, 3, modes, factorization, FftNorm::Forward, &mut rng).unwrap()
    }

    #[test]
    fn forward_preserves_resolution() {
        let layer = conv(Factorization::Dense, vec![4, 3]);
        let input = Field::from_shape_fn(&[2, 2, 8, 6], |idx| ((idx[2] * 3 + idx[3]) as f32).sin());
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.shape(), &[2, 3, 8, 6]);
        assert!(out.is_finite());
    }

    #[test]
    fn modes_above_cutoff_are_filtered() {
        let layer = conv(Factorization::Dense, vec![2]);
        // two modes keep frequencies 0 and -1 only
        let high = Field::from_shape_fn(&[1, 2, 16], |idx| (2.0 * PI * 3.0 * idx[2] as f32 / 16.0).cos());
        let out = layer.forward(&high).unwrap();
        for value in out.to_vec() {
            assert_abs_diff_eq!(value, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn output_scaling_changes_resolution() {
        let layer = conv(Factorization::Dense, vec![3])
            .with_output_scaling(vec![2.0])
            .unwrap();
        let out = layer.forward(&Field::full(&[1, 2, 8], 1.0)).unwrap();
        assert_eq!(out.shape(), &[1, 3, 16]);
    }

    #[test]
    fn factorized_weights_match_dense_shape() {
        for factorization in [Factorization::Cp { rank: 3 }, Factorization::Tucker { rank: 2 }] {
            let layer = conv(factorization, vec![4, 4]);
            let dense = layer.weight.dense().unwrap();
            assert_eq!(dense.shape(), &[2, 3, 4, 4]);
            let out = layer.forward(&Field::full(&[1, 2, 8, 8], 0.5)).unwrap();
            assert_eq!(out.shape(), &[1, 3, 8, 8]);
        }
        let dense = conv(Factorization::Dense, vec![4, 4]);
        let tucker = conv(Factorization::Tucker { rank: 2 }, vec![4, 4]);
        assert!(count_params(&tucker).unwrap() < count_params(&dense).unwrap());
    }

    #[test]
    fn tucker_with_identity_factors_reproduces_core() {
        let core = ArrayD::from_shape_fn(IxDyn(&[2, 2, 2]), |idx| {
            Complex32::new((idx[0] * 4 + idx[1] * 2 + idx[2]) as f32, 0.0)
        });
        let eye = ndarray::Array2::from_shape_fn((2, 2), |(r, c)| {
            Complex32::new(if r == c { 1.0 } else { 0.0 }, 0.0)
        });
        let mut out = core.clone();
        for mode in 0..3 {
            out = mode_product(&out, eye.view(), mode).unwrap();
        }
        assert_eq!(out, core);
    }

    #[test]
    fn incremental_modes_are_validated() {
        let mut layer = conv(Factorization::Dense, vec![4, 4]);
        layer.set_incremental_n_modes(Some(vec![2, 3])).unwrap();
        assert_eq!(layer.incremental_n_modes(), Some(&[2, 3][..]));
        let out = layer.forward(&Field::full(&[1, 2, 8, 8], 1.0)).unwrap();
        assert_eq!(out.shape(), &[1, 3, 8, 8]);
        assert!(matches!(
            layer.set_incremental_n_modes(Some(vec![5, 1])),
            Err(FieldError::InvalidConfiguration(_))
        ));
        assert!(layer.set_incremental_n_modes(Some(vec![2])).is_err());
        layer.set_incremental_n_modes(None).unwrap();
        assert!(layer.incremental_n_modes().is_none());
    }
}
