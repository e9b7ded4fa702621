// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Multi-axis discrete Fourier transforms and spectral resampling.
//!
//! Transforms run lane by lane along each requested axis using `rustfft`
//! plans. Frequencies follow the usual storage order: non-negative
//! frequencies first, negative frequencies wrapped to the end of the axis.

use std::str::FromStr;

use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use num_complex::Complex32;
use rustfft::{FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, FieldResult};
use crate::field::Field;

/// Complex spectrum of a field.
pub type Spectrum = ArrayD<Complex32>;

/// Rounds ties to the even neighbour; negative values clamp to zero.
pub fn round_half_even(value: f64) -> usize {
    let floor = value.floor();
    let diff = value - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    rounded.max(0.0) as usize
}

/// Axis length after scaling `size` by `factor`, never below one sample.
///
/// Every resolution change in the workspace goes through this so padded
/// crops and rescaled spectra agree on the same sizes.
pub fn scaled_size(size: usize, factor: f32) -> usize {
    round_half_even(size as f64 * factor as f64).max(1)
}

/// Placement of the `1/n` normalisation between forward and inverse transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FftNorm {
    /// Inverse transform carries `1/n`.
    Backward,
    /// Forward transform carries `1/n`, so coefficients are resolution independent.
    #[default]
    Forward,
    /// Both directions carry `1/sqrt(n)`.
    Ortho,
}

impl FftNorm {
    fn factor(self, len: usize, direction: FftDirection) -> f32 {
        let n = len as f32;
        match (self, direction) {
            (FftNorm::Forward, FftDirection::Forward) | (FftNorm::Backward, FftDirection::Inverse) => {
                1.0 / n
            }
            (FftNorm::Ortho, _) => 1.0 / n.sqrt(),
            _ => 1.0,
        }
    }
}

impl FromStr for FftNorm {
    type Err = FieldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "backward" => Ok(FftNorm::Backward),
            "forward" => Ok(FftNorm::Forward),
            "ortho" => Ok(FftNorm::Ortho),
            other => Err(FieldError::InvalidArgument(format!(
                "unknown fft norm '{other}' (expected backward, forward or ortho)"
            ))),
        }
    }
}

/// Signed frequencies kept when retaining `modes` coefficients on one axis.
///
/// `ceil(modes/2)` non-negative frequencies and `floor(modes/2)` negative ones.
pub fn retained_frequencies(modes: usize) -> impl Iterator<Item = isize> {
    let positive = modes.div_ceil(2) as isize;
    let negative = (modes / 2) as isize;
    (0..positive).chain(-negative..0)
}

/// Storage index of the signed frequency `freq` on an axis of length `len`.
pub fn frequency_index(freq: isize, len: usize) -> usize {
    if freq >= 0 {
        freq as usize
    } else {
        (len as isize + freq) as usize
    }
}

fn validate_axes(rank: usize, axes: &[usize]) -> FieldResult<()> {
    for (position, &axis) in axes.iter().enumerate() {
        if axis >= rank {
            return Err(FieldError::AxisOutOfRange { axis, rank });
        }
        if axes[..position].contains(&axis) {
            return Err(FieldError::InvalidArgument(format!(
                "axis {axis} listed twice"
            )));
        }
    }
    Ok(())
}

fn transform_axes(
    data: &mut Spectrum,
    axes: &[usize],
    direction: FftDirection,
    norm: FftNorm,
) -> FieldResult<()> {
    validate_axes(data.ndim(), axes)?;
    let mut planner = FftPlanner::<f32>::new();
    for &axis in axes {
        let len = data.len_of(Axis(axis));
        if len == 0 {
            continue;
        }
        let fft = planner.plan_fft(len, direction);
        let scale = norm.factor(len, direction);
        let mut buffer = vec![Complex32::new(0.0, 0.0); len];
        for mut lane in data.lanes_mut(Axis(axis)) {
            for (slot, value) in buffer.iter_mut().zip(lane.iter()) {
                *slot = *value;
            }
            fft.process(&mut buffer);
            for (value, slot) in lane.iter_mut().zip(buffer.iter()) {
                *value = *slot * scale;
            }
        }
    }
    Ok(())
}

/// Promotes a real field to a complex spectrum buffer.
pub fn to_complex(field: &Field) -> Spectrum {
    field.as_array().mapv(|v| Complex32::new(v, 0.0))
}

/// Forward transform of `field` over `axes`.
pub fn fftn(field: &Field, axes: &[usize], norm: FftNorm) -> FieldResult<Spectrum> {
    let mut spectrum = to_complex(field);
    transform_axes(&mut spectrum, axes, FftDirection::Forward, norm)?;
    Ok(spectrum)
}

/// Inverse transform over `axes`, keeping the complex result.
pub fn ifftn(mut spectrum: Spectrum, axes: &[usize], norm: FftNorm) -> FieldResult<Spectrum> {
    transform_axes(&mut spectrum, axes, FftDirection::Inverse, norm)?;
    Ok(spectrum)
}

/// Inverse transform over `axes` returning the real part.
pub fn ifftn_real(spectrum: Spectrum, axes: &[usize], norm: FftNorm) -> FieldResult<Field> {
    let complex = ifftn(spectrum, axes, norm)?;
    Ok(Field::from_array(complex.mapv(|c| c.re)))
}

/// Spectrally interpolates `field` so that each axis in `axes` is scaled by the
/// matching factor. A single factor applies to every axis.
pub fn resample(field: &Field, scale_factors: &[f32], axes: &[usize]) -> FieldResult<Field> {
    validate_axes(field.ndim(), axes)?;
    let factors: Vec<f32> = match scale_factors.len() {
        1 => vec![scale_factors[0]; axes.len()],
        n if n == axes.len() => scale_factors.to_vec(),
        n => {
            return Err(FieldError::InvalidArgument(format!(
                "{n} scale factors supplied for {} axes",
                axes.len()
            )))
        }
    };
    let mut sizes = Vec::with_capacity(axes.len());
    for (&axis, &factor) in axes.iter().zip(&factors) {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(FieldError::InvalidArgument(format!(
                "scale factor {factor} must be positive and finite"
            )));
        }
        sizes.push(scaled_size(field.shape()[axis], factor));
    }
    resample_to(field, &sizes, axes)
}

/// Spectrally interpolates `field` to the explicit `sizes` along `axes`.
///
/// Coefficients shared by both resolutions are copied, the rest are zero
/// (upsampling) or dropped (downsampling).
pub fn resample_to(field: &Field, sizes: &[usize], axes: &[usize]) -> FieldResult<Field> {
    validate_axes(field.ndim(), axes)?;
    if sizes.len() != axes.len() {
        return Err(FieldError::InvalidArgument(format!(
            "{} target sizes supplied for {} axes",
            sizes.len(),
            axes.len()
        )));
    }
    if axes
        .iter()
        .zip(sizes)
        .all(|(&axis, &size)| field.shape()[axis] == size)
    {
        return Ok(field.clone());
    }

    let spectrum = fftn(field, axes, FftNorm::Forward)?;
    let mut out_shape = field.shape().to_vec();
    // per transformed axis: target index -> source index
    let mut lookup: Vec<Vec<Option<usize>>> = Vec::with_capacity(axes.len());
    for (&axis, &size) in axes.iter().zip(sizes) {
        let len = field.shape()[axis];
        let mut table = vec![None; size];
        for freq in retained_frequencies(len.min(size)) {
            table[frequency_index(freq, size)] = Some(frequency_index(freq, len));
        }
        lookup.push(table);
        out_shape[axis] = size;
    }

    let mut out = Spectrum::zeros(IxDyn(&out_shape));
    let mut source = vec![0usize; out_shape.len()];
    for (index, value) in out.indexed_iter_mut() {
        source.copy_from_slice(index.slice());
        let mut kept = true;
        for (table, &axis) in lookup.iter().zip(axes) {
            match table[source[axis]] {
                Some(mapped) => source[axis] = mapped,
                None => {
                    kept = false;
                    break;
                }
            }
        }
        if kept {
            *value = spectrum[source.as_slice()];
        }
    }
    ifftn_real(out, axes, FftNorm::Forward)
}

/// Energy spectrum of a stack of square 2D signals summed over `|kx| + |ky|` shells.
///
/// `signal` holds `T` snapshots of an `n × n` grid (any shape with `T·n²`
/// entries). Returns `n` shell energies averaged over the snapshots; shell `j`
/// is stored at index `j - 1`.
pub fn spectrum_2d(signal: &Field, n: usize) -> FieldResult<Vec<f32>> {
    if n < 2 || n % 2 != 0 {
        return Err(FieldError::InvalidArgument(format!(
            "spectrum_2d expects an even resolution, got {n}"
        )));
    }
    let cells = n * n;
    if signal.is_empty() || signal.len() % cells != 0 {
        return Err(FieldError::DataLength {
            expected: cells,
            got: signal.len(),
        });
    }
    let snapshots = signal.len() / cells;
    let grid = Field::from_shape_vec(&[snapshots, n, n], signal.to_vec())?;
    let spectrum = fftn(&grid, &[1, 2], FftNorm::Backward)?;

    let k_max = n / 2;
    let wavenumber = |i: usize| -> usize {
        if i < k_max {
            i
        } else {
            n - i
        }
    };
    let mut energy = vec![0.0f32; n];
    for t in 0..snapshots {
        let mut shells = vec![Complex32::new(0.0, 0.0); n];
        for kx in 0..=k_max {
            for ky in 0..=k_max {
                let shell = wavenumber(kx) + wavenumber(ky);
                if (1..=n).contains(&shell) {
                    shells[shell - 1] += spectrum[[t, kx, ky]];
                }
            }
        }
        for (acc, total) in energy.iter_mut().zip(&shells) {
            *acc += total.norm_sqr();
        }
    }
    for acc in energy.iter_mut() {
        *acc /= snapshots as f32;
    }
    Ok(energy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn wave(len: usize) -> Field {
        Field::from_shape_fn(&[1, 1, len], |idx| {
            let x = idx[2] as f32 / len as f32;
            (2.0 * PI * x).sin() + 0.5 * (4.0 * PI * x).cos()
        })
    }

    #[test]
    fn fft_roundtrip_respects_every_norm() {
        let field = wave(12);
        for norm in [FftNorm::Backward, FftNorm::Forward, FftNorm::Ortho] {
            let spectrum = fftn(&field, &[2], norm).unwrap();
            let restored = ifftn_real(spectrum, &[2], norm).unwrap();
            for (a, b) in restored.to_vec().iter().zip(field.to_vec()) {
                assert_abs_diff_eq!(*a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn forward_norm_makes_dc_the_mean() {
        let field = Field::full(&[1, 1, 8], 3.0);
        let spectrum = fftn(&field, &[2], FftNorm::Forward).unwrap();
        assert_abs_diff_eq!(spectrum[[0, 0, 0]].re, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(spectrum[[0, 0, 1]].norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn retained_frequencies_split_positive_and_negative() {
        let freqs: Vec<isize> = retained_frequencies(5).collect();
        assert_eq!(freqs, vec![0, 1, 2, -2, -1]);
        assert_eq!(frequency_index(-2, 16), 14);
    }

    #[test]
    fn resample_roundtrip_recovers_band_limited_field() {
        let field = wave(16);
        let up = resample(&field, &[2.0], &[2]).unwrap();
        assert_eq!(up.shape(), &[1, 1, 32]);
        for i in 0..16 {
            assert_abs_diff_eq!(up.as_array()[[0, 0, 2 * i]], field.as_array()[[0, 0, i]], epsilon = 1e-4);
        }
        let down = resample(&up, &[0.5], &[2]).unwrap();
        for (a, b) in down.to_vec().iter().zip(field.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn resample_touches_only_requested_axes() {
        let field = Field::from_shape_fn(&[2, 3, 8, 6], |idx| (idx[2] + idx[3]) as f32);
        let out = resample(&field, &[0.5, 1.5], &[2, 3]).unwrap();
        assert_eq!(out.shape(), &[2, 3, 4, 9]);
        assert!(resample(&field, &[0.5, 1.0, 2.0], &[2, 3]).is_err());
        assert!(resample(&field, &[0.0], &[2]).is_err());
    }

    #[test]
    fn scaled_sizes_round_ties_to_even() {
        assert_eq!(round_half_even(2.5), 2);
        assert_eq!(round_half_even(3.5), 4);
        assert_eq!(round_half_even(1.0000001), 1);
        assert_eq!(scaled_size(5, 0.5), 2);
        assert_eq!(scaled_size(7, 0.5), 4);
        assert_eq!(scaled_size(1, 0.1), 1);
        let field = Field::zeros(&[1, 1, 5]);
        assert_eq!(resample(&field, &[0.5], &[2]).unwrap().shape(), &[1, 1, 2]);
    }

    #[test]
    fn spectrum_2d_picks_up_single_mode() {
        let n = 8;
        let signal = Field::from_shape_fn(&[1, n, n], |idx| (2.0 * PI * idx[1] as f32 / n as f32).cos());
        let energy = spectrum_2d(&signal, n).unwrap();
        assert_eq!(energy.len(), n);
        let amplitude = (n * n) as f32 / 2.0;
        assert_abs_diff_eq!(energy[0], amplitude * amplitude, epsilon = 1e-1);
        for value in &energy[1..] {
            assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-2);
        }
        assert!(spectrum_2d(&signal, 7).is_err());
    }

    #[test]
    fn unknown_norm_is_rejected() {
        assert_eq!("ortho".parse::<FftNorm>().unwrap(), FftNorm::Ortho);
        assert!(matches!("half".parse::<FftNorm>(), Err(FieldError::InvalidArgument(_))));
    }
}
