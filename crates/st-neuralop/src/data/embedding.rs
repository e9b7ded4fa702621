// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use serde::{Deserialize, Serialize};

use crate::module::{Module, Parameter};
use crate::{Field, FieldError, FieldResult};

/// Appends one coordinate channel per spatial axis.
///
/// On an axis of `n` points spanning `[start, end]` the channel holds
/// `start + (end − start)·i/n`, so the right boundary is never sampled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridEmbedding {
    boundaries: Vec<[f32; 2]>,
}

impl GridEmbedding {
    pub fn new(boundaries: Vec<[f32; 2]>) -> FieldResult<Self> {
        if boundaries.is_empty() {
            return Err(FieldError::InvalidConfiguration(
                "grid embedding needs at least one axis".into(),
            ));
        }
        if let Some(bad) = boundaries
            .iter()
            .find(|[start, end]| !start.is_finite() || !end.is_finite())
        {
            return Err(FieldError::InvalidConfiguration(format!(
                "grid boundary {bad:?} is not finite"
            )));
        }
        Ok(Self { boundaries })
    }

    /// Unit square/cube grid over `dims` axes.
    pub fn unit(dims: usize) -> FieldResult<Self> {
        Self::new(vec![[0.0, 1.0]; dims])
    }

    pub fn n_dims(&self) -> usize {
        self.boundaries.len()
    }

    /// `(batch, channel, space…)` to `(batch, channel + n_dims, space…)`.
    pub fn embed(&self, field: &Field) -> FieldResult<Field> {
        let dims = self.boundaries.len();
        if field.ndim() != dims + 2 {
            return Err(FieldError::InvalidArgument(format!(
                "{dims}d grid embedding expects rank {} input, got {:?}",
                dims + 2,
                field.shape()
            )));
        }
        let resolution = field.shape()[2..].to_vec();
        let mut shape = field.shape().to_vec();
        shape[1] = dims;
        let boundaries = &self.boundaries;
        let grid = Field::from_shape_fn(&shape, |idx| {
            let axis = idx[1];
            let [start, end] = boundaries[axis];
            start + (end - start) * idx[axis + 2] as f32 / resolution[axis] as f32
        });
        Field::concat(&[field.clone(), grid], 1)
    }
}

impl Module for GridEmbedding {
    fn forward(&self, input: &Field) -> FieldResult<Field> {
        self.embed(input)
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> FieldResult<()>,
    ) -> FieldResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn coordinate_channels_follow_the_grid() {
        let mut rng = StdRng::seed_from_u64(4);
        for dims in 1..=4 {
            let embedding = GridEmbedding::unit(dims).unwrap();
            let mut shape = vec![1, 1];
            shape.extend(std::iter::repeat(20).take(dims));
            let embedded = embedding.embed(&Field::full(&shape, 7.0)).unwrap();
            assert_eq!(embedded.shape()[1], 1 + dims);

            let point: Vec<usize> = (0..dims).map(|_| rng.gen_range(0..20)).collect();
            for axis in 0..dims {
                let mut index = vec![0, 1 + axis];
                index.extend(&point);
                let value = embedded.as_array()[index.as_slice()];
                assert_abs_diff_eq!(value, point[axis] as f32 / 20.0, epsilon = 1e-6);
            }
            let mut original = vec![0, 0];
            original.extend(&point);
            assert_eq!(embedded.as_array()[original.as_slice()], 7.0);
        }
    }

    #[test]
    fn custom_boundaries_shift_and_scale() {
        let embedding = GridEmbedding::new(vec![[-1.0, 1.0]]).unwrap();
        let embedded = embedding.embed(&Field::zeros(&[2, 1, 4])).unwrap();
        let coords: Vec<f32> = (0..4).map(|i| embedded.as_array()[[1, 1, i]]).collect();
        assert_eq!(coords, vec![-1.0, -0.5, 0.0, 0.5]);
        assert!(embedding.embed(&Field::zeros(&[2, 1, 4, 4])).is_err());
    }
}
